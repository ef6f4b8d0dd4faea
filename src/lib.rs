//! mxbus: шина обмена сообщениями.
//!
//! Брокер (`network::Broker`) принимает соединения компонентов, ведёт
//! реестр типов сообщений и подписок и пересылает конверты. Компонент
//! встраивает `client::Client`: одно соединение, цикл событий, таймеры,
//! обработчики подписок и синхронные запросы с ожиданием ответа.

/// Клиент: соединение, цикл событий, таймеры, обработчики, ожидания.
pub mod client;
/// Итоговые имя шины, хост и порт, настройки брокера.
pub mod config;
/// Гибкое логирование (форматирование, фильтры, приёмники).
pub mod logging;
/// Сетевой стек: кодек, реестр соединений и брокер на Tokio.
pub mod network;
/// Типы сообщений, конверты и маршрутизатор брокера.
pub mod pubsub;
/// Очередь таймеров процесса.
pub mod timer;

// -----------------------------------------------------------------------------
//  Часто используемые публичные типы
// -----------------------------------------------------------------------------

/// API клиента.
pub use client::{
    Client, ClientConfig, ComponentEvent, DataSourceId, MessageTypeEvent, PublisherEvent,
    RunStatus, SourceEvent, SubscriberEvent, WaitOutcome,
};
/// Итоговые значения и настройки.
pub use config::{effective_host, effective_name, effective_port, port_for_name, Settings};
/// Логирование.
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingHandle};
/// Брокер и кодек.
pub use network::{
    wire::{Field, FieldKind, Frame, FrameKind},
    Broker, BrokerConfig, BrokerHandle,
};
/// Ошибки операций и типы результатов.
pub use mxbus_error::{
    BrokerError, ClientError, FramingError, MxResult, ResultExt, StackError, StatusCode,
};
/// Модель сообщений и политика маршрутизации.
pub use pubsub::{BroadcastEcho, ComponentId, Delivery, Envelope, MessageTypeId, Role};
/// Таймеры.
pub use timer::{TimerId, TimerQueue};
