//! Сетевой модуль mxbus.
//!
//! ## Подмодули
//!
//! - `banner`: баннер, который брокер печатает при старте.
//! - `server`: слушающий сокет брокера и цикл приёма соединений.
//! - `connection`: задача одного соединения (чтение кадров, запись очереди).
//! - `connection_registry`: реестр подключённых компонентов.
//! - `connection_state`: состояния соединений, метаданные и счётчики.
//! - `outbox`: ограниченная очередь исходящих кадров соединения.
//! - `wire`: кодек полей и кадров.

pub mod banner;
pub mod connection;
pub mod connection_registry;
pub mod connection_state;
pub mod outbox;
pub mod server;
pub mod wire;

pub use connection_registry::ConnectionRegistry;
pub use connection_state::{CloseReason, ComponentSnapshot, ConnectionState};
pub use server::{Broker, BrokerConfig, BrokerHandle};
