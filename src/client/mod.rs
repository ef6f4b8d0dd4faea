//! Клиентская среда выполнения: соединение с брокером, цикл событий,
//! таймеры, обработчики, пользовательские источники данных и ожидание
//! ответов.

pub mod connection;
pub mod core;
pub mod directory;
pub mod handlers;
pub mod sources;
pub mod wait;

// Публичный экспорт основных типов, чтобы упростить доступ к ним из
// внешнего кода.
pub use connection::ClientConnection;
pub use self::core::{Client, ClientConfig, RunStatus, WaitOutcome};
pub use directory::Directory;
pub use handlers::{ComponentEvent, MessageTypeEvent, PublisherEvent, SubscriberEvent};
pub use sources::{DataSourceId, DataSources, SourceEvent};
pub use wait::PendingWaits;
