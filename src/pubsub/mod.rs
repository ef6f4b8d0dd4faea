//! Ядро обмена сообщениями.
//!
//! - `message`: идентификаторы компонентов и типов, конверт и доставка.
//! - `message_types`: реестр типов сообщений (имя <-> id).
//! - `router`: маршрутизатор брокера: рукопожатие, подписки и публикации,
//!   пересылка, уведомления обнаружения.

pub mod message;
pub mod message_types;
pub mod router;

pub use message::{ComponentId, Delivery, Envelope, MessageTypeId, Role};
pub use message_types::{MessageTypeRegistry, Registration};
pub use router::{BroadcastEcho, Control, Router, RouterStatsSnapshot};
