//! Типы обратных вызовов клиента и их хранилище.
//!
//! Обратный вызов получает `&mut Client`, поэтому на время вызова он
//! извлекается из таблицы ([`Slot::Busy`]) и возвращается обратно, если
//! за время вызова его не заменили и не удалили.

use std::{collections::HashMap, fmt};

use mxbus_error::MxResult;
use serde::Serialize;

use super::{
    sources::{DataSourceId, SourceEvent},
    Client,
};
use crate::{
    pubsub::{ComponentId, Delivery, MessageTypeId},
    timer::TimerId,
};

/// Обработчик сообщений одного типа.
pub type MessageCallback = Box<dyn FnMut(&mut Client, &Delivery) -> MxResult<()> + Send>;

/// Обработчик таймера.
pub type TimerCallback = Box<dyn FnMut(&mut Client, TimerId) -> MxResult<()> + Send>;

/// Обработчик пользовательского источника данных.
pub type DataCallback = Box<dyn FnMut(&mut Client, DataSourceId, &SourceEvent) -> MxResult<()> + Send>;

/// Обработчик события обнаружения.
pub type Hook<E> = Box<dyn FnMut(&mut Client, &E) -> MxResult<()> + Send>;

/// Компонент подключился или отключился.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentEvent {
    pub id: ComponentId,
    pub name: String,
}

/// Компонент подписался на тип или отменил подписку.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberEvent {
    pub msg_type: MessageTypeId,
    pub id: ComponentId,
    pub name: String,
}

/// Компонент объявил публикацию типа или снял её.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublisherEvent {
    pub msg_type: MessageTypeId,
    pub id: ComponentId,
    pub name: String,
}

/// На брокере зарегистрирован новый именованный тип.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageTypeEvent {
    pub msg_type: MessageTypeId,
    pub name: String,
}

/// Ячейка таблицы обратных вызовов.
pub(crate) enum Slot<T> {
    Idle(T),
    /// Обратный вызов сейчас выполняется
    Busy,
}

impl<T> Slot<T> {
    /// Забирает обратный вызов, оставляя `Busy`.
    pub(crate) fn take(&mut self) -> Option<T> {
        match std::mem::replace(self, Slot::Busy) {
            Slot::Idle(cb) => Some(cb),
            Slot::Busy => None,
        }
    }
}

/// Возвращает обратный вызов в таблицу, если ячейка всё ещё занята им.
///
/// Если за время вызова ячейку заменили новым обработчиком или удалили,
/// старый обработчик просто отбрасывается.
pub(crate) fn restore<K, T>(
    table: &mut HashMap<K, Slot<T>>,
    key: &K,
    cb: T,
) where
    K: std::hash::Hash + Eq,
{
    if let Some(slot) = table.get_mut(key) {
        if matches!(slot, Slot::Busy) {
            *slot = Slot::Idle(cb);
        }
    }
}

/// Обработчики обнаружения по темам.
#[derive(Default)]
pub(crate) struct Hooks {
    pub new_component: Vec<Hook<ComponentEvent>>,
    pub end_component: Vec<Hook<ComponentEvent>>,
    pub new_message: Vec<Hook<MessageTypeEvent>>,
    pub new_subscriber: HashMap<MessageTypeId, Vec<Hook<SubscriberEvent>>>,
    pub end_subscriber: HashMap<MessageTypeId, Vec<Hook<SubscriberEvent>>>,
    pub new_publisher: HashMap<MessageTypeId, Vec<Hook<PublisherEvent>>>,
    pub end_publisher: HashMap<MessageTypeId, Vec<Hook<PublisherEvent>>>,
}

fn per_type<E>(hooks: &HashMap<MessageTypeId, Vec<Hook<E>>>) -> usize {
    hooks.values().map(Vec::len).sum()
}

impl fmt::Debug for Hooks {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("new_component", &self.new_component.len())
            .field("end_component", &self.end_component.len())
            .field("new_message", &self.new_message.len())
            .field("new_subscriber", &per_type(&self.new_subscriber))
            .field("end_subscriber", &per_type(&self.end_subscriber))
            .field("new_publisher", &per_type(&self.new_publisher))
            .field("end_publisher", &per_type(&self.end_publisher))
            .finish()
    }
}
