use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Идентификатор компонента (одного подключения к брокеру).
///
/// Назначается брокером при подключении; освободившиеся идентификаторы
/// переиспользуются.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub u32);

/// Числовой идентификатор типа сообщения, назначаемый брокером.
///
/// Нумерация начинается с `1` и стабильна на всё время жизни брокера.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTypeId(pub u32);

/// Отношение компонента к типу сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Получает рассылки типа
    Subscriber,
    /// Объявил, что рассылает сообщения типа
    Publisher,
}

/// Один передаваемый конверт: тип, версия и непрозрачная полезная нагрузка.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub msg_type: MessageTypeId,
    pub version: u32,
    pub payload: Bytes,
}

/// Конверт, доставленный компоненту, вместе с отправителем.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub source: ComponentId,
    pub envelope: Envelope,
}

impl Envelope {
    pub fn new(
        msg_type: MessageTypeId,
        version: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            msg_type,
            version,
            payload: payload.into(),
        }
    }
}

impl Delivery {
    pub fn msg_type(&self) -> MessageTypeId {
        self.envelope.msg_type
    }

    pub fn version(&self) -> u32 {
        self.envelope.version
    }

    pub fn payload(&self) -> &Bytes {
        &self.envelope.payload
    }
}

impl fmt::Display for ComponentId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for MessageTypeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
