//! Управляющие кадры и кадры данных между компонентами и брокером.
//!
//! # Раскладка
//! ```text
//! +----------------+-------------+----------------------------+
//! | len: u32 (BE)  | kind: u16   | body (kind-specific)       |
//! +----------------+-------------+----------------------------+
//! ```
//! `len` считает всё после себя: вид и тело. Полезная нагрузка конверта
//! всегда стоит последней в теле и занимает оставшиеся байты.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mxbus_error::FramingError;

use super::field::{put_str, FieldReader};
use crate::pubsub::{ComponentId, Envelope, MessageTypeId, Role};

/// Размер префикса длины.
pub const LEN_PREFIX: usize = 4;
/// Размер поля вида кадра.
pub const KIND_LEN: usize = 2;
/// Верхняя граница `len` по умолчанию.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Числовые виды кадров, как они записаны на проводе.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameKind {
    Hello = 1,
    HelloReply = 2,
    Register = 3,
    RegisterReply = 4,
    Subscribe = 5,
    Unsubscribe = 6,
    Send = 7,
    Broadcast = 8,
    Deliver = 9,
    Watch = 10,
    NotifyNewComponent = 11,
    NotifyEndComponent = 12,
    NotifyNewSubscriber = 13,
    NotifyEndSubscriber = 14,
    NotifyNewMessage = 15,
    Quit = 16,
    Publish = 17,
    Withdraw = 18,
    NotifyNewPublisher = 19,
    NotifyEndPublisher = 20,
}

/// За чем хочет следить компонент.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchTopic {
    Components,
    Messages,
    Subscribers(MessageTypeId),
    Publishers(MessageTypeId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Первый кадр каждого соединения. При пустом имени брокер составит его
    /// из `host` и `pid`.
    Hello {
        name: String,
        host: String,
        pid: u32,
    },
    HelloReply {
        id: ComponentId,
        name: String,
    },
    Register {
        name: String,
    },
    RegisterReply {
        msg_type: MessageTypeId,
        name: String,
    },
    Subscribe {
        msg_type: MessageTypeId,
    },
    Unsubscribe {
        msg_type: MessageTypeId,
    },
    Send {
        target: ComponentId,
        envelope: Envelope,
    },
    Broadcast {
        envelope: Envelope,
    },
    /// От брокера компоненту: конверт и его отправитель.
    Deliver {
        source: ComponentId,
        envelope: Envelope,
    },
    Watch {
        topic: WatchTopic,
    },
    NotifyNewComponent {
        id: ComponentId,
        name: String,
    },
    NotifyEndComponent {
        id: ComponentId,
        name: String,
    },
    NotifyNewSubscriber {
        msg_type: MessageTypeId,
        id: ComponentId,
        name: String,
    },
    NotifyEndSubscriber {
        msg_type: MessageTypeId,
        id: ComponentId,
        name: String,
    },
    NotifyNewMessage {
        msg_type: MessageTypeId,
        name: String,
    },
    Quit,
    /// Компонент объявляет, что рассылает сообщения типа
    Publish {
        msg_type: MessageTypeId,
    },
    Withdraw {
        msg_type: MessageTypeId,
    },
    NotifyNewPublisher {
        msg_type: MessageTypeId,
        id: ComponentId,
        name: String,
    },
    NotifyEndPublisher {
        msg_type: MessageTypeId,
        id: ComponentId,
        name: String,
    },
}

////////////////////////////////////////////////////////////////////////////////
// FrameKind
////////////////////////////////////////////////////////////////////////////////

impl TryFrom<u16> for FrameKind {
    type Error = FramingError;

    fn try_from(kind: u16) -> Result<Self, Self::Error> {
        Ok(match kind {
            1 => Self::Hello,
            2 => Self::HelloReply,
            3 => Self::Register,
            4 => Self::RegisterReply,
            5 => Self::Subscribe,
            6 => Self::Unsubscribe,
            7 => Self::Send,
            8 => Self::Broadcast,
            9 => Self::Deliver,
            10 => Self::Watch,
            11 => Self::NotifyNewComponent,
            12 => Self::NotifyEndComponent,
            13 => Self::NotifyNewSubscriber,
            14 => Self::NotifyEndSubscriber,
            15 => Self::NotifyNewMessage,
            16 => Self::Quit,
            17 => Self::Publish,
            18 => Self::Withdraw,
            19 => Self::NotifyNewPublisher,
            20 => Self::NotifyEndPublisher,
            other => return Err(FramingError::UnknownKind { kind: other }),
        })
    }
}

impl WatchTopic {
    const COMPONENTS: u8 = 0;
    const MESSAGES: u8 = 1;
    const SUBSCRIBERS: u8 = 2;
    const PUBLISHERS: u8 = 3;

    /// Тема участников типа в роли `role`.
    pub fn members(
        role: Role,
        msg_type: MessageTypeId,
    ) -> Self {
        match role {
            Role::Subscriber => Self::Subscribers(msg_type),
            Role::Publisher => Self::Publishers(msg_type),
        }
    }

    fn to_wire(self) -> (u8, u32) {
        match self {
            Self::Components => (Self::COMPONENTS, 0),
            Self::Messages => (Self::MESSAGES, 0),
            Self::Subscribers(t) => (Self::SUBSCRIBERS, t.0),
            Self::Publishers(t) => (Self::PUBLISHERS, t.0),
        }
    }

    fn from_wire(
        topic: u8,
        msg_type: u32,
    ) -> Result<Self, FramingError> {
        match topic {
            Self::COMPONENTS => Ok(Self::Components),
            Self::MESSAGES => Ok(Self::Messages),
            Self::SUBSCRIBERS => Ok(Self::Subscribers(MessageTypeId(msg_type))),
            Self::PUBLISHERS => Ok(Self::Publishers(MessageTypeId(msg_type))),
            topic => Err(FramingError::UnknownWatchTopic { topic }),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Frame
////////////////////////////////////////////////////////////////////////////////

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Hello { .. } => FrameKind::Hello,
            Self::HelloReply { .. } => FrameKind::HelloReply,
            Self::Register { .. } => FrameKind::Register,
            Self::RegisterReply { .. } => FrameKind::RegisterReply,
            Self::Subscribe { .. } => FrameKind::Subscribe,
            Self::Unsubscribe { .. } => FrameKind::Unsubscribe,
            Self::Send { .. } => FrameKind::Send,
            Self::Broadcast { .. } => FrameKind::Broadcast,
            Self::Deliver { .. } => FrameKind::Deliver,
            Self::Watch { .. } => FrameKind::Watch,
            Self::NotifyNewComponent { .. } => FrameKind::NotifyNewComponent,
            Self::NotifyEndComponent { .. } => FrameKind::NotifyEndComponent,
            Self::NotifyNewSubscriber { .. } => FrameKind::NotifyNewSubscriber,
            Self::NotifyEndSubscriber { .. } => FrameKind::NotifyEndSubscriber,
            Self::NotifyNewMessage { .. } => FrameKind::NotifyNewMessage,
            Self::Quit => FrameKind::Quit,
            Self::Publish { .. } => FrameKind::Publish,
            Self::Withdraw { .. } => FrameKind::Withdraw,
            Self::NotifyNewPublisher { .. } => FrameKind::NotifyNewPublisher,
            Self::NotifyEndPublisher { .. } => FrameKind::NotifyEndPublisher,
        }
    }

    /// Уведомление о том, что `id` принял роль `role` для `msg_type`.
    pub fn role_joined(
        role: Role,
        msg_type: MessageTypeId,
        id: ComponentId,
        name: String,
    ) -> Self {
        match role {
            Role::Subscriber => Self::NotifyNewSubscriber { msg_type, id, name },
            Role::Publisher => Self::NotifyNewPublisher { msg_type, id, name },
        }
    }

    pub fn role_left(
        role: Role,
        msg_type: MessageTypeId,
        id: ComponentId,
        name: String,
    ) -> Self {
        match role {
            Role::Subscriber => Self::NotifyEndSubscriber { msg_type, id, name },
            Role::Publisher => Self::NotifyEndPublisher { msg_type, id, name },
        }
    }

    /// Дописывает в `dst` весь кадр вместе с префиксом длины.
    pub fn encode(
        &self,
        dst: &mut BytesMut,
    ) {
        let start = dst.len();
        dst.put_u32(0);
        dst.put_u16(self.kind() as u16);

        match self {
            Self::Hello { name, host, pid } => {
                put_str(dst, name);
                put_str(dst, host);
                dst.put_u32(*pid);
            }
            Self::HelloReply { id, name }
            | Self::NotifyNewComponent { id, name }
            | Self::NotifyEndComponent { id, name } => {
                dst.put_u32(id.0);
                put_str(dst, name);
            }
            Self::Register { name } => put_str(dst, name),
            Self::RegisterReply { msg_type, name } | Self::NotifyNewMessage { msg_type, name } => {
                dst.put_u32(msg_type.0);
                put_str(dst, name);
            }
            Self::Subscribe { msg_type }
            | Self::Unsubscribe { msg_type }
            | Self::Publish { msg_type }
            | Self::Withdraw { msg_type } => dst.put_u32(msg_type.0),
            Self::Send { target, envelope } => {
                dst.put_u32(target.0);
                put_envelope(dst, envelope);
            }
            Self::Broadcast { envelope } => put_envelope(dst, envelope),
            Self::Deliver { source, envelope } => {
                dst.put_u32(source.0);
                put_envelope(dst, envelope);
            }
            Self::Watch { topic } => {
                let (topic, msg_type) = topic.to_wire();
                dst.put_u8(topic);
                dst.put_u32(msg_type);
            }
            Self::NotifyNewSubscriber { msg_type, id, name }
            | Self::NotifyEndSubscriber { msg_type, id, name }
            | Self::NotifyNewPublisher { msg_type, id, name }
            | Self::NotifyEndPublisher { msg_type, id, name } => {
                dst.put_u32(msg_type.0);
                dst.put_u32(id.0);
                put_str(dst, name);
            }
            Self::Quit => {}
        }

        let len = (dst.len() - start - LEN_PREFIX) as u32;
        dst[start..start + LEN_PREFIX].copy_from_slice(&len.to_be_bytes());
    }

    /// Кодирует в отдельный буфер. Рассылка клонирует результат.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Разбирает тело кадра (всё после вида) заданного вида.
    ///
    /// Лишние байты в теле - ошибка; исключение составляет нагрузка
    /// конверта, которой принадлежит хвост кадра.
    pub fn decode_body(
        kind: u16,
        body: Bytes,
    ) -> Result<Frame, FramingError> {
        let kind = FrameKind::try_from(kind)?;
        let mut r = FieldReader::new(&body);

        let frame = match kind {
            FrameKind::Hello => Self::Hello {
                name: r.get_str()?,
                host: r.get_str()?,
                pid: r.get_u32()?,
            },
            FrameKind::HelloReply => Self::HelloReply {
                id: ComponentId(r.get_u32()?),
                name: r.get_str()?,
            },
            FrameKind::Register => Self::Register { name: r.get_str()? },
            FrameKind::RegisterReply => Self::RegisterReply {
                msg_type: MessageTypeId(r.get_u32()?),
                name: r.get_str()?,
            },
            FrameKind::Subscribe => Self::Subscribe {
                msg_type: MessageTypeId(r.get_u32()?),
            },
            FrameKind::Unsubscribe => Self::Unsubscribe {
                msg_type: MessageTypeId(r.get_u32()?),
            },
            FrameKind::Send => {
                let target = ComponentId(r.get_u32()?);
                let envelope = get_envelope(&mut r, &body)?;
                return Ok(Self::Send { target, envelope });
            }
            FrameKind::Broadcast => {
                let envelope = get_envelope(&mut r, &body)?;
                return Ok(Self::Broadcast { envelope });
            }
            FrameKind::Deliver => {
                let source = ComponentId(r.get_u32()?);
                let envelope = get_envelope(&mut r, &body)?;
                return Ok(Self::Deliver { source, envelope });
            }
            FrameKind::Watch => {
                let topic = r.get_u8()?;
                let msg_type = r.get_u32()?;
                Self::Watch {
                    topic: WatchTopic::from_wire(topic, msg_type)?,
                }
            }
            FrameKind::NotifyNewComponent => Self::NotifyNewComponent {
                id: ComponentId(r.get_u32()?),
                name: r.get_str()?,
            },
            FrameKind::NotifyEndComponent => Self::NotifyEndComponent {
                id: ComponentId(r.get_u32()?),
                name: r.get_str()?,
            },
            FrameKind::NotifyNewSubscriber => Self::NotifyNewSubscriber {
                msg_type: MessageTypeId(r.get_u32()?),
                id: ComponentId(r.get_u32()?),
                name: r.get_str()?,
            },
            FrameKind::NotifyEndSubscriber => Self::NotifyEndSubscriber {
                msg_type: MessageTypeId(r.get_u32()?),
                id: ComponentId(r.get_u32()?),
                name: r.get_str()?,
            },
            FrameKind::NotifyNewMessage => Self::NotifyNewMessage {
                msg_type: MessageTypeId(r.get_u32()?),
                name: r.get_str()?,
            },
            FrameKind::Quit => Self::Quit,
            FrameKind::Publish => Self::Publish {
                msg_type: MessageTypeId(r.get_u32()?),
            },
            FrameKind::Withdraw => Self::Withdraw {
                msg_type: MessageTypeId(r.get_u32()?),
            },
            FrameKind::NotifyNewPublisher => Self::NotifyNewPublisher {
                msg_type: MessageTypeId(r.get_u32()?),
                id: ComponentId(r.get_u32()?),
                name: r.get_str()?,
            },
            FrameKind::NotifyEndPublisher => Self::NotifyEndPublisher {
                msg_type: MessageTypeId(r.get_u32()?),
                id: ComponentId(r.get_u32()?),
                name: r.get_str()?,
            },
        };

        r.finish()?;
        Ok(frame)
    }

    /// Разбирает один полный кадр вместе с префиксом длины.
    pub fn decode(mut src: Bytes) -> Result<Frame, FramingError> {
        if src.len() < LEN_PREFIX + KIND_LEN {
            return Err(FramingError::Truncated {
                needed: LEN_PREFIX + KIND_LEN,
                available: src.len(),
            });
        }
        let len = src.get_u32() as usize;
        if src.len() != len {
            return Err(FramingError::Truncated {
                needed: len,
                available: src.len(),
            });
        }
        let kind = src.get_u16();
        Self::decode_body(kind, src)
    }
}

fn put_envelope(
    dst: &mut BytesMut,
    envelope: &Envelope,
) {
    dst.put_u32(envelope.msg_type.0);
    dst.put_u32(envelope.version);
    dst.put_slice(&envelope.payload);
}

/// Читает заголовок конверта и вырезает нагрузку из `body` без
/// копирования.
fn get_envelope(
    r: &mut FieldReader<'_>,
    body: &Bytes,
) -> Result<Envelope, FramingError> {
    let msg_type = MessageTypeId(r.get_u32()?);
    let version = r.get_u32()?;
    let offset = body.len() - r.remaining();
    Ok(Envelope {
        msg_type,
        version,
        payload: body.slice(offset..),
    })
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let bytes = frame.to_bytes();
        assert_eq!(Frame::decode(bytes).unwrap(), frame);
    }

    #[test]
    fn test_every_kind_roundtrips() {
        let env = Envelope::new(MessageTypeId(1), 3, &b"Ping!"[..]);
        let frames = vec![
            Frame::Hello {
                name: "ping".into(),
                host: "box".into(),
                pid: 42,
            },
            Frame::HelloReply {
                id: ComponentId(1),
                name: "ping".into(),
            },
            Frame::Register { name: "Ping".into() },
            Frame::RegisterReply {
                msg_type: MessageTypeId(1),
                name: "Ping".into(),
            },
            Frame::Subscribe {
                msg_type: MessageTypeId(1),
            },
            Frame::Unsubscribe {
                msg_type: MessageTypeId(1),
            },
            Frame::Send {
                target: ComponentId(2),
                envelope: env.clone(),
            },
            Frame::Broadcast {
                envelope: env.clone(),
            },
            Frame::Deliver {
                source: ComponentId(9),
                envelope: env,
            },
            Frame::Watch {
                topic: WatchTopic::Subscribers(MessageTypeId(5)),
            },
            Frame::Watch {
                topic: WatchTopic::Components,
            },
            Frame::NotifyNewComponent {
                id: ComponentId(3),
                name: "pong".into(),
            },
            Frame::NotifyEndComponent {
                id: ComponentId(3),
                name: "pong".into(),
            },
            Frame::NotifyNewSubscriber {
                msg_type: MessageTypeId(1),
                id: ComponentId(3),
                name: "pong".into(),
            },
            Frame::NotifyEndSubscriber {
                msg_type: MessageTypeId(1),
                id: ComponentId(3),
                name: "pong".into(),
            },
            Frame::NotifyNewMessage {
                msg_type: MessageTypeId(2),
                name: "Pong".into(),
            },
            Frame::Quit,
            Frame::Publish {
                msg_type: MessageTypeId(1),
            },
            Frame::Withdraw {
                msg_type: MessageTypeId(1),
            },
            Frame::Watch {
                topic: WatchTopic::Publishers(MessageTypeId(1)),
            },
            Frame::NotifyNewPublisher {
                msg_type: MessageTypeId(1),
                id: ComponentId(4),
                name: "clock".into(),
            },
            Frame::NotifyEndPublisher {
                msg_type: MessageTypeId(1),
                id: ComponentId(4),
                name: "clock".into(),
            },
        ];
        for frame in frames {
            roundtrip(frame);
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = Frame::Subscribe {
            msg_type: MessageTypeId(0x0a0b0c0d),
        }
        .to_bytes();
        assert_eq!(&bytes[..], &[0, 0, 0, 6, 0, 5, 0x0a, 0x0b, 0x0c, 0x0d]);
    }

    #[test]
    fn test_quit_is_kind_only() {
        assert_eq!(&Frame::Quit.to_bytes()[..], &[0, 0, 0, 2, 0, 16]);
    }

    #[test]
    fn test_publisher_topic_layout() {
        let bytes = Frame::Watch {
            topic: WatchTopic::Publishers(MessageTypeId(2)),
        }
        .to_bytes();
        assert_eq!(&bytes[..], &[0, 0, 0, 7, 0, 10, 3, 0, 0, 0, 2]);
    }

    #[test]
    fn test_empty_payload_is_allowed() {
        roundtrip(Frame::Broadcast {
            envelope: Envelope::new(MessageTypeId(4), 0, Bytes::new()),
        });
    }

    #[test]
    fn test_unknown_kind() {
        let err = Frame::decode_body(999, Bytes::new()).unwrap_err();
        assert_eq!(err, FramingError::UnknownKind { kind: 999 });
    }

    #[test]
    fn test_trailing_bytes_in_control_frame() {
        let body = Bytes::from_static(&[0, 0, 0, 1, 0xaa]);
        let err = Frame::decode_body(FrameKind::Subscribe as u16, body).unwrap_err();
        assert_eq!(err, FramingError::TrailingBytes { count: 1 });
    }

    #[test]
    fn test_unknown_watch_topic() {
        let body = Bytes::from_static(&[7, 0, 0, 0, 0]);
        let err = Frame::decode_body(FrameKind::Watch as u16, body).unwrap_err();
        assert_eq!(err, FramingError::UnknownWatchTopic { topic: 7 });
    }

    #[test]
    fn test_truncated_body() {
        let body = Bytes::from_static(&[0, 0, 0, 9, b'a']);
        let err = Frame::decode_body(FrameKind::Register as u16, body).unwrap_err();
        assert_eq!(
            err,
            FramingError::Truncated {
                needed: 9,
                available: 1
            }
        );
    }

    #[test]
    fn test_payload_is_sliced_from_frame() {
        let frame = Frame::Deliver {
            source: ComponentId(1),
            envelope: Envelope::new(MessageTypeId(1), 0, &b"abc"[..]),
        };
        match Frame::decode(frame.to_bytes()).unwrap() {
            Frame::Deliver { envelope, .. } => assert_eq!(&envelope.payload[..], b"abc"),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
