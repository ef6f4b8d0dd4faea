//! Кодек: типизированные поля полезной нагрузки, управляющие кадры и
//! потоковый декодер, общий для брокера и клиента.

pub mod decoder;
pub mod field;
pub mod frame;

pub use decoder::FrameDecoder;
pub use field::{decode, encode, Field, FieldKind, FieldReader, FieldWriter};
pub use frame::{Frame, FrameKind, WatchTopic, DEFAULT_MAX_FRAME_LEN};
