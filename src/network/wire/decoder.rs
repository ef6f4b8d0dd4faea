use bytes::{Buf, BytesMut};
use mxbus_error::FramingError;

use super::frame::{Frame, DEFAULT_MAX_FRAME_LEN, KIND_LEN, LEN_PREFIX};

/// Потоковый декодер кадров поверх растущего буфера чтения.
///
/// Соединение дописывает в буфер всё, что отдал сокет, и вызывает
/// [`FrameDecoder::decode`], пока тот не вернёт `Ok(None)`. Полный кадр
/// отрезается от начала буфера; неполный остаётся на месте, а буфер
/// резервирует место под его остаток.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    pub fn decode(
        &self,
        src: &mut BytesMut,
    ) -> Result<Option<Frame>, FramingError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len < KIND_LEN {
            return Err(FramingError::Truncated {
                needed: KIND_LEN,
                available: len,
            });
        }
        if len > self.max_frame_len {
            return Err(FramingError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let total = LEN_PREFIX + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let mut body = src.split_to(len).freeze();
        let kind = body.get_u16();
        Frame::decode_body(kind, body).map(Some)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
