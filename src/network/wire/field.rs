//! Кодек типизированных полей.
//!
//! Полезная нагрузка - плоская последовательность big-endian чисел и строк
//! UTF-8 с префиксом длины. Тегов в раскладке нет: читатель должен знать
//! виды полей по порядку. Управляющие кадры собираются из тех же примитивов.
//!
//! # Инварианты
//! - Перед строкой стоит её длина в байтах (`u32`), а не в символах.
//! - Чтение короткого входа не паникует: каждое чтение проверяет остаток и
//!   возвращает [`FramingError::Truncated`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mxbus_error::FramingError;

/// Размер префикса длины строки.
pub const STR_LEN_PREFIX: usize = 4;

/// Вид поля, как его объявляет читатель.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Str,
}

/// Значение поля, разобранное или подготовленное к записи.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl FieldKind {
    /// Ширина на проводе для полей фиксированного размера, `None` для строк.
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Self::I8 | Self::U8 => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 => Some(4),
            Self::I64 | Self::U64 | Self::F64 => Some(8),
            Self::Str => None,
        }
    }
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::I8(_) => FieldKind::I8,
            Self::I16(_) => FieldKind::I16,
            Self::I32(_) => FieldKind::I32,
            Self::I64(_) => FieldKind::I64,
            Self::U8(_) => FieldKind::U8,
            Self::U16(_) => FieldKind::U16,
            Self::U32(_) => FieldKind::U32,
            Self::U64(_) => FieldKind::U64,
            Self::F32(_) => FieldKind::F32,
            Self::F64(_) => FieldKind::F64,
            Self::Str(_) => FieldKind::Str,
        }
    }

    /// Сколько байт поле занимает на проводе.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Str(s) => STR_LEN_PREFIX + s.len(),
            other => other.kind().fixed_width().unwrap_or(0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! field_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Field {
                fn from(v: $ty) -> Self {
                    Field::$variant(v)
                }
            }
        )*
    };
}

field_from! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64, String => Str,
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Str(v.to_owned())
    }
}

/// Кодирует `fields` в новый буфер.
pub fn encode(fields: &[Field]) -> Bytes {
    let mut w = FieldWriter::with_capacity(fields.iter().map(Field::encoded_len).sum());
    for field in fields {
        w.put_field(field);
    }
    w.finish()
}

/// Разбирает из `src` по порядку `kinds.len()` полей.
///
/// Байты после последнего объявленного поля игнорируются: читатель старой
/// версии нагрузки принимает более длинные новые версии.
pub fn decode(
    src: &[u8],
    kinds: &[FieldKind],
) -> Result<Vec<Field>, FramingError> {
    let mut r = FieldReader::new(src);
    kinds.iter().map(|&kind| r.get_field(kind)).collect()
}

////////////////////////////////////////////////////////////////////////////////
// FieldWriter
////////////////////////////////////////////////////////////////////////////////

/// Дописывает big-endian поля в растущий буфер.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: BytesMut,
}

macro_rules! writer_puts {
    ($($name:ident($ty:ty) => $put:ident;)*) => {
        $(
            pub fn $name(&mut self, v: $ty) -> &mut Self {
                self.buf.$put(v);
                self
            }
        )*
    };
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
        }
    }

    writer_puts! {
        put_i8(i8) => put_i8;
        put_i16(i16) => put_i16;
        put_i32(i32) => put_i32;
        put_i64(i64) => put_i64;
        put_u8(u8) => put_u8;
        put_u16(u16) => put_u16;
        put_u32(u32) => put_u32;
        put_u64(u64) => put_u64;
        put_f32(f32) => put_f32;
        put_f64(f64) => put_f64;
    }

    pub fn put_str(
        &mut self,
        s: &str,
    ) -> &mut Self {
        put_str(&mut self.buf, s);
        self
    }

    /// Дописывает сырые байты без префикса длины.
    pub fn put_raw(
        &mut self,
        raw: &[u8],
    ) -> &mut Self {
        self.buf.put_slice(raw);
        self
    }

    pub fn put_field(
        &mut self,
        field: &Field,
    ) -> &mut Self {
        match field {
            Field::I8(v) => self.put_i8(*v),
            Field::I16(v) => self.put_i16(*v),
            Field::I32(v) => self.put_i32(*v),
            Field::I64(v) => self.put_i64(*v),
            Field::U8(v) => self.put_u8(*v),
            Field::U16(v) => self.put_u16(*v),
            Field::U32(v) => self.put_u32(*v),
            Field::U64(v) => self.put_u64(*v),
            Field::F32(v) => self.put_f32(*v),
            Field::F64(v) => self.put_f64(*v),
            Field::Str(s) => self.put_str(s),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Пишет строку UTF-8 с префиксом `u32` в любой `BufMut`.
pub(crate) fn put_str<B: BufMut>(
    dst: &mut B,
    s: &str,
) {
    debug_assert!(s.len() <= u32::MAX as usize);
    dst.put_u32(s.len() as u32);
    dst.put_slice(s.as_bytes());
}

////////////////////////////////////////////////////////////////////////////////
// FieldReader
////////////////////////////////////////////////////////////////////////////////

/// Курсор по закодированному буферу.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
}

macro_rules! reader_gets {
    ($($name:ident -> $ty:ty, $width:expr, $get:ident;)*) => {
        $(
            pub fn $name(&mut self) -> Result<$ty, FramingError> {
                self.need($width)?;
                Ok(self.buf.$get())
            }
        )*
    };
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(
        &self,
        n: usize,
    ) -> Result<(), FramingError> {
        if self.buf.len() < n {
            return Err(FramingError::Truncated {
                needed: n,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    reader_gets! {
        get_i8 -> i8, 1, get_i8;
        get_i16 -> i16, 2, get_i16;
        get_i32 -> i32, 4, get_i32;
        get_i64 -> i64, 8, get_i64;
        get_u8 -> u8, 1, get_u8;
        get_u16 -> u16, 2, get_u16;
        get_u32 -> u32, 4, get_u32;
        get_u64 -> u64, 8, get_u64;
        get_f32 -> f32, 4, get_f32;
        get_f64 -> f64, 8, get_f64;
    }

    pub fn get_str(&mut self) -> Result<String, FramingError> {
        let len = self.get_u32()? as usize;
        self.need(len)?;
        let (raw, rest) = self.buf.split_at(len);
        let s = std::str::from_utf8(raw).map_err(|_| FramingError::InvalidUtf8)?;
        self.buf = rest;
        Ok(s.to_owned())
    }

    pub fn get_field(
        &mut self,
        kind: FieldKind,
    ) -> Result<Field, FramingError> {
        Ok(match kind {
            FieldKind::I8 => Field::I8(self.get_i8()?),
            FieldKind::I16 => Field::I16(self.get_i16()?),
            FieldKind::I32 => Field::I32(self.get_i32()?),
            FieldKind::I64 => Field::I64(self.get_i64()?),
            FieldKind::U8 => Field::U8(self.get_u8()?),
            FieldKind::U16 => Field::U16(self.get_u16()?),
            FieldKind::U32 => Field::U32(self.get_u32()?),
            FieldKind::U64 => Field::U64(self.get_u64()?),
            FieldKind::F32 => Field::F32(self.get_f32()?),
            FieldKind::F64 => Field::F64(self.get_f64()?),
            FieldKind::Str => Field::Str(self.get_str()?),
        })
    }

    /// Требует, чтобы буфер был прочитан целиком.
    pub fn finish(self) -> Result<(), FramingError> {
        match self.buf.len() {
            0 => Ok(()),
            count => Err(FramingError::TrailingBytes { count }),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_layout_is_big_endian() {
        let bytes = encode(&[Field::U16(0x0102), Field::I32(-2), Field::Str("hé".into())]);
        assert_eq!(
            &bytes[..],
            &[0x01, 0x02, 0xff, 0xff, 0xff, 0xfe, 0, 0, 0, 3, b'h', 0xc3, 0xa9]
        );
    }

    #[test]
    fn test_string_prefix_counts_bytes_not_chars() {
        let bytes = encode(&[Field::from("ñandú")]);
        let prefix = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(prefix as usize, "ñandú".len());
        assert_eq!(prefix, 7);
    }

    #[test]
    fn test_decode_mixed_fields() {
        let fields = vec![
            Field::I8(-5),
            Field::U64(u64::MAX),
            Field::F64(2.5),
            Field::Str(String::new()),
            Field::F32(-0.25),
        ];
        let kinds: Vec<FieldKind> = fields.iter().map(Field::kind).collect();
        let decoded = decode(&encode(&fields), &kinds).unwrap();
        assert_eq!(decoded, fields);
    }

    #[rstest]
    #[case::fixed_width(vec![0x00, 0x01], vec![FieldKind::U32], 4, 2)]
    #[case::string_body(vec![0, 0, 0, 5, b'a', b'b'], vec![FieldKind::Str], 5, 2)]
    #[case::string_prefix(vec![0, 0], vec![FieldKind::Str], 4, 2)]
    #[case::second_field(vec![1, 0, 0], vec![FieldKind::U8, FieldKind::I64], 8, 2)]
    fn test_decode_truncated(
        #[case] input: Vec<u8>,
        #[case] kinds: Vec<FieldKind>,
        #[case] needed: usize,
        #[case] available: usize,
    ) {
        assert_eq!(
            decode(&input, &kinds),
            Err(FramingError::Truncated { needed, available })
        );
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let input = [0, 0, 0, 2, 0xff, 0xfe];
        assert_eq!(decode(&input, &[FieldKind::Str]), Err(FramingError::InvalidUtf8));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes_but_reader_finish_does_not() {
        let input = [7u8, 1, 2];
        assert_eq!(decode(&input, &[FieldKind::U8]).unwrap(), vec![Field::U8(7)]);

        let mut r = FieldReader::new(&input);
        r.get_u8().unwrap();
        assert_eq!(r.finish(), Err(FramingError::TrailingBytes { count: 2 }));
    }

    #[test]
    fn test_writer_chaining() {
        let mut w = FieldWriter::new();
        w.put_u8(1).put_str("x").put_raw(b"zz");
        assert_eq!(w.len(), 1 + 4 + 1 + 2);
        assert_eq!(&w.finish()[..], &[1, 0, 0, 0, 1, b'x', b'z', b'z']);
    }

    #[test]
    fn test_encoded_len_matches_output() {
        let fields = [Field::I16(1), Field::from("abc"), Field::F64(1.0)];
        let expected: usize = fields.iter().map(Field::encoded_len).sum();
        assert_eq!(encode(&fields).len(), expected);
    }
}
