//! Primitive wire types: big-endian integers and floats, length-prefixed
//! strings, varints and raw blobs.
//!
//! Decoding distinguishes "not enough bytes yet" from "these bytes are
//! wrong": the former carries how many more bytes are required.

use thiserror::Error;

/// Longest varint accepted (fits an `i32`).
pub const MAX_VARINT_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("need {needed} more bytes")]
    InsufficientData { needed: usize },
    #[error("malformed data: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("string of {len} bytes exceeds the {max}-byte limit")]
    StringTooLong { len: usize, max: usize },
    #[error("required field {0:?} is missing")]
    MissingField(&'static str),
    #[error("field {field:?} expects {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },
    #[error("field {field:?} has {actual} elements, length field says {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("field {field:?} value {value} does not fit its length prefix")]
    OutOfRange { field: &'static str, value: i64 },
}

// ── Reading ──────────────────────────────────────────────────────────────────

/// Cursor over a borrowed byte buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_be {
    { $($name:ident => $t:ident),* $(,)? } => {
        $(
            pub fn $name(&mut self) -> Result<$t, DecodeError> {
                let bytes = self.take(core::mem::size_of::<$t>())?;
                let mut raw = [0u8; core::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                Ok($t::from_be_bytes(raw))
            }
        )*
    }
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::InsufficientData {
                needed: n - self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    read_be! {
        read_u8 => u8,
        read_i8 => i8,
        read_u16 => u16,
        read_i16 => i16,
        read_i32 => i32,
        read_i64 => i64,
        read_f32 => f32,
        read_f64 => f64,
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// LEB128-style signed 32-bit varint, at most five bytes.
    pub fn read_varint(&mut self) -> Result<i32, DecodeError> {
        let mut value = 0u32;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value as i32);
            }
        }
        Err(DecodeError::Malformed("varint longer than 5 bytes".into()))
    }

    /// String with a 16-bit byte-length prefix.
    pub fn read_utf8(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        self.read_str_body(len)
    }

    /// String with a varint byte-length prefix.
    pub fn read_var_utf8(&mut self) -> Result<String, DecodeError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| DecodeError::Malformed(format!("negative string length {len}")))?;
        self.read_str_body(len)
    }

    fn read_str_body(&mut self, len: usize) -> Result<String, DecodeError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DecodeError::Malformed(format!("invalid UTF-8 string: {e}")))
    }

    /// Everything left in the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

// ── Writing ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

macro_rules! write_be {
    { $($name:ident => $t:ident),* $(,)? } => {
        $(
            pub fn $name(&mut self, value: $t) {
                self.buf.extend_from_slice(&value.to_be_bytes());
            }
        )*
    }
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    write_be! {
        write_u8 => u8,
        write_i8 => i8,
        write_u16 => u16,
        write_i16 => i16,
        write_i32 => i32,
        write_i64 => i64,
        write_f32 => f32,
        write_f64 => f64,
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_varint(&mut self, value: i32) {
        let mut v = value as u32;
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn write_utf8(&mut self, value: &str) -> Result<(), EncodeError> {
        let max = u16::MAX as usize;
        if value.len() > max {
            return Err(EncodeError::StringTooLong {
                len: value.len(),
                max,
            });
        }
        self.write_u16(value.len() as u16);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_var_utf8(&mut self, value: &str) -> Result<(), EncodeError> {
        let max = i32::MAX as usize;
        if value.len() > max {
            return Err(EncodeError::StringTooLong {
                len: value.len(),
                max,
            });
        }
        self.write_varint(value.len() as i32);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Encoded size of a varint.
pub fn varint_len(value: i32) -> usize {
    let mut v = value as u32;
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_buffer_reports_missing_bytes() {
        let mut r = Reader::new(&[0x00, 0x01]);
        assert_eq!(
            r.read_i32(),
            Err(DecodeError::InsufficientData { needed: 2 })
        );
        // A failed read consumes nothing.
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_i16(), Ok(1));
    }

    #[test]
    fn big_endian_layout() {
        let mut w = Writer::new();
        w.write_i32(0x0102_0304);
        w.write_f64(1.5);
        w.write_i16(-2);
        let bytes = w.into_inner();
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[4..12], &1.5f64.to_be_bytes());
        assert_eq!(&bytes[12..], &[0xFF, 0xFE]);
    }

    #[test]
    fn varint_edges() {
        for (value, encoded) in [
            (0, vec![0x00]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (-1, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ] {
            let mut w = Writer::new();
            w.write_varint(value);
            assert_eq!(w.as_bytes(), &encoded[..], "{value}");
            assert_eq!(varint_len(value), encoded.len());
            assert_eq!(Reader::new(&encoded).read_varint(), Ok(value));
        }
        assert_eq!(
            Reader::new(&[0x80, 0x80]).read_varint(),
            Err(DecodeError::InsufficientData { needed: 1 })
        );
        assert!(matches!(
            Reader::new(&[0xFF; 6]).read_varint(),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn utf8_strings_use_byte_length() {
        let mut w = Writer::new();
        w.write_utf8("héllo").unwrap();
        assert_eq!(&w.as_bytes()[..2], &[0, 6]);
        let bytes = w.into_inner();
        assert_eq!(Reader::new(&bytes).read_utf8().unwrap(), "héllo");
        assert_eq!(
            Reader::new(&bytes[..5]).read_utf8(),
            Err(DecodeError::InsufficientData { needed: 3 })
        );
    }

    #[test]
    fn oversized_string_is_an_encoding_error() {
        let long = "x".repeat(70_000);
        assert_eq!(
            Writer::new().write_utf8(&long),
            Err(EncodeError::StringTooLong {
                len: 70_000,
                max: 65_535
            })
        );
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let bytes = [0x00, 0x02, 0xC3, 0x28];
        assert!(matches!(
            Reader::new(&bytes).read_utf8(),
            Err(DecodeError::Malformed(_))
        ));
    }
}
