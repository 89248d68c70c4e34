//! Schema-driven payload decoding and encoding.
//!
//! A packet schema is an ordered list of named fields. Some fields refer to a
//! sibling decoded earlier: a blob or array takes its length from it, and a
//! conditional group is present only when it is non-negative.

use super::codec::{DecodeError, EncodeError, Reader, Writer};

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

pub const fn field(name: &'static str, kind: FieldKind) -> Field {
    Field { name, kind }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Bool,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    Long,
    Float,
    Double,
    VarInt,
    /// 16-bit byte length, then UTF-8.
    Utf8,
    /// Varint byte length, then UTF-8.
    VarUtf8,
    /// Raw bytes; the count is the value of an earlier integer field.
    Blob { len: &'static str },
    /// Whatever remains of the payload.
    Rest,
    /// `len` values of one primitive kind.
    Array {
        len: &'static str,
        item: &'static FieldKind,
    },
    /// `len` nested records.
    Records {
        len: &'static str,
        fields: &'static [Field],
    },
    /// `then` follows only when the earlier integer `field` is >= 0.
    IfNonNegative {
        field: &'static str,
        then: &'static [Field],
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Records(Vec<Fields>),
}

/// Decoded (or to-be-encoded) field values, in schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(&'static str, Value)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &'static str, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or replace a value.
    pub fn set(&mut self, name: &'static str, value: Value) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        match self.get(name)? {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&[Value]> {
        match self.get(name)? {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.entries.iter().map(|(n, v)| (*n, v))
    }
}

// ── Decoding ─────────────────────────────────────────────────────────────────

pub fn decode_fields(
    reader: &mut Reader<'_>,
    schema: &[Field],
    out: &mut Fields,
) -> Result<(), DecodeError> {
    for f in schema {
        match f.kind {
            FieldKind::IfNonNegative { field, then } => {
                let control = out.int(field).ok_or_else(|| {
                    DecodeError::Malformed(format!("condition field {field:?} not decoded"))
                })?;
                if control >= 0 {
                    decode_fields(reader, then, out)?;
                }
            }
            FieldKind::Blob { len } => {
                let n = length_of(out, len)?;
                out.set(f.name, Value::Bytes(reader.take(n)?.to_vec()));
            }
            FieldKind::Rest => {
                out.set(f.name, Value::Bytes(reader.read_rest().to_vec()));
            }
            FieldKind::Array { len, item } => {
                let n = length_of(out, len)?;
                let items = (0..n)
                    .map(|_| decode_primitive(reader, item))
                    .collect::<Result<_, _>>()?;
                out.set(f.name, Value::List(items));
            }
            FieldKind::Records { len, fields } => {
                let n = length_of(out, len)?;
                let mut records = Vec::with_capacity(n.min(1024));
                for _ in 0..n {
                    let mut record = Fields::new();
                    decode_fields(reader, fields, &mut record)?;
                    records.push(record);
                }
                out.set(f.name, Value::Records(records));
            }
            ref kind => out.set(f.name, decode_primitive(reader, kind)?),
        }
    }
    Ok(())
}

fn length_of(fields: &Fields, name: &str) -> Result<usize, DecodeError> {
    let n = fields
        .int(name)
        .ok_or_else(|| DecodeError::Malformed(format!("length field {name:?} not decoded")))?;
    usize::try_from(n).map_err(|_| DecodeError::Malformed(format!("negative length {n} in {name:?}")))
}

fn decode_primitive(reader: &mut Reader<'_>, kind: &FieldKind) -> Result<Value, DecodeError> {
    Ok(match kind {
        FieldKind::Bool => Value::Bool(reader.read_bool()?),
        FieldKind::Byte => Value::Int(reader.read_i8()? as i64),
        FieldKind::UByte => Value::Int(reader.read_u8()? as i64),
        FieldKind::Short => Value::Int(reader.read_i16()? as i64),
        FieldKind::UShort => Value::Int(reader.read_u16()? as i64),
        FieldKind::Int => Value::Int(reader.read_i32()? as i64),
        FieldKind::Long => Value::Int(reader.read_i64()?),
        FieldKind::Float => Value::Float(reader.read_f32()? as f64),
        FieldKind::Double => Value::Float(reader.read_f64()?),
        FieldKind::VarInt => Value::Int(reader.read_varint()? as i64),
        FieldKind::Utf8 => Value::Str(reader.read_utf8()?),
        FieldKind::VarUtf8 => Value::Str(reader.read_var_utf8()?),
        other => {
            return Err(DecodeError::Malformed(format!(
                "{other:?} cannot be an array item"
            )));
        }
    })
}

// ── Encoding ─────────────────────────────────────────────────────────────────

pub fn encode_fields(writer: &mut Writer, schema: &[Field], values: &Fields) -> Result<(), EncodeError> {
    for f in schema {
        match f.kind {
            FieldKind::IfNonNegative { field, then } => {
                let control = values.int(field).ok_or(EncodeError::MissingField(field))?;
                if control >= 0 {
                    encode_fields(writer, then, values)?;
                }
            }
            FieldKind::Blob { len } => {
                let bytes = require(values, f.name)?;
                let Value::Bytes(bytes) = bytes else {
                    return Err(mismatch(f.name, "bytes"));
                };
                check_len(values, len, f.name, bytes.len())?;
                writer.write_bytes(bytes);
            }
            FieldKind::Rest => match require(values, f.name)? {
                Value::Bytes(bytes) => writer.write_bytes(bytes),
                _ => return Err(mismatch(f.name, "bytes")),
            },
            FieldKind::Array { len, item } => {
                let Value::List(items) = require(values, f.name)? else {
                    return Err(mismatch(f.name, "a list"));
                };
                check_len(values, len, f.name, items.len())?;
                for value in items {
                    encode_primitive(writer, f.name, item, value)?;
                }
            }
            FieldKind::Records { len, fields } => {
                let Value::Records(records) = require(values, f.name)? else {
                    return Err(mismatch(f.name, "records"));
                };
                check_len(values, len, f.name, records.len())?;
                for record in records {
                    encode_fields(writer, fields, record)?;
                }
            }
            ref kind => encode_primitive(writer, f.name, kind, require(values, f.name)?)?,
        }
    }
    Ok(())
}

fn require<'v>(values: &'v Fields, name: &'static str) -> Result<&'v Value, EncodeError> {
    values.get(name).ok_or(EncodeError::MissingField(name))
}

fn mismatch(field: &'static str, expected: &'static str) -> EncodeError {
    EncodeError::TypeMismatch { field, expected }
}

fn check_len(values: &Fields, len_field: &'static str, field: &'static str, actual: usize) -> Result<(), EncodeError> {
    let declared = values.int(len_field).ok_or(EncodeError::MissingField(len_field))?;
    if declared < 0 || declared as usize != actual {
        return Err(EncodeError::LengthMismatch {
            field,
            expected: declared.max(0) as usize,
            actual,
        });
    }
    Ok(())
}

fn int_in<T: TryFrom<i64>>(field: &'static str, value: &Value) -> Result<T, EncodeError> {
    let Value::Int(v) = value else {
        return Err(mismatch(field, "an integer"));
    };
    T::try_from(*v).map_err(|_| EncodeError::OutOfRange { field, value: *v })
}

fn encode_primitive(
    writer: &mut Writer,
    name: &'static str,
    kind: &FieldKind,
    value: &Value,
) -> Result<(), EncodeError> {
    match kind {
        FieldKind::Bool => match value {
            Value::Bool(b) => writer.write_bool(*b),
            _ => return Err(mismatch(name, "a bool")),
        },
        FieldKind::Byte => writer.write_i8(int_in(name, value)?),
        FieldKind::UByte => writer.write_u8(int_in(name, value)?),
        FieldKind::Short => writer.write_i16(int_in(name, value)?),
        FieldKind::UShort => writer.write_u16(int_in(name, value)?),
        FieldKind::Int => writer.write_i32(int_in(name, value)?),
        FieldKind::Long => writer.write_i64(int_in(name, value)?),
        FieldKind::VarInt => writer.write_varint(int_in(name, value)?),
        FieldKind::Float => match value {
            Value::Float(v) => writer.write_f32(*v as f32),
            _ => return Err(mismatch(name, "a float")),
        },
        FieldKind::Double => match value {
            Value::Float(v) => writer.write_f64(*v),
            _ => return Err(mismatch(name, "a float")),
        },
        FieldKind::Utf8 => match value {
            Value::Str(s) => writer.write_utf8(s)?,
            _ => return Err(mismatch(name, "a string")),
        },
        FieldKind::VarUtf8 => match value {
            Value::Str(s) => writer.write_var_utf8(s)?,
            _ => return Err(mismatch(name, "a string")),
        },
        _ => return Err(mismatch(name, "a primitive kind")),
    }
    Ok(())
}
