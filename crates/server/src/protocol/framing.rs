//! Packet framing over an undelimited byte stream.
//!
//! Two framings are supported. `Legacy` is `[u8 id][fields]`, where the packet
//! boundary is known only by decoding every field. `LengthPrefixed` is
//! `[varint length][varint id][fields]`, where the length covers id and fields.
//!
//! A packet cut off at the end of a buffer is never an error: the parser
//! reports how many more bytes it wants and the caller keeps the tail.

use thiserror::Error;

use super::codec::{DecodeError, EncodeError, Reader, Writer, varint_len};
use super::registry::Registry;
use super::schema::{Fields, decode_fields, encode_fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Legacy,
    LengthPrefixed,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// Not an error from the peer: read more and retry.
    #[error("need {0} more bytes")]
    NeedMoreBytes(usize),
    #[error("unknown packet id {id:#04x}")]
    UnknownPacket { id: u32 },
    #[error("malformed packet {id:#04x}: {reason}")]
    Malformed { id: u32, reason: String },
    #[error(transparent)]
    Encoding(#[from] EncodeError),
}

/// One packet taken off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub id: u32,
    pub name: &'static str,
    pub fields: Fields,
}

#[derive(Clone, Copy)]
pub struct PacketCodec {
    registry: &'static Registry,
    framing: Framing,
}

impl PacketCodec {
    pub fn new(registry: &'static Registry, framing: Framing) -> Self {
        Self { registry, framing }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Decode the packet starting at `offset`. Returns it with the number of
    /// bytes it occupied.
    pub fn parse_packet(&self, buf: &[u8], offset: usize) -> Result<(Decoded, usize), ProtocolError> {
        let buf = buf.get(offset..).unwrap_or_default();
        match self.framing {
            Framing::Legacy => self.parse_legacy(buf),
            Framing::LengthPrefixed => self.parse_length_prefixed(buf),
        }
    }

    fn parse_legacy(&self, buf: &[u8]) -> Result<(Decoded, usize), ProtocolError> {
        let mut reader = Reader::new(buf);
        let id = reader.read_u8().map_err(|_| ProtocolError::NeedMoreBytes(1))? as u32;
        let schema = self
            .registry
            .get(id)
            .ok_or(ProtocolError::UnknownPacket { id })?;

        let mut fields = Fields::new();
        decode_fields(&mut reader, schema.fields, &mut fields).map_err(|e| match e {
            DecodeError::InsufficientData { needed } => ProtocolError::NeedMoreBytes(needed),
            DecodeError::Malformed(reason) => ProtocolError::Malformed { id, reason },
        })?;

        let decoded = Decoded {
            id,
            name: schema.name,
            fields,
        };
        Ok((decoded, reader.position()))
    }

    fn parse_length_prefixed(&self, buf: &[u8]) -> Result<(Decoded, usize), ProtocolError> {
        let mut reader = Reader::new(buf);
        let length = reader.read_varint().map_err(|e| match e {
            DecodeError::InsufficientData { needed } => ProtocolError::NeedMoreBytes(needed),
            DecodeError::Malformed(reason) => ProtocolError::Malformed { id: 0, reason },
        })?;
        let length = usize::try_from(length).map_err(|_| ProtocolError::Malformed {
            id: 0,
            reason: format!("negative packet length {length}"),
        })?;
        let header = reader.position();
        let body = reader.take(length).map_err(|e| match e {
            DecodeError::InsufficientData { needed } => ProtocolError::NeedMoreBytes(needed),
            DecodeError::Malformed(reason) => ProtocolError::Malformed { id: 0, reason },
        })?;

        // The whole body is present, so running short inside it means the
        // declared length was wrong.
        let mut body = Reader::new(body);
        let id = body.read_varint().map_err(|e| ProtocolError::Malformed {
            id: 0,
            reason: e.to_string(),
        })? as u32;
        let schema = self
            .registry
            .get(id)
            .ok_or(ProtocolError::UnknownPacket { id })?;

        let mut fields = Fields::new();
        decode_fields(&mut body, schema.fields, &mut fields).map_err(|e| {
            ProtocolError::Malformed {
                id,
                reason: e.to_string(),
            }
        })?;
        if body.remaining() > 0 {
            return Err(ProtocolError::Malformed {
                id,
                reason: format!("{} trailing bytes", body.remaining()),
            });
        }

        let decoded = Decoded {
            id,
            name: schema.name,
            fields,
        };
        Ok((decoded, header + length))
    }

    /// Decode every complete packet in `buf`. The incomplete tail, if any, is
    /// returned untouched so it can be prepended to the next read.
    pub fn parse_stream(&self, buf: &[u8]) -> Result<(Vec<Decoded>, Vec<u8>), ProtocolError> {
        let mut packets = Vec::new();
        let mut offset = 0;
        while offset < buf.len() {
            match self.parse_packet(buf, offset) {
                Ok((packet, consumed)) => {
                    packets.push(packet);
                    offset += consumed;
                }
                Err(ProtocolError::NeedMoreBytes(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok((packets, buf[offset..].to_vec()))
    }

    /// Serialize a packet. Every field the schema names must be present.
    pub fn build_packet(&self, id: u32, fields: &Fields) -> Result<Vec<u8>, ProtocolError> {
        let schema = self
            .registry
            .get(id)
            .ok_or(ProtocolError::UnknownPacket { id })?;

        let mut payload = Writer::new();
        encode_fields(&mut payload, schema.fields, fields)?;
        let payload = payload.into_inner();

        match self.framing {
            Framing::Legacy => {
                let id = u8::try_from(id).map_err(|_| EncodeError::OutOfRange {
                    field: "id",
                    value: id as i64,
                })?;
                let mut out = Writer::with_capacity(1 + payload.len());
                out.write_u8(id);
                out.write_bytes(&payload);
                Ok(out.into_inner())
            }
            Framing::LengthPrefixed => {
                let body_len = varint_len(id as i32) + payload.len();
                let mut out = Writer::with_capacity(varint_len(body_len as i32) + body_len);
                out.write_varint(body_len as i32);
                out.write_varint(id as i32);
                out.write_bytes(&payload);
                Ok(out.into_inner())
            }
        }
    }
}
