//! Beta-era wire protocol.

pub mod codec;
pub mod framing;
pub mod packets;
pub mod registry;
pub mod schema;

pub use framing::{Decoded, Framing, PacketCodec, ProtocolError};
pub use packets::{Clientbound, ItemStack, PROTOCOL_VERSION, Serverbound};
pub use registry::{CLIENTBOUND, SERVERBOUND};
pub use schema::{Fields, Value};

/// Codec for reading what clients send.
pub fn serverbound() -> PacketCodec {
    PacketCodec::new(&SERVERBOUND, Framing::Legacy)
}

/// Codec for writing what the server sends.
pub fn clientbound() -> PacketCodec {
    PacketCodec::new(&CLIENTBOUND, Framing::Legacy)
}
