//! Typed packets, lowered to and raised from schema [`Fields`].

use std::io::{self, Write};

use bravo_engine::world::chunk::{BlockChange, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH, ChunkStore, DamageReport};
use bravo_engine::world::position::{BlockPos, ChunkPos};
use bravo_engine::world::BlockId;
use flate2::Compression;
use flate2::write::ZlibEncoder;

use super::framing::{Decoded, PacketCodec, ProtocolError};
use super::registry::id;
use super::schema::{Fields, Value};

/// Protocol version spoken by this server.
pub const PROTOCOL_VERSION: i32 = 10;

/// A stack of items as it appears on the wire. An empty slot is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemStack {
    pub id: i16,
    pub count: i8,
    pub damage: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Serverbound {
    KeepAlive,
    Login { protocol: i32, username: String },
    Handshake { username: String },
    Chat { message: String },
    Respawn,
    Grounded { grounded: bool },
    Position { x: f64, y: f64, stance: f64, z: f64, grounded: bool },
    Look { yaw: f32, pitch: f32, grounded: bool },
    PositionLook {
        x: f64,
        y: f64,
        stance: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        grounded: bool,
    },
    Digging { status: i8, pos: BlockPos, face: i8 },
    Placement { pos: BlockPos, face: i8, held: Option<ItemStack> },
    HoldingChange { slot: i16 },
    WindowClick {
        window: i8,
        slot: i16,
        right_click: bool,
        action: i16,
        item: Option<ItemStack>,
    },
    Transaction { window: i8, action: i16, accepted: bool },
    UpdateSign { pos: BlockPos, lines: [String; 4] },
    Disconnect { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clientbound {
    KeepAlive,
    LoginResponse { entity_id: i32, seed: i64, dimension: i8 },
    Handshake { challenge: String },
    Chat { message: String },
    TimeUpdate { time: i64 },
    SpawnPosition { pos: BlockPos },
    PositionLook {
        x: f64,
        stance: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        grounded: bool,
    },
    PreChunk { pos: ChunkPos, enable: bool },
    /// `data` is the zlib-compressed chunk arrays.
    MapChunk { pos: ChunkPos, data: Vec<u8> },
    MultiBlockChange { pos: ChunkPos, changes: Vec<BlockChange> },
    BlockChange { pos: BlockPos, block: BlockId, metadata: u8 },
    SetSlot { window: i8, slot: i16, item: Option<ItemStack> },
    /// Confirms or rejects an inventory action by its number.
    Transaction { window: i8, action: i16, accepted: bool },
    Disconnect { reason: String },
}

// ── Field access ─────────────────────────────────────────────────────────────

fn missing(d: &Decoded, name: &str) -> ProtocolError {
    ProtocolError::Malformed {
        id: d.id,
        reason: format!("field {name:?} missing or mistyped"),
    }
}

fn int<T: TryFrom<i64>>(d: &Decoded, name: &str) -> Result<T, ProtocolError> {
    let raw = d.fields.int(name).ok_or_else(|| missing(d, name))?;
    T::try_from(raw).map_err(|_| ProtocolError::Malformed {
        id: d.id,
        reason: format!("field {name:?} value {raw} out of range"),
    })
}

fn float(d: &Decoded, name: &str) -> Result<f64, ProtocolError> {
    d.fields.float(name).ok_or_else(|| missing(d, name))
}

fn boolean(d: &Decoded, name: &str) -> Result<bool, ProtocolError> {
    d.fields.bool(name).ok_or_else(|| missing(d, name))
}

fn string(d: &Decoded, name: &str) -> Result<String, ProtocolError> {
    d.fields
        .str(name)
        .map(str::to_owned)
        .ok_or_else(|| missing(d, name))
}

fn item(d: &Decoded) -> Result<Option<ItemStack>, ProtocolError> {
    let id: i16 = int(d, "item")?;
    if id < 0 {
        return Ok(None);
    }
    Ok(Some(ItemStack {
        id,
        count: int(d, "count")?,
        damage: int(d, "damage")?,
    }))
}

fn block_pos(d: &Decoded) -> Result<BlockPos, ProtocolError> {
    Ok(BlockPos::new(int(d, "x")?, int(d, "y")?, int(d, "z")?))
}

fn put_item(fields: Fields, item: Option<ItemStack>) -> Fields {
    match item {
        Some(stack) => fields
            .with("item", Value::Int(stack.id as i64))
            .with("count", Value::Int(stack.count as i64))
            .with("damage", Value::Int(stack.damage as i64)),
        None => fields.with("item", Value::Int(-1)),
    }
}

fn transaction_fields(fields: Fields, window: i8, action: i16, accepted: bool) -> Fields {
    fields
        .with("window", i(window))
        .with("action", i(action))
        .with("accepted", Value::Bool(accepted))
}

fn i(v: impl Into<i64>) -> Value {
    Value::Int(v.into())
}

fn f(v: impl Into<f64>) -> Value {
    Value::Float(v.into())
}

// ── Serverbound ──────────────────────────────────────────────────────────────

impl Serverbound {
    /// Raise a decoded packet. Packets that parse but carry nothing the
    /// server acts on yield `Ok(None)`.
    pub fn from_decoded(d: &Decoded) -> Result<Option<Self>, ProtocolError> {
        let packet = match d.id {
            id::KEEP_ALIVE => Self::KeepAlive,
            id::LOGIN => Self::Login {
                protocol: int(d, "protocol")?,
                username: string(d, "username")?,
            },
            id::HANDSHAKE => Self::Handshake {
                username: string(d, "username")?,
            },
            id::CHAT => Self::Chat {
                message: string(d, "message")?,
            },
            id::RESPAWN => Self::Respawn,
            id::PLAYER => Self::Grounded {
                grounded: boolean(d, "grounded")?,
            },
            id::PLAYER_POSITION => Self::Position {
                x: float(d, "x")?,
                y: float(d, "y")?,
                stance: float(d, "stance")?,
                z: float(d, "z")?,
                grounded: boolean(d, "grounded")?,
            },
            id::PLAYER_LOOK => Self::Look {
                yaw: float(d, "yaw")? as f32,
                pitch: float(d, "pitch")? as f32,
                grounded: boolean(d, "grounded")?,
            },
            id::PLAYER_POSITION_LOOK => Self::PositionLook {
                x: float(d, "x")?,
                y: float(d, "y")?,
                stance: float(d, "stance")?,
                z: float(d, "z")?,
                yaw: float(d, "yaw")? as f32,
                pitch: float(d, "pitch")? as f32,
                grounded: boolean(d, "grounded")?,
            },
            id::DIGGING => Self::Digging {
                status: int(d, "status")?,
                pos: block_pos(d)?,
                face: int(d, "face")?,
            },
            id::BLOCK_PLACEMENT => Self::Placement {
                pos: block_pos(d)?,
                face: int(d, "face")?,
                held: item(d)?,
            },
            id::HOLDING_CHANGE => Self::HoldingChange {
                slot: int(d, "slot")?,
            },
            id::WINDOW_CLICK => Self::WindowClick {
                window: int(d, "window")?,
                slot: int(d, "slot")?,
                right_click: boolean(d, "right_click")?,
                action: int(d, "action")?,
                item: item(d)?,
            },
            id::TRANSACTION => Self::Transaction {
                window: int(d, "window")?,
                action: int(d, "action")?,
                accepted: boolean(d, "accepted")?,
            },
            id::UPDATE_SIGN => Self::UpdateSign {
                pos: block_pos(d)?,
                lines: [
                    string(d, "line1")?,
                    string(d, "line2")?,
                    string(d, "line3")?,
                    string(d, "line4")?,
                ],
            },
            id::DISCONNECT => Self::Disconnect {
                reason: string(d, "reason")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(packet))
    }

    pub fn to_fields(&self) -> (u32, Fields) {
        let fields = Fields::new();
        match self {
            Self::KeepAlive => (id::KEEP_ALIVE, fields),
            Self::Login { protocol, username } => (
                id::LOGIN,
                fields
                    .with("protocol", i(*protocol))
                    .with("username", Value::Str(username.clone()))
                    .with("seed", i(0))
                    .with("dimension", i(0)),
            ),
            Self::Handshake { username } => {
                (id::HANDSHAKE, fields.with("username", Value::Str(username.clone())))
            }
            Self::Chat { message } => (id::CHAT, fields.with("message", Value::Str(message.clone()))),
            Self::Respawn => (id::RESPAWN, fields.with("dimension", i(0))),
            Self::Grounded { grounded } => (id::PLAYER, fields.with("grounded", Value::Bool(*grounded))),
            Self::Position { x, y, stance, z, grounded } => (
                id::PLAYER_POSITION,
                fields
                    .with("x", f(*x))
                    .with("y", f(*y))
                    .with("stance", f(*stance))
                    .with("z", f(*z))
                    .with("grounded", Value::Bool(*grounded)),
            ),
            Self::Look { yaw, pitch, grounded } => (
                id::PLAYER_LOOK,
                fields
                    .with("yaw", f(*yaw))
                    .with("pitch", f(*pitch))
                    .with("grounded", Value::Bool(*grounded)),
            ),
            Self::PositionLook { x, y, stance, z, yaw, pitch, grounded } => (
                id::PLAYER_POSITION_LOOK,
                fields
                    .with("x", f(*x))
                    .with("y", f(*y))
                    .with("stance", f(*stance))
                    .with("z", f(*z))
                    .with("yaw", f(*yaw))
                    .with("pitch", f(*pitch))
                    .with("grounded", Value::Bool(*grounded)),
            ),
            Self::Digging { status, pos, face } => (
                id::DIGGING,
                fields
                    .with("status", i(*status))
                    .with("x", i(pos.x))
                    .with("y", i(pos.y))
                    .with("z", i(pos.z))
                    .with("face", i(*face)),
            ),
            Self::Placement { pos, face, held } => (
                id::BLOCK_PLACEMENT,
                put_item(
                    fields
                        .with("x", i(pos.x))
                        .with("y", i(pos.y))
                        .with("z", i(pos.z))
                        .with("face", i(*face)),
                    *held,
                ),
            ),
            Self::HoldingChange { slot } => (id::HOLDING_CHANGE, fields.with("slot", i(*slot))),
            Self::WindowClick { window, slot, right_click, action, item } => (
                id::WINDOW_CLICK,
                put_item(
                    fields
                        .with("window", i(*window))
                        .with("slot", i(*slot))
                        .with("right_click", Value::Bool(*right_click))
                        .with("action", i(*action)),
                    *item,
                ),
            ),
            Self::Transaction { window, action, accepted } => {
                (id::TRANSACTION, transaction_fields(fields, *window, *action, *accepted))
            }
            Self::UpdateSign { pos, lines } => {
                let [line1, line2, line3, line4] = lines;
                (
                    id::UPDATE_SIGN,
                    fields
                        .with("x", i(pos.x))
                        .with("y", i(pos.y))
                        .with("z", i(pos.z))
                        .with("line1", Value::Str(line1.clone()))
                        .with("line2", Value::Str(line2.clone()))
                        .with("line3", Value::Str(line3.clone()))
                        .with("line4", Value::Str(line4.clone())),
                )
            }
            Self::Disconnect { reason } => {
                (id::DISCONNECT, fields.with("reason", Value::Str(reason.clone())))
            }
        }
    }

    pub fn encode(&self, codec: &PacketCodec) -> Result<Vec<u8>, ProtocolError> {
        let (id, fields) = self.to_fields();
        codec.build_packet(id, &fields)
    }
}

// ── Clientbound ──────────────────────────────────────────────────────────────

impl Clientbound {
    pub fn to_fields(&self) -> (u32, Fields) {
        let fields = Fields::new();
        match self {
            Self::KeepAlive => (id::KEEP_ALIVE, fields),
            Self::LoginResponse { entity_id, seed, dimension } => (
                id::LOGIN,
                fields
                    .with("entity", i(*entity_id))
                    .with("unused", Value::Str(String::new()))
                    .with("seed", i(*seed))
                    .with("dimension", i(*dimension)),
            ),
            Self::Handshake { challenge } => {
                (id::HANDSHAKE, fields.with("challenge", Value::Str(challenge.clone())))
            }
            Self::Chat { message } => (id::CHAT, fields.with("message", Value::Str(message.clone()))),
            Self::TimeUpdate { time } => (id::TIME_UPDATE, fields.with("time", i(*time))),
            Self::SpawnPosition { pos } => (
                id::SPAWN_POSITION,
                fields.with("x", i(pos.x)).with("y", i(pos.y)).with("z", i(pos.z)),
            ),
            Self::PositionLook { x, stance, y, z, yaw, pitch, grounded } => (
                id::PLAYER_POSITION_LOOK,
                fields
                    .with("x", f(*x))
                    .with("stance", f(*stance))
                    .with("y", f(*y))
                    .with("z", f(*z))
                    .with("yaw", f(*yaw))
                    .with("pitch", f(*pitch))
                    .with("grounded", Value::Bool(*grounded)),
            ),
            Self::PreChunk { pos, enable } => (
                id::PRE_CHUNK,
                fields
                    .with("x", i(pos.x))
                    .with("z", i(pos.z))
                    .with("enable", Value::Bool(*enable)),
            ),
            Self::MapChunk { pos, data } => {
                let origin = pos.block_origin(0);
                (
                    id::MAP_CHUNK,
                    fields
                        .with("x", i(origin.x))
                        .with("y", i(0))
                        .with("z", i(origin.z))
                        .with("size_x", i(CHUNK_WIDTH as i64 - 1))
                        .with("size_y", i(CHUNK_HEIGHT as i64 - 1))
                        .with("size_z", i(CHUNK_DEPTH as i64 - 1))
                        .with("length", i(data.len() as i64))
                        .with("data", Value::Bytes(data.clone())),
                )
            }
            Self::MultiBlockChange { pos, changes } => (
                id::MULTI_BLOCK_CHANGE,
                fields
                    .with("x", i(pos.x))
                    .with("z", i(pos.z))
                    .with("count", i(changes.len() as i64))
                    .with(
                        "coords",
                        Value::List(changes.iter().map(|c| i(c.pos.packed() as i16)).collect()),
                    )
                    .with(
                        "types",
                        Value::List(changes.iter().map(|c| i(c.block.0)).collect()),
                    )
                    .with(
                        "metadata",
                        Value::List(changes.iter().map(|c| i(c.metadata as i8)).collect()),
                    ),
            ),
            Self::BlockChange { pos, block, metadata } => (
                id::BLOCK_CHANGE,
                fields
                    .with("x", i(pos.x))
                    .with("y", i(pos.y))
                    .with("z", i(pos.z))
                    .with("type", i(block.0))
                    .with("metadata", i(*metadata as i8)),
            ),
            Self::SetSlot { window, slot, item } => (
                id::SET_SLOT,
                put_item(fields.with("window", i(*window)).with("slot", i(*slot)), *item),
            ),
            Self::Transaction { window, action, accepted } => {
                (id::TRANSACTION, transaction_fields(fields, *window, *action, *accepted))
            }
            Self::Disconnect { reason } => {
                (id::DISCONNECT, fields.with("reason", Value::Str(reason.clone())))
            }
        }
    }

    pub fn encode(&self, codec: &PacketCodec) -> Result<Vec<u8>, ProtocolError> {
        let (id, fields) = self.to_fields();
        codec.build_packet(id, &fields)
    }

    /// Raise a clientbound packet, as a client would. Used by test clients
    /// and tools.
    pub fn from_decoded(d: &Decoded) -> Result<Option<Self>, ProtocolError> {
        let packet = match d.id {
            id::KEEP_ALIVE => Self::KeepAlive,
            id::LOGIN => Self::LoginResponse {
                entity_id: int(d, "entity")?,
                seed: int(d, "seed")?,
                dimension: int(d, "dimension")?,
            },
            id::HANDSHAKE => Self::Handshake {
                challenge: string(d, "challenge")?,
            },
            id::CHAT => Self::Chat {
                message: string(d, "message")?,
            },
            id::TIME_UPDATE => Self::TimeUpdate { time: int(d, "time")? },
            id::SPAWN_POSITION => Self::SpawnPosition { pos: block_pos(d)? },
            id::PLAYER_POSITION_LOOK => Self::PositionLook {
                x: float(d, "x")?,
                stance: float(d, "stance")?,
                y: float(d, "y")?,
                z: float(d, "z")?,
                yaw: float(d, "yaw")? as f32,
                pitch: float(d, "pitch")? as f32,
                grounded: boolean(d, "grounded")?,
            },
            id::PRE_CHUNK => Self::PreChunk {
                pos: ChunkPos::new(int(d, "x")?, int(d, "z")?),
                enable: boolean(d, "enable")?,
            },
            id::MAP_CHUNK => {
                let origin = BlockPos::new(int(d, "x")?, 0, int(d, "z")?);
                Self::MapChunk {
                    pos: origin.chunk(),
                    data: d.fields.bytes("data").ok_or_else(|| missing(d, "data"))?.to_vec(),
                }
            }
            id::BLOCK_CHANGE => Self::BlockChange {
                pos: block_pos(d)?,
                block: BlockId(int(d, "type")?),
                metadata: int::<i8>(d, "metadata")? as u8,
            },
            id::SET_SLOT => Self::SetSlot {
                window: int(d, "window")?,
                slot: int(d, "slot")?,
                item: item(d)?,
            },
            id::TRANSACTION => Self::Transaction {
                window: int(d, "window")?,
                action: int(d, "action")?,
                accepted: boolean(d, "accepted")?,
            },
            id::DISCONNECT => Self::Disconnect {
                reason: string(d, "reason")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(packet))
    }
}

// ── Chunk serialization ──────────────────────────────────────────────────────

/// Uncompressed chunk arrays, taken while the chunk lock is held.
pub struct ChunkSnapshot {
    pub pos: ChunkPos,
    raw: Vec<u8>,
}

impl ChunkSnapshot {
    /// Blocks, then metadata, block light and sky light.
    pub fn take(chunk: &ChunkStore) -> Self {
        let mut raw = Vec::with_capacity(chunk.blocks().len() * 5 / 2);
        raw.extend_from_slice(chunk.blocks());
        raw.extend_from_slice(chunk.metadata().as_packed());
        raw.extend_from_slice(chunk.block_light().as_packed());
        raw.extend_from_slice(chunk.sky_light().as_packed());
        Self {
            pos: chunk.pos(),
            raw,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Compress into a map-chunk packet.
    pub fn into_packet(self) -> io::Result<Clientbound> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.raw)?;
        Ok(Clientbound::MapChunk {
            pos: self.pos,
            data: encoder.finish()?,
        })
    }
}

/// What viewers of a chunk must receive for its pending damage. A full
/// re-send comes back as a snapshot so compression can happen off the lock.
pub enum DamageUpdate {
    Packet(Clientbound),
    Resend(ChunkSnapshot),
}

pub fn damage_update(chunk: &ChunkStore) -> Option<DamageUpdate> {
    let pos = chunk.pos();
    match chunk.build_damage_report() {
        DamageReport::Clean => None,
        DamageReport::Single(change) => Some(DamageUpdate::Packet(Clientbound::BlockChange {
            pos: change.pos.world(pos),
            block: change.block,
            metadata: change.metadata,
        })),
        DamageReport::Batch(changes) => Some(DamageUpdate::Packet(Clientbound::MultiBlockChange {
            pos,
            changes,
        })),
        DamageReport::Full => Some(DamageUpdate::Resend(ChunkSnapshot::take(chunk))),
    }
}
