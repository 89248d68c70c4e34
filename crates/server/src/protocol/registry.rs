//! Packet catalog: id → schema, per direction.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::schema::{field, Field, FieldKind::*};

#[derive(Debug)]
pub struct PacketSchema {
    pub id: u32,
    pub name: &'static str,
    pub fields: &'static [Field],
}

pub struct Registry {
    direction: &'static str,
    packets: HashMap<u32, &'static PacketSchema>,
}

impl Registry {
    pub fn new(direction: &'static str, schemas: &'static [PacketSchema]) -> Self {
        Self {
            direction,
            packets: schemas.iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn get(&self, id: u32) -> Option<&'static PacketSchema> {
        self.packets.get(&id).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&'static PacketSchema> {
        self.packets.values().find(|s| s.name == name).copied()
    }

    pub fn direction(&self) -> &'static str {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Packets a client may send.
pub static SERVERBOUND: LazyLock<Registry> =
    LazyLock::new(|| Registry::new("serverbound", SERVERBOUND_PACKETS));

/// Packets the server may send.
pub static CLIENTBOUND: LazyLock<Registry> =
    LazyLock::new(|| Registry::new("clientbound", CLIENTBOUND_PACKETS));

// ── Packet ids ───────────────────────────────────────────────────────────────

pub mod id {
    pub const KEEP_ALIVE: u32 = 0x00;
    pub const LOGIN: u32 = 0x01;
    pub const HANDSHAKE: u32 = 0x02;
    pub const CHAT: u32 = 0x03;
    pub const TIME_UPDATE: u32 = 0x04;
    pub const SPAWN_POSITION: u32 = 0x06;
    pub const USE_ENTITY: u32 = 0x07;
    pub const RESPAWN: u32 = 0x09;
    pub const PLAYER: u32 = 0x0A;
    pub const PLAYER_POSITION: u32 = 0x0B;
    pub const PLAYER_LOOK: u32 = 0x0C;
    pub const PLAYER_POSITION_LOOK: u32 = 0x0D;
    pub const DIGGING: u32 = 0x0E;
    pub const BLOCK_PLACEMENT: u32 = 0x0F;
    pub const HOLDING_CHANGE: u32 = 0x10;
    pub const ANIMATION: u32 = 0x12;
    pub const ENTITY_ACTION: u32 = 0x13;
    pub const PRE_CHUNK: u32 = 0x32;
    pub const MAP_CHUNK: u32 = 0x33;
    pub const MULTI_BLOCK_CHANGE: u32 = 0x34;
    pub const BLOCK_CHANGE: u32 = 0x35;
    pub const CLOSE_WINDOW: u32 = 0x65;
    pub const WINDOW_CLICK: u32 = 0x66;
    pub const SET_SLOT: u32 = 0x67;
    pub const TRANSACTION: u32 = 0x6A;
    pub const UPDATE_SIGN: u32 = 0x82;
    pub const DISCONNECT: u32 = 0xFF;
}

// ── Shared field groups ──────────────────────────────────────────────────────

/// Item count and damage, present when the item id is not -1.
const ITEM_TAIL: &[Field] = &[field("count", Byte), field("damage", Short)];

const KEEP_ALIVE: PacketSchema = PacketSchema {
    id: id::KEEP_ALIVE,
    name: "keep-alive",
    fields: &[],
};

const CHAT: PacketSchema = PacketSchema {
    id: id::CHAT,
    name: "chat",
    fields: &[field("message", Utf8)],
};

const RESPAWN: PacketSchema = PacketSchema {
    id: id::RESPAWN,
    name: "respawn",
    fields: &[field("dimension", Byte)],
};

const ANIMATION: PacketSchema = PacketSchema {
    id: id::ANIMATION,
    name: "animation",
    fields: &[field("entity", Int), field("animation", Byte)],
};

const TRANSACTION: PacketSchema = PacketSchema {
    id: id::TRANSACTION,
    name: "transaction",
    fields: &[field("window", Byte), field("action", Short), field("accepted", Bool)],
};

const DISCONNECT: PacketSchema = PacketSchema {
    id: id::DISCONNECT,
    name: "disconnect",
    fields: &[field("reason", Utf8)],
};

// ── Serverbound ──────────────────────────────────────────────────────────────

static SERVERBOUND_PACKETS: &[PacketSchema] = &[
    KEEP_ALIVE,
    PacketSchema {
        id: id::LOGIN,
        name: "login",
        fields: &[
            field("protocol", Int),
            field("username", Utf8),
            field("seed", Long),
            field("dimension", Byte),
        ],
    },
    PacketSchema {
        id: id::HANDSHAKE,
        name: "handshake",
        fields: &[field("username", Utf8)],
    },
    CHAT,
    PacketSchema {
        id: id::USE_ENTITY,
        name: "use-entity",
        fields: &[field("user", Int), field("target", Int), field("left_click", Bool)],
    },
    RESPAWN,
    PacketSchema {
        id: id::PLAYER,
        name: "player",
        fields: &[field("grounded", Bool)],
    },
    PacketSchema {
        id: id::PLAYER_POSITION,
        name: "player-position",
        fields: &[
            field("x", Double),
            field("y", Double),
            field("stance", Double),
            field("z", Double),
            field("grounded", Bool),
        ],
    },
    PacketSchema {
        id: id::PLAYER_LOOK,
        name: "player-look",
        fields: &[field("yaw", Float), field("pitch", Float), field("grounded", Bool)],
    },
    PacketSchema {
        id: id::PLAYER_POSITION_LOOK,
        name: "player-position-look",
        fields: &[
            field("x", Double),
            field("y", Double),
            field("stance", Double),
            field("z", Double),
            field("yaw", Float),
            field("pitch", Float),
            field("grounded", Bool),
        ],
    },
    PacketSchema {
        id: id::DIGGING,
        name: "digging",
        fields: &[
            field("status", Byte),
            field("x", Int),
            field("y", Byte),
            field("z", Int),
            field("face", Byte),
        ],
    },
    PacketSchema {
        id: id::BLOCK_PLACEMENT,
        name: "block-placement",
        fields: &[
            field("x", Int),
            field("y", Byte),
            field("z", Int),
            field("face", Byte),
            field("item", Short),
            field("tail", IfNonNegative { field: "item", then: ITEM_TAIL }),
        ],
    },
    PacketSchema {
        id: id::HOLDING_CHANGE,
        name: "holding-change",
        fields: &[field("slot", Short)],
    },
    ANIMATION,
    PacketSchema {
        id: id::ENTITY_ACTION,
        name: "entity-action",
        fields: &[field("entity", Int), field("action", Byte)],
    },
    PacketSchema {
        id: id::CLOSE_WINDOW,
        name: "close-window",
        fields: &[field("window", Byte)],
    },
    PacketSchema {
        id: id::WINDOW_CLICK,
        name: "window-click",
        fields: &[
            field("window", Byte),
            field("slot", Short),
            field("right_click", Bool),
            field("action", Short),
            field("item", Short),
            field("tail", IfNonNegative { field: "item", then: ITEM_TAIL }),
        ],
    },
    TRANSACTION,
    PacketSchema {
        id: id::UPDATE_SIGN,
        name: "update-sign",
        fields: &[
            field("x", Int),
            field("y", Short),
            field("z", Int),
            field("line1", Utf8),
            field("line2", Utf8),
            field("line3", Utf8),
            field("line4", Utf8),
        ],
    },
    DISCONNECT,
];

// ── Clientbound ──────────────────────────────────────────────────────────────

static CLIENTBOUND_PACKETS: &[PacketSchema] = &[
    KEEP_ALIVE,
    PacketSchema {
        id: id::LOGIN,
        name: "login",
        fields: &[
            field("entity", Int),
            field("unused", Utf8),
            field("seed", Long),
            field("dimension", Byte),
        ],
    },
    PacketSchema {
        id: id::HANDSHAKE,
        name: "handshake",
        fields: &[field("challenge", Utf8)],
    },
    CHAT,
    PacketSchema {
        id: id::TIME_UPDATE,
        name: "time-update",
        fields: &[field("time", Long)],
    },
    PacketSchema {
        id: id::SPAWN_POSITION,
        name: "spawn-position",
        fields: &[field("x", Int), field("y", Int), field("z", Int)],
    },
    RESPAWN,
    PacketSchema {
        id: id::PLAYER_POSITION_LOOK,
        name: "player-position-look",
        fields: &[
            field("x", Double),
            field("stance", Double),
            field("y", Double),
            field("z", Double),
            field("yaw", Float),
            field("pitch", Float),
            field("grounded", Bool),
        ],
    },
    ANIMATION,
    PacketSchema {
        id: id::PRE_CHUNK,
        name: "pre-chunk",
        fields: &[field("x", Int), field("z", Int), field("enable", Bool)],
    },
    PacketSchema {
        id: id::MAP_CHUNK,
        name: "map-chunk",
        fields: &[
            field("x", Int),
            field("y", Short),
            field("z", Int),
            field("size_x", Byte),
            field("size_y", Byte),
            field("size_z", Byte),
            field("length", Int),
            field("data", Blob { len: "length" }),
        ],
    },
    PacketSchema {
        id: id::MULTI_BLOCK_CHANGE,
        name: "multi-block-change",
        fields: &[
            field("x", Int),
            field("z", Int),
            field("count", Short),
            field("coords", Array { len: "count", item: &Short }),
            field("types", Array { len: "count", item: &UByte }),
            field("metadata", Array { len: "count", item: &Byte }),
        ],
    },
    PacketSchema {
        id: id::BLOCK_CHANGE,
        name: "block-change",
        fields: &[
            field("x", Int),
            field("y", Byte),
            field("z", Int),
            field("type", UByte),
            field("metadata", Byte),
        ],
    },
    PacketSchema {
        id: id::SET_SLOT,
        name: "set-slot",
        fields: &[
            field("window", Byte),
            field("slot", Short),
            field("item", Short),
            field("tail", IfNonNegative { field: "item", then: ITEM_TAIL }),
        ],
    },
    TRANSACTION,
    DISCONNECT,
];
