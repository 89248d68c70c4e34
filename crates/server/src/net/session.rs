//! Per-connection player state: authentication stage, location and
//! inventory.

use std::fmt;
use std::io;

use bravo_engine::cache::CacheError;
use bravo_engine::world::block;
use bravo_engine::world::chunk::{CHUNK_HEIGHT, ChunkStore};
use bravo_engine::world::document::{InventoryItem, PlayerDocument};
use bravo_engine::world::position::{BlockPos, ChunkPos};
use thiserror::Error;

use super::outbound::SendError;
use crate::protocol::{ItemStack, ProtocolError};

/// Lowest and highest eye height above the feet accepted from a save.
pub const STANCE_MIN: f64 = 0.1;
pub const STANCE_MAX: f64 = 1.65;
/// Eye height used when putting a player somewhere new.
pub const STANCE_DEFAULT: f64 = 1.62;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("{packet} is not allowed while {stage}")]
    OutOfOrder {
        packet: &'static str,
        stage: AuthStage,
    },
    #[error("cannot move from {from} to {to}")]
    Backwards { from: AuthStage, to: AuthStage },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<SendError> for SessionError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Io(e) => Self::Io(e),
            SendError::Protocol(e) => Self::Protocol(e),
        }
    }
}

// ── Stage ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuthStage {
    Unauthenticated,
    Challenged,
    Authenticated,
    /// Spawned with a valid position; world packets are honoured.
    Located,
}

impl AuthStage {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Unauthenticated => Some(Self::Challenged),
            Self::Challenged => Some(Self::Authenticated),
            Self::Authenticated => Some(Self::Located),
            Self::Located => None,
        }
    }
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Challenged => "challenged",
            Self::Authenticated => "authenticated",
            Self::Located => "located",
        };
        f.write_str(name)
    }
}

/// Holds an [`AuthStage`] that only ever moves one step forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMachine {
    stage: AuthStage,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self {
            stage: AuthStage::Unauthenticated,
        }
    }
}

impl StageMachine {
    pub fn stage(&self) -> AuthStage {
        self.stage
    }

    pub fn is(&self, stage: AuthStage) -> bool {
        self.stage == stage
    }

    pub fn advance(&mut self, to: AuthStage) -> Result<(), SessionError> {
        if self.stage.next() != Some(to) {
            return Err(SessionError::Backwards {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }
}

// ── Location ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Absolute eye height.
    pub stance: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub grounded: bool,
}

impl Location {
    /// Standing on top of `spawn`.
    pub fn at_spawn(spawn: BlockPos) -> Self {
        let y = spawn.y as f64;
        Self {
            x: spawn.x as f64 + 0.5,
            y,
            z: spawn.z as f64 + 0.5,
            stance: y + STANCE_DEFAULT,
            yaw: 0.0,
            pitch: 0.0,
            grounded: true,
        }
    }

    pub fn from_document(doc: &PlayerDocument) -> Self {
        let [x, y, z] = doc.position();
        let (yaw, pitch) = doc.orientation();
        let mut location = Self {
            x,
            y,
            z,
            stance: doc.stance,
            yaw,
            pitch,
            grounded: doc.on_ground != 0,
        };
        location.clamp_stance();
        location
    }

    pub fn to_document(&self, inventory: &Inventory) -> PlayerDocument {
        PlayerDocument {
            pos: vec![self.x, self.y, self.z],
            stance: self.stance,
            rotation: vec![self.yaw, self.pitch],
            on_ground: self.grounded as i8,
            inventory: inventory.to_items(),
        }
    }

    /// Keep the eye height inside the valid band above the feet.
    pub fn clamp_stance(&mut self) {
        let offset = self.stance - self.y;
        if offset.is_nan() {
            self.stance = self.y + STANCE_DEFAULT;
        } else {
            self.stance = self.y + offset.clamp(STANCE_MIN, STANCE_MAX);
        }
    }

    pub fn chunk(&self) -> ChunkPos {
        ChunkPos::containing(self.x, self.z)
    }

    pub fn block(&self) -> BlockPos {
        BlockPos::containing(self.x, self.y, self.z)
    }

    /// Move up until feet and head are both in passable blocks, and the
    /// player stands on something. `chunk` must be the chunk containing the
    /// location. Returns whether the location changed.
    pub fn lift_out_of(&mut self, chunk: &ChunkStore) -> bool {
        let feet = self.block();
        let top = CHUNK_HEIGHT as i32 - 2;
        let passable = |y: i32| {
            BlockPos::new(feet.x, y, feet.z)
                .local()
                .is_none_or(|local| block::is_passable(chunk.get_block(local)))
        };

        if (feet.y >= 0 && feet.y <= top) && passable(feet.y) && passable(feet.y + 1) {
            return false;
        }

        let mut y = feet.y.clamp(1, top);
        while y < top && !(passable(y) && passable(y + 1) && !passable(y - 1)) {
            y += 1;
        }
        let offset = self.stance - self.y;
        self.y = y as f64;
        self.stance = self.y + offset.clamp(STANCE_MIN, STANCE_MAX);
        true
    }
}

// ── Inventory ────────────────────────────────────────────────────────────────

/// Network slot count of the player window.
pub const INVENTORY_SLOTS: usize = 45;
/// First network slot of the hotbar.
pub const HOTBAR_START: usize = 36;
pub const HOTBAR_SLOTS: usize = 9;

/// The player window in network slot order: crafting output and grid
/// (0..5), armour (5..9), main (9..36) and hotbar (36..45).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    slots: [Option<ItemStack>; INVENTORY_SLOTS],
    held: usize,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            slots: [None; INVENTORY_SLOTS],
            held: 0,
        }
    }
}

impl Inventory {
    pub fn get(&self, slot: usize) -> Option<ItemStack> {
        self.slots.get(slot).copied().flatten()
    }

    pub fn set(&mut self, slot: usize, item: Option<ItemStack>) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = item;
        }
    }

    /// Hotbar index (0..9) of the held item.
    pub fn held(&self) -> usize {
        self.held
    }

    pub fn select(&mut self, hotbar: i16) -> bool {
        match usize::try_from(hotbar) {
            Ok(i) if i < HOTBAR_SLOTS => {
                self.held = i;
                true
            }
            _ => false,
        }
    }

    pub fn held_item(&self) -> Option<ItemStack> {
        self.get(HOTBAR_START + self.held)
    }

    /// Occupied slots in network order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, ItemStack)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|item| (i, item)))
    }

    pub fn from_items(items: &[InventoryItem]) -> Self {
        let mut inventory = Self::default();
        for item in items {
            let Some(slot) = network_slot(item.slot) else {
                tracing::debug!("skipping inventory item in slot {}", item.slot);
                continue;
            };
            inventory.slots[slot] = Some(ItemStack {
                id: item.id,
                count: item.count,
                damage: item.damage,
            });
        }
        inventory
    }

    pub fn to_items(&self) -> Vec<InventoryItem> {
        self.occupied()
            .filter_map(|(slot, item)| {
                document_slot(slot).map(|doc_slot| InventoryItem {
                    slot: doc_slot,
                    id: item.id,
                    count: item.count,
                    damage: item.damage,
                })
            })
            .collect()
    }
}

/// Saved slot numbering: hotbar 0..9, main 9..36, armour 100..104 (boots
/// first). Crafting slots are not saved.
fn network_slot(doc_slot: i8) -> Option<usize> {
    match doc_slot {
        0..=8 => Some(HOTBAR_START + doc_slot as usize),
        9..=35 => Some(doc_slot as usize),
        100..=103 => Some(8 - (doc_slot - 100) as usize),
        _ => None,
    }
}

fn document_slot(slot: usize) -> Option<i8> {
    match slot {
        36..=44 => Some((slot - HOTBAR_START) as i8),
        9..=35 => Some(slot as i8),
        5..=8 => Some(100 + (8 - slot) as i8),
        _ => None,
    }
}
