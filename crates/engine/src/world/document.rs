//! In-memory ↔ persistence document mapping.
//!
//! Documents are plain serde structs shaped like Beta's NBT files; the
//! backend decides how the tree is encoded on disk.

use fastnbt::{ByteArray, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chunk::{ChunkStore, Entity, TileEntity};
use super::position::{BlockPos, ChunkPos};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("chunk document for {pos}: {reason}")]
    Layout { pos: ChunkPos, reason: String },
    #[error("chunk document is for {found}, expected {expected}")]
    WrongChunk { expected: ChunkPos, found: ChunkPos },
}

// ── Chunk ────────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChunkDocument {
    #[serde(rename = "Level")]
    pub level: ChunkLevel,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChunkLevel {
    #[serde(rename = "xPos")]
    pub x_pos: i32,
    #[serde(rename = "zPos")]
    pub z_pos: i32,
    #[serde(rename = "Blocks")]
    pub blocks: ByteArray,
    #[serde(rename = "Data")]
    pub data: ByteArray,
    #[serde(rename = "BlockLight")]
    pub block_light: ByteArray,
    #[serde(rename = "SkyLight")]
    pub sky_light: ByteArray,
    #[serde(rename = "HeightMap")]
    pub height_map: ByteArray,
    #[serde(rename = "TerrainPopulated")]
    pub terrain_populated: i8,
    #[serde(rename = "LastUpdate", default)]
    pub last_update: i64,
    #[serde(rename = "Entities", default)]
    pub entities: Vec<Value>,
    #[serde(rename = "TileEntities", default)]
    pub tile_entities: Vec<Value>,
}

impl ChunkDocument {
    pub fn pos(&self) -> ChunkPos {
        ChunkPos::new(self.level.x_pos, self.level.z_pos)
    }

    pub fn is_populated(&self) -> bool {
        self.level.terrain_populated != 0
    }
}

fn to_byte_array(bytes: &[u8]) -> ByteArray {
    ByteArray::new(bytes.iter().map(|&b| b as i8).collect())
}

fn from_byte_array(array: ByteArray) -> Vec<u8> {
    array.into_inner().into_iter().map(|b| b as u8).collect()
}

impl ChunkStore {
    /// Lower this chunk to its persistence document.
    pub fn to_document(&self, last_update: i64) -> ChunkDocument {
        let pos = self.pos();
        let tile_entities = self
            .tile_entities()
            .map(|(local, tile)| tile_entity_to_value(local.world(pos), tile))
            .collect();
        let entities = self.entities().iter().map(entity_to_value).collect();

        ChunkDocument {
            level: ChunkLevel {
                x_pos: pos.x,
                z_pos: pos.z,
                blocks: to_byte_array(self.blocks()),
                data: to_byte_array(self.metadata().as_packed()),
                block_light: to_byte_array(self.block_light().as_packed()),
                sky_light: to_byte_array(self.sky_light().as_packed()),
                height_map: to_byte_array(self.heightmap()),
                terrain_populated: self.is_populated() as i8,
                last_update,
                entities,
                tile_entities,
            },
        }
    }

    /// Rebuild a chunk from its document. The result is clean and carries no
    /// damage. Fails if any array has the wrong length.
    pub fn from_document(doc: ChunkDocument) -> Result<Self, DocumentError> {
        let pos = doc.pos();
        let level = doc.level;
        let populated = level.terrain_populated != 0;

        let mut chunk = ChunkStore::from_parts(
            pos,
            from_byte_array(level.blocks),
            from_byte_array(level.data),
            from_byte_array(level.block_light),
            from_byte_array(level.sky_light),
            from_byte_array(level.height_map),
            populated,
        )
        .map_err(|reason| DocumentError::Layout { pos, reason })?;

        for value in level.tile_entities {
            match value_to_tile_entity(value) {
                Some((world, tile)) if world.chunk() == pos => {
                    match world.local() {
                        Some(local) => chunk.set_tile_entity(local, tile),
                        None => {
                            tracing::warn!("Dropping tile entity at {:?}: outside the column", world)
                        }
                    }
                }
                Some((world, _)) => {
                    tracing::warn!("Dropping tile entity at {:?}: outside chunk {}", world, pos);
                }
                None => tracing::warn!("Dropping malformed tile entity in chunk {}", pos),
            }
        }
        for value in level.entities {
            match value_to_entity(value) {
                Some(entity) => chunk.add_entity(entity),
                None => tracing::warn!("Dropping malformed entity in chunk {}", pos),
            }
        }

        let revision = chunk.revision();
        chunk.mark_clean(revision);
        Ok(chunk)
    }
}

fn tile_entity_to_value(world: BlockPos, tile: &TileEntity) -> Value {
    let mut map = tile.data.clone();
    map.insert("id".into(), Value::String(tile.kind.clone()));
    map.insert("x".into(), Value::Int(world.x));
    map.insert("y".into(), Value::Int(world.y));
    map.insert("z".into(), Value::Int(world.z));
    Value::Compound(map)
}

fn value_to_tile_entity(value: Value) -> Option<(BlockPos, TileEntity)> {
    let Value::Compound(mut map) = value else {
        return None;
    };
    let Some(Value::String(kind)) = map.remove("id") else {
        return None;
    };
    let mut coord = |key: &str| match map.remove(key) {
        Some(Value::Int(v)) => Some(v),
        _ => None,
    };
    let world = BlockPos::new(coord("x")?, coord("y")?, coord("z")?);
    Some((world, TileEntity { kind, data: map }))
}

fn entity_to_value(entity: &Entity) -> Value {
    let mut map = entity.data.clone();
    map.insert("id".into(), Value::String(entity.kind.clone()));
    map.insert(
        "Pos".into(),
        Value::List(entity.pos.iter().map(|&c| Value::Double(c)).collect()),
    );
    Value::Compound(map)
}

fn value_to_entity(value: Value) -> Option<Entity> {
    let Value::Compound(mut map) = value else {
        return None;
    };
    let Some(Value::String(kind)) = map.remove("id") else {
        return None;
    };
    let Some(Value::List(coords)) = map.remove("Pos") else {
        return None;
    };
    let coords: Vec<f64> = coords
        .into_iter()
        .map(|v| match v {
            Value::Double(d) => Some(d),
            _ => None,
        })
        .collect::<Option<_>>()?;
    let pos: [f64; 3] = coords.try_into().ok()?;
    Some(Entity {
        kind,
        pos,
        data: map,
    })
}

// ── Level ────────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LevelDocument {
    #[serde(rename = "Data")]
    pub data: LevelData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LevelData {
    #[serde(rename = "RandomSeed")]
    pub random_seed: i64,
    #[serde(rename = "SpawnX")]
    pub spawn_x: i32,
    #[serde(rename = "SpawnY")]
    pub spawn_y: i32,
    #[serde(rename = "SpawnZ")]
    pub spawn_z: i32,
    #[serde(rename = "Time")]
    pub time: i64,
}

impl LevelDocument {
    pub fn new(seed: u64, spawn: BlockPos, time: i64) -> Self {
        Self {
            data: LevelData {
                random_seed: seed as i64,
                spawn_x: spawn.x,
                spawn_y: spawn.y,
                spawn_z: spawn.z,
                time,
            },
        }
    }

    pub fn seed(&self) -> u64 {
        self.data.random_seed as u64
    }

    pub fn spawn(&self) -> BlockPos {
        BlockPos::new(self.data.spawn_x, self.data.spawn_y, self.data.spawn_z)
    }

    pub fn time(&self) -> i64 {
        self.data.time
    }
}

// ── Player ───────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlayerDocument {
    /// x, y, z.
    #[serde(rename = "Pos")]
    pub pos: Vec<f64>,
    #[serde(rename = "Stance", default)]
    pub stance: f64,
    /// yaw, pitch.
    #[serde(rename = "Rotation")]
    pub rotation: Vec<f32>,
    #[serde(rename = "OnGround")]
    pub on_ground: i8,
    #[serde(rename = "Inventory", default)]
    pub inventory: Vec<InventoryItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryItem {
    #[serde(rename = "Slot")]
    pub slot: i8,
    pub id: i16,
    #[serde(rename = "Count")]
    pub count: i8,
    #[serde(rename = "Damage")]
    pub damage: i16,
}

impl PlayerDocument {
    /// Position as a triple; missing components read as zero.
    pub fn position(&self) -> [f64; 3] {
        let at = |i: usize| self.pos.get(i).copied().unwrap_or(0.0);
        [at(0), at(1), at(2)]
    }

    /// Yaw and pitch; missing components read as zero.
    pub fn orientation(&self) -> (f32, f32) {
        let at = |i: usize| self.rotation.get(i).copied().unwrap_or(0.0);
        (at(0), at(1))
    }
}

/// Serialize a document to NBT bytes.
pub fn encode<T: Serialize>(doc: &T) -> anyhow::Result<Vec<u8>> {
    Ok(fastnbt::to_bytes(doc)?)
}

/// Parse a document from NBT bytes.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> anyhow::Result<T> {
    Ok(fastnbt::from_bytes(bytes)?)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::world::block;
    use crate::world::position::LocalBlockPos;

    fn sample_chunk() -> ChunkStore {
        let pos = ChunkPos::new(-2, 5);
        let mut chunk = ChunkStore::new(pos);
        for x in 0..16u8 {
            for z in 0..16u8 {
                chunk.set_block(LocalBlockPos { x, y: 10, z }, block::STONE);
            }
        }
        chunk.set_metadata(LocalBlockPos { x: 3, y: 10, z: 4 }, 7);
        chunk.set_tile_entity(
            LocalBlockPos { x: 1, y: 11, z: 2 },
            TileEntity {
                kind: "Sign".into(),
                data: HashMap::from([("Text1".to_string(), Value::String("hello".into()))]),
            },
        );
        chunk.add_entity(Entity {
            kind: "Item".into(),
            pos: [-30.5, 11.0, 82.25],
            data: HashMap::new(),
        });
        chunk.set_populated(true);
        chunk.regenerate_skylight();
        chunk
    }

    #[test]
    fn document_keeps_arrays_and_attachments() {
        let chunk = sample_chunk();
        let bytes = encode(&chunk.to_document(99)).unwrap();
        let doc: ChunkDocument = decode(&bytes).unwrap();
        assert_eq!(doc.level.last_update, 99);

        let back = ChunkStore::from_document(doc).unwrap();
        assert_eq!(back.pos(), chunk.pos());
        assert_eq!(back.blocks(), chunk.blocks());
        assert_eq!(back.metadata(), chunk.metadata());
        assert_eq!(back.sky_light(), chunk.sky_light());
        assert_eq!(back.heightmap(), chunk.heightmap());
        assert!(back.is_populated());
        assert!(!back.is_dirty());
        assert_eq!(back.damage_count(), 0);

        let tile = back.tile_entity(LocalBlockPos { x: 1, y: 11, z: 2 }).unwrap();
        assert_eq!(tile.kind, "Sign");
        assert_eq!(tile.data.get("Text1"), Some(&Value::String("hello".into())));
        assert_eq!(back.entities().len(), 1);
        assert_eq!(back.entities()[0].pos, [-30.5, 11.0, 82.25]);
    }

    #[test]
    fn tile_entities_are_stored_with_world_coordinates() {
        let doc = sample_chunk().to_document(0);
        let Value::Compound(map) = &doc.level.tile_entities[0] else {
            panic!("tile entity is not a compound");
        };
        assert_eq!(map.get("x"), Some(&Value::Int(-32 + 1)));
        assert_eq!(map.get("z"), Some(&Value::Int(80 + 2)));
    }

    #[test]
    fn tile_entities_above_the_column_are_dropped() {
        let mut doc = sample_chunk().to_document(0);
        let mut floating = HashMap::new();
        floating.insert("id".to_string(), Value::String("Sign".into()));
        floating.insert("x".to_string(), Value::Int(-32 + 4));
        floating.insert("y".to_string(), Value::Int(300));
        floating.insert("z".to_string(), Value::Int(80 + 4));
        doc.level.tile_entities.push(Value::Compound(floating));

        let back = ChunkStore::from_document(doc).unwrap();
        assert_eq!(back.tile_entities().count(), 1);
        assert!(back.tile_entity(LocalBlockPos { x: 1, y: 11, z: 2 }).is_some());
    }

    #[test]
    fn short_arrays_are_rejected() {
        let mut doc = sample_chunk().to_document(0);
        doc.level.data = ByteArray::new(vec![0; 100]);
        let err = ChunkStore::from_document(doc).unwrap_err();
        assert!(err.to_string().contains("Data"), "{err}");
    }

    #[test]
    fn level_and_player_documents_round_trip_through_nbt() {
        let level = LevelDocument::new(u64::MAX - 3, BlockPos::new(8, 70, -8), 24_000);
        let back: LevelDocument = decode(&encode(&level).unwrap()).unwrap();
        assert_eq!(back.seed(), u64::MAX - 3);
        assert_eq!(back.spawn(), BlockPos::new(8, 70, -8));

        let player = PlayerDocument {
            pos: vec![1.5, 65.0, -3.5],
            stance: 66.62,
            rotation: vec![90.0, 10.0],
            on_ground: 1,
            inventory: vec![InventoryItem { slot: 0, id: 4, count: 64, damage: 0 }],
        };
        let back: PlayerDocument = decode(&encode(&player).unwrap()).unwrap();
        assert_eq!(back, player);
    }
}
