use std::collections::HashMap;
use std::fmt;

use indexmap::IndexSet;

use super::block::BlockId;
use super::nibble::NibbleArray;
use super::position::{ChunkPos, LocalBlockPos};

/// Number of blocks along the X axis of a chunk.
pub const CHUNK_WIDTH: usize = 16;
/// Number of blocks along the Z axis of a chunk.
pub const CHUNK_DEPTH: usize = 16;
/// Number of blocks in one column (legacy layout).
pub const CHUNK_HEIGHT: usize = 128;
/// Total block count in one chunk.
pub const CHUNK_VOLUME: usize = CHUNK_WIDTH * CHUNK_DEPTH * CHUNK_HEIGHT;
/// Number of height-map entries (one per column).
pub const CHUNK_AREA: usize = CHUNK_WIDTH * CHUNK_DEPTH;

/// Damaged-block count above which flushing re-sends the whole chunk.
pub const DAMAGE_THRESHOLD: usize = 176;

/// Brightest light level.
pub const FULL_LIGHT: u8 = 15;

/// Block-associated structured data (sign text, chest contents, ...).
///
/// The payload is an opaque document subtree; only its kind is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct TileEntity {
    pub kind: String,
    pub data: HashMap<String, fastnbt::Value>,
}

/// A free entity (dropped item, mob) inside the chunk's bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub kind: String,
    pub pos: [f64; 3],
    pub data: HashMap<String, fastnbt::Value>,
}

/// What a damage flush must tell viewing clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DamageReport {
    /// Nothing changed since the last flush.
    Clean,
    /// Exactly one block changed.
    Single(BlockChange),
    /// A handful of blocks changed; send them together.
    Batch(Vec<BlockChange>),
    /// Too many changes; re-send the whole chunk.
    Full,
}

/// One block edit as reported by a damage flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockChange {
    pub pos: LocalBlockPos,
    pub block: BlockId,
    pub metadata: u8,
}

/// One 16x128x16 column of blocks plus everything attached to it.
///
/// Flat arrays, indexed by [`LocalBlockPos::index`]. Metadata and light are
/// nibble-packed. All fields are private so the array-length invariant holds.
#[derive(Clone)]
pub struct ChunkStore {
    pos: ChunkPos,
    blocks: Box<[u8]>,
    metadata: NibbleArray,
    block_light: NibbleArray,
    sky_light: NibbleArray,
    heightmap: Box<[u8]>,
    tile_entities: HashMap<LocalBlockPos, TileEntity>,
    entities: Vec<Entity>,
    populated: bool,
    dirty: bool,
    /// Bumped on every mutation; lets a save clear `dirty` only if nothing
    /// changed while the snapshot was being written.
    revision: u64,
    damage: IndexSet<LocalBlockPos>,
}

/// Summary only; the arrays are too large to print.
impl fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStore")
            .field("pos", &self.pos)
            .field("populated", &self.populated)
            .field("dirty", &self.dirty)
            .field("revision", &self.revision)
            .field("damage", &self.damage.len())
            .field("tile_entities", &self.tile_entities.len())
            .field("entities", &self.entities.len())
            .finish()
    }
}

impl ChunkStore {
    /// A zeroed, unpopulated chunk.
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            blocks: vec![0u8; CHUNK_VOLUME].into_boxed_slice(),
            metadata: NibbleArray::new(CHUNK_VOLUME),
            block_light: NibbleArray::new(CHUNK_VOLUME),
            sky_light: NibbleArray::new(CHUNK_VOLUME),
            heightmap: vec![0u8; CHUNK_AREA].into_boxed_slice(),
            tile_entities: HashMap::new(),
            entities: Vec::new(),
            populated: false,
            dirty: false,
            revision: 0,
            damage: IndexSet::new(),
        }
    }

    /// Assemble a chunk from raw arrays. Fails if a length is wrong.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        pos: ChunkPos,
        blocks: Vec<u8>,
        metadata: Vec<u8>,
        block_light: Vec<u8>,
        sky_light: Vec<u8>,
        heightmap: Vec<u8>,
        populated: bool,
    ) -> Result<Self, String> {
        let check = |name: &str, got: usize, want: usize| {
            if got == want {
                Ok(())
            } else {
                Err(format!("{name} has {got} bytes, expected {want}"))
            }
        };
        check("Blocks", blocks.len(), CHUNK_VOLUME)?;
        check("Data", metadata.len(), CHUNK_VOLUME / 2)?;
        check("BlockLight", block_light.len(), CHUNK_VOLUME / 2)?;
        check("SkyLight", sky_light.len(), CHUNK_VOLUME / 2)?;
        check("HeightMap", heightmap.len(), CHUNK_AREA)?;

        let mut chunk = Self::new(pos);
        chunk.blocks = blocks.into_boxed_slice();
        chunk.metadata = NibbleArray::from_packed(metadata);
        chunk.block_light = NibbleArray::from_packed(block_light);
        chunk.sky_light = NibbleArray::from_packed(sky_light);
        chunk.heightmap = heightmap.into_boxed_slice();
        chunk.populated = populated;
        Ok(chunk)
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    // ── Blocks & metadata ────────────────────────────────────────────────

    #[inline]
    pub fn get_block(&self, pos: LocalBlockPos) -> BlockId {
        BlockId(self.blocks[pos.index()])
    }

    /// Set a block. Returns whether anything changed; a change is recorded as
    /// damage, marks the chunk dirty and keeps the height-map current.
    pub fn set_block(&mut self, pos: LocalBlockPos, block: BlockId) -> bool {
        let idx = pos.index();
        if self.blocks[idx] == block.0 {
            return false;
        }
        self.blocks[idx] = block.0;
        self.touch(pos);

        let column = column_index(pos.x, pos.z);
        let height = self.heightmap[column];
        if !block.is_air() && pos.y > height {
            self.heightmap[column] = pos.y;
        } else if block.is_air() && pos.y == height {
            self.heightmap[column] = self.scan_column(pos.x, pos.z);
        }
        true
    }

    #[inline]
    pub fn get_metadata(&self, pos: LocalBlockPos) -> u8 {
        self.metadata.get(pos.index())
    }

    /// Set a 4-bit metadata value. Returns whether anything changed.
    pub fn set_metadata(&mut self, pos: LocalBlockPos, value: u8) -> bool {
        let idx = pos.index();
        if self.metadata.get(idx) == value & 0x0F {
            return false;
        }
        self.metadata.set(idx, value);
        self.touch(pos);
        true
    }

    /// Fast fill used by generation stages: no damage, no height-map upkeep.
    /// The pipeline regenerates derived data once all stages ran.
    #[inline]
    pub fn put_block(&mut self, pos: LocalBlockPos, block: BlockId) {
        self.blocks[pos.index()] = block.0;
    }

    pub fn get_block_light(&self, pos: LocalBlockPos) -> u8 {
        self.block_light.get(pos.index())
    }

    pub fn get_sky_light(&self, pos: LocalBlockPos) -> u8 {
        self.sky_light.get(pos.index())
    }

    pub fn blocks(&self) -> &[u8] {
        &self.blocks
    }

    pub fn metadata(&self) -> &NibbleArray {
        &self.metadata
    }

    pub fn block_light(&self) -> &NibbleArray {
        &self.block_light
    }

    pub fn sky_light(&self) -> &NibbleArray {
        &self.sky_light
    }

    // ── Height-map & light ───────────────────────────────────────────────

    /// Y of the topmost non-air block in column (x, z); 0 for an empty column.
    pub fn height_at(&self, x: u8, z: u8) -> u8 {
        self.heightmap[column_index(x & 0x0F, z & 0x0F)]
    }

    pub fn heightmap(&self) -> &[u8] {
        &self.heightmap
    }

    /// Recompute every column's height by scanning top-down.
    pub fn regenerate_heightmap(&mut self) {
        for x in 0..CHUNK_WIDTH as u8 {
            for z in 0..CHUNK_DEPTH as u8 {
                self.heightmap[column_index(x, z)] = self.scan_column(x, z);
            }
        }
    }

    /// Full sky light above each column's height, none at or below it.
    pub fn regenerate_skylight(&mut self) {
        for x in 0..CHUNK_WIDTH as u8 {
            for z in 0..CHUNK_DEPTH as u8 {
                let height = self.height_at(x, z);
                let empty = self.get_block(LocalBlockPos { x, y: height, z }).is_air();
                for y in 0..CHUNK_HEIGHT as u8 {
                    let lit = y > height || (empty && y == height);
                    let idx = LocalBlockPos { x, y, z }.index();
                    self.sky_light.set(idx, if lit { FULL_LIGHT } else { 0 });
                }
            }
        }
    }

    fn scan_column(&self, x: u8, z: u8) -> u8 {
        (0..CHUNK_HEIGHT as u8)
            .rev()
            .find(|&y| !self.get_block(LocalBlockPos { x, y, z }).is_air())
            .unwrap_or(0)
    }

    // ── Tile entities & entities ─────────────────────────────────────────

    pub fn tile_entity(&self, pos: LocalBlockPos) -> Option<&TileEntity> {
        self.tile_entities.get(&pos)
    }

    pub fn set_tile_entity(&mut self, pos: LocalBlockPos, tile: TileEntity) {
        self.tile_entities.insert(pos, tile);
        self.mark_dirty();
    }

    pub fn remove_tile_entity(&mut self, pos: LocalBlockPos) -> Option<TileEntity> {
        let removed = self.tile_entities.remove(&pos);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    pub fn tile_entities(&self) -> impl Iterator<Item = (&LocalBlockPos, &TileEntity)> {
        self.tile_entities.iter()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.push(entity);
        self.mark_dirty();
    }

    /// Remove and return every entity matching `pred`.
    pub fn take_entities(&mut self, mut pred: impl FnMut(&Entity) -> bool) -> Vec<Entity> {
        let (taken, kept): (Vec<_>, Vec<_>) = self.entities.drain(..).partition(|e| pred(e));
        self.entities = kept;
        if !taken.is_empty() {
            self.mark_dirty();
        }
        taken
    }

    // ── Flags ────────────────────────────────────────────────────────────

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn set_populated(&mut self, populated: bool) {
        self.populated = populated;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Clear the dirty flag if no mutation happened after `revision` was read.
    pub fn mark_clean(&mut self, revision: u64) -> bool {
        if self.revision == revision {
            self.dirty = false;
            true
        } else {
            false
        }
    }

    // ── Damage tracking ──────────────────────────────────────────────────

    pub fn record_damage(&mut self, pos: LocalBlockPos) {
        self.damage.insert(pos);
    }

    pub fn damage_count(&self) -> usize {
        self.damage.len()
    }

    /// Summarize pending damage for viewers, in the order it happened.
    pub fn build_damage_report(&self) -> DamageReport {
        match self.damage.len() {
            0 => DamageReport::Clean,
            1 => DamageReport::Single(self.change_at(self.damage[0])),
            n if n <= DAMAGE_THRESHOLD => {
                DamageReport::Batch(self.damage.iter().map(|&p| self.change_at(p)).collect())
            }
            _ => DamageReport::Full,
        }
    }

    pub fn clear_damage(&mut self) {
        self.damage.clear();
    }

    fn change_at(&self, pos: LocalBlockPos) -> BlockChange {
        BlockChange {
            pos,
            block: self.get_block(pos),
            metadata: self.get_metadata(pos),
        }
    }

    fn touch(&mut self, pos: LocalBlockPos) {
        self.record_damage(pos);
        self.mark_dirty();
    }
}

#[inline]
const fn column_index(x: u8, z: u8) -> usize {
    (z as usize) * CHUNK_WIDTH + (x as usize)
}
