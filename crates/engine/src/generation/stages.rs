//! Terrain stages. Each is stateless; all per-chunk variation comes from the
//! world seed and chunk coordinate.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::Stage;
use super::noise::ValueNoise;
use crate::world::block::{self, BlockId};
use crate::world::chunk::{CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH, ChunkStore};
use crate::world::position::{ChunkPos, LocalBlockPos};

/// Blocks at or below this Y are flooded by the water table.
pub const SEA_LEVEL: u8 = 62;

/// Deterministic per-chunk generator for one stage.
pub fn chunk_rng(seed: u64, pos: ChunkPos, salt: u64) -> ChaCha8Rng {
    let mut hash = seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    hash ^= (pos.x as i64 as u64).wrapping_mul(0x517C_C1B7_2722_0A95);
    hash = hash.rotate_left(31);
    hash ^= (pos.z as i64 as u64).wrapping_mul(0x2545_F491_4F6C_DD1D);
    ChaCha8Rng::seed_from_u64(hash)
}

fn columns() -> impl Iterator<Item = (u8, u8)> {
    (0..CHUNK_WIDTH as u8).flat_map(|x| (0..CHUNK_DEPTH as u8).map(move |z| (x, z)))
}

#[inline]
fn at(x: u8, y: u8, z: u8) -> LocalBlockPos {
    LocalBlockPos { x, y, z }
}

/// Y of the topmost block in the column that satisfies `pred`.
fn topmost(chunk: &ChunkStore, x: u8, z: u8, pred: impl Fn(BlockId) -> bool) -> Option<u8> {
    (0..CHUNK_HEIGHT as u8)
        .rev()
        .find(|&y| pred(chunk.get_block(at(x, y, z))))
}

// ── boring ───────────────────────────────────────────────────────────────────

/// Flat stone up to a fixed height.
pub struct Boring;

impl Boring {
    pub const HEIGHT: u8 = 65;
}

impl Stage for Boring {
    fn name(&self) -> &'static str {
        "boring"
    }

    fn apply(&self, chunk: &mut ChunkStore, _seed: u64) {
        for (x, z) in columns() {
            for y in 0..Self::HEIGHT {
                chunk.put_block(at(x, y, z), block::STONE);
            }
        }
    }
}

// ── simplex ──────────────────────────────────────────────────────────────────

/// Rolling stone terrain from fractal value noise.
pub struct Simplex {
    pub octaves: u32,
    pub frequency: f64,
    pub base: f64,
    pub amplitude: f64,
}

impl Default for Simplex {
    fn default() -> Self {
        Self {
            octaves: 4,
            frequency: 1.0 / 64.0,
            base: 64.0,
            amplitude: 16.0,
        }
    }
}

const SIMPLEX_SALT: u64 = 0x5349_4D50;

impl Stage for Simplex {
    fn name(&self) -> &'static str {
        "simplex"
    }

    fn apply(&self, chunk: &mut ChunkStore, seed: u64) {
        let noise = ValueNoise::new(seed ^ SIMPLEX_SALT);
        let origin = chunk.pos().block_origin(0);
        for (x, z) in columns() {
            let wx = (origin.x + x as i32) as f64;
            let wz = (origin.z + z as i32) as f64;
            let h = self.base + noise.fractal(wx, wz, self.octaves, self.frequency) * self.amplitude;
            let height = h.round().clamp(1.0, (CHUNK_HEIGHT - 3) as f64) as u8;
            for y in 0..=height {
                chunk.put_block(at(x, y, z), block::STONE);
            }
        }
    }
}

// ── erosion ──────────────────────────────────────────────────────────────────

/// Weathers the top of stone columns into dirt.
pub struct Erosion;

const EROSION_SALT: u64 = 0x4552_4F44;

impl Stage for Erosion {
    fn name(&self) -> &'static str {
        "erosion"
    }

    fn apply(&self, chunk: &mut ChunkStore, seed: u64) {
        let mut rng = chunk_rng(seed, chunk.pos(), EROSION_SALT);
        for (x, z) in columns() {
            let depth: u8 = rng.gen_range(2..=4);
            let Some(top) = topmost(chunk, x, z, |b| !b.is_air()) else {
                continue;
            };
            for y in (top.saturating_sub(depth - 1)..=top).rev() {
                let pos = at(x, y, z);
                if chunk.get_block(pos) != block::STONE {
                    break;
                }
                chunk.put_block(pos, block::DIRT);
            }
        }
    }
}

// ── watertable ───────────────────────────────────────────────────────────────

/// Floods open air at and below sea level.
pub struct WaterTable;

impl Stage for WaterTable {
    fn name(&self) -> &'static str {
        "watertable"
    }

    fn apply(&self, chunk: &mut ChunkStore, _seed: u64) {
        for (x, z) in columns() {
            for y in 0..=SEA_LEVEL {
                let pos = at(x, y, z);
                if chunk.get_block(pos).is_air() {
                    chunk.put_block(pos, block::WATER);
                }
            }
        }
    }
}

// ── beaches ──────────────────────────────────────────────────────────────────

/// Turns dirt near the waterline into sand.
pub struct Beaches;

impl Stage for Beaches {
    fn name(&self) -> &'static str {
        "beaches"
    }

    fn apply(&self, chunk: &mut ChunkStore, _seed: u64) {
        for (x, z) in columns() {
            let Some(top) = topmost(chunk, x, z, block::is_terrain) else {
                continue;
            };
            if top.abs_diff(SEA_LEVEL) > 2 {
                continue;
            }
            for y in (0..=top).rev() {
                let pos = at(x, y, z);
                if chunk.get_block(pos) != block::DIRT {
                    break;
                }
                chunk.put_block(pos, block::SAND);
            }
        }
    }
}

// ── grass ────────────────────────────────────────────────────────────────────

/// Grows grass on exposed dirt.
pub struct Grass;

impl Stage for Grass {
    fn name(&self) -> &'static str {
        "grass"
    }

    fn apply(&self, chunk: &mut ChunkStore, _seed: u64) {
        for (x, z) in columns() {
            let Some(top) = topmost(chunk, x, z, |b| !b.is_air()) else {
                continue;
            };
            let pos = at(x, top, z);
            if chunk.get_block(pos) == block::DIRT {
                chunk.put_block(pos, block::GRASS);
            }
        }
    }
}

// ── ore ──────────────────────────────────────────────────────────────────────

/// Scatters small coal and iron veins through stone.
pub struct Ore;

const ORE_SALT: u64 = 0x4F52_4553;

struct Vein {
    block: BlockId,
    count: std::ops::RangeInclusive<u32>,
    max_y: u8,
    size: u32,
}

const VEINS: [Vein; 2] = [
    Vein {
        block: block::COAL_ORE,
        count: 8..=16,
        max_y: 112,
        size: 12,
    },
    Vein {
        block: block::IRON_ORE,
        count: 4..=8,
        max_y: 56,
        size: 8,
    },
];

impl Stage for Ore {
    fn name(&self) -> &'static str {
        "ore"
    }

    fn apply(&self, chunk: &mut ChunkStore, seed: u64) {
        let mut rng = chunk_rng(seed, chunk.pos(), ORE_SALT);
        for vein in &VEINS {
            for _ in 0..rng.gen_range(vein.count.clone()) {
                let mut x = rng.gen_range(0..CHUNK_WIDTH as i32);
                let mut y = rng.gen_range(1..vein.max_y as i32);
                let mut z = rng.gen_range(0..CHUNK_DEPTH as i32);
                for _ in 0..vein.size {
                    let pos = at(x as u8, y as u8, z as u8);
                    if chunk.get_block(pos) == block::STONE {
                        chunk.put_block(pos, vein.block);
                    }
                    x = (x + rng.gen_range(-1..=1)).clamp(0, CHUNK_WIDTH as i32 - 1);
                    y = (y + rng.gen_range(-1..=1)).clamp(1, vein.max_y as i32);
                    z = (z + rng.gen_range(-1..=1)).clamp(0, CHUNK_DEPTH as i32 - 1);
                }
            }
        }
    }
}

// ── safety ───────────────────────────────────────────────────────────────────

/// Unbreakable floor and a clear ceiling.
pub struct Safety;

impl Stage for Safety {
    fn name(&self) -> &'static str {
        "safety"
    }

    fn apply(&self, chunk: &mut ChunkStore, _seed: u64) {
        let top = CHUNK_HEIGHT as u8 - 1;
        for (x, z) in columns() {
            chunk.put_block(at(x, 0, z), block::BEDROCK);
            chunk.put_block(at(x, top - 1, z), block::AIR);
            chunk.put_block(at(x, top, z), block::AIR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(chunk: &ChunkStore, x: u8, z: u8) -> Vec<BlockId> {
        (0..CHUNK_HEIGHT as u8).map(|y| chunk.get_block(at(x, y, z))).collect()
    }

    #[test]
    fn boring_fills_below_fixed_height() {
        let mut chunk = ChunkStore::new(ChunkPos::new(0, 0));
        Boring.apply(&mut chunk, 0);
        let col = column(&chunk, 5, 9);
        assert!(col[..65].iter().all(|&b| b == block::STONE));
        assert!(col[65..].iter().all(|b| b.is_air()));
    }

    #[test]
    fn erosion_converts_two_to_four_top_stones() {
        let mut chunk = ChunkStore::new(ChunkPos::new(3, -1));
        Boring.apply(&mut chunk, 0);
        Erosion.apply(&mut chunk, 99);
        for (x, z) in columns() {
            let dirt = column(&chunk, x, z).iter().filter(|&&b| b == block::DIRT).count();
            assert!((2..=4).contains(&dirt), "column ({x}, {z}) has {dirt} dirt");
            assert_eq!(chunk.get_block(at(x, 64, z)), block::DIRT);
        }
    }

    #[test]
    fn grass_needs_air_above() {
        let mut chunk = ChunkStore::new(ChunkPos::new(0, 0));
        for y in 0..10 {
            chunk.put_block(at(0, y, 0), block::DIRT);
            chunk.put_block(at(1, y, 0), block::DIRT);
        }
        chunk.put_block(at(1, 10, 0), block::WATER);
        Grass.apply(&mut chunk, 0);
        assert_eq!(chunk.get_block(at(0, 9, 0)), block::GRASS);
        assert_eq!(chunk.get_block(at(1, 9, 0)), block::DIRT);
    }

    #[test]
    fn beaches_only_near_sea_level() {
        let mut chunk = ChunkStore::new(ChunkPos::new(0, 0));
        for y in 0..=SEA_LEVEL + 1 {
            chunk.put_block(at(0, y, 0), if y >= SEA_LEVEL - 1 { block::DIRT } else { block::STONE });
        }
        for y in 0..=80 {
            chunk.put_block(at(1, y, 0), if y >= 78 { block::DIRT } else { block::STONE });
        }
        Beaches.apply(&mut chunk, 0);
        assert_eq!(chunk.get_block(at(0, SEA_LEVEL + 1, 0)), block::SAND);
        assert_eq!(chunk.get_block(at(0, SEA_LEVEL - 1, 0)), block::SAND);
        assert_eq!(chunk.get_block(at(1, 80, 0)), block::DIRT);
    }

    #[test]
    fn ore_replaces_only_stone() {
        let mut chunk = ChunkStore::new(ChunkPos::new(1, 1));
        Boring.apply(&mut chunk, 0);
        Ore.apply(&mut chunk, 5);
        let blocks = chunk.blocks();
        assert!(blocks.iter().any(|&b| b == block::IRON_ORE.0));
        for y in Boring::HEIGHT..CHUNK_HEIGHT as u8 {
            for (x, z) in columns() {
                assert!(chunk.get_block(at(x, y, z)).is_air());
            }
        }
    }

    #[test]
    fn chunk_rng_depends_on_every_input() {
        let draw = |seed, pos, salt| chunk_rng(seed, pos, salt).r#gen::<u64>();
        let base = draw(1, ChunkPos::new(0, 0), 1);
        assert_eq!(base, draw(1, ChunkPos::new(0, 0), 1));
        assert_ne!(base, draw(2, ChunkPos::new(0, 0), 1));
        assert_ne!(base, draw(1, ChunkPos::new(1, 0), 1));
        assert_ne!(base, draw(1, ChunkPos::new(0, 1), 1));
        assert_ne!(base, draw(1, ChunkPos::new(0, 0), 2));
    }
}
