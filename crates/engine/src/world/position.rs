use std::fmt;

use super::chunk::{CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};

/// Absolute block position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The block containing a world-space point.
    pub fn containing(x: f64, y: f64, z: f64) -> Self {
        Self::new(x.floor() as i32, y.floor() as i32, z.floor() as i32)
    }

    /// The chunk this block belongs to.
    pub const fn chunk(&self) -> ChunkPos {
        ChunkPos {
            x: self.x >> 4,
            z: self.z >> 4,
        }
    }

    /// Position within the chunk, or `None` when `y` is outside the column.
    pub fn local(&self) -> Option<LocalBlockPos> {
        LocalBlockPos::wrapping(self.x, self.y, self.z)
    }

    /// The block adjacent to this one across `face` (0 = -y, 1 = +y, 2 = -z,
    /// 3 = +z, 4 = -x, 5 = +x). Unknown faces and coordinates that would
    /// overflow yield `None`.
    pub fn offset_by_face(&self, face: i8) -> Option<BlockPos> {
        let (dx, dy, dz) = match face {
            0 => (0, -1, 0),
            1 => (0, 1, 0),
            2 => (0, 0, -1),
            3 => (0, 0, 1),
            4 => (-1, 0, 0),
            5 => (1, 0, 0),
            _ => return None,
        };
        Some(Self::new(
            self.x.checked_add(dx)?,
            self.y.checked_add(dy)?,
            self.z.checked_add(dz)?,
        ))
    }
}

/// Chunk column position (each chunk is 16x16 blocks horizontally).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The chunk containing a world-space X/Z point.
    pub fn containing(x: f64, z: f64) -> Self {
        Self::new((x.floor() as i32) >> 4, (z.floor() as i32) >> 4)
    }

    pub const fn block_origin(&self, y: i32) -> BlockPos {
        BlockPos::new(self.x << 4, y, self.z << 4)
    }

    /// Squared Euclidean distance in chunk space.
    pub const fn distance_sq(&self, other: ChunkPos) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dz * dz
    }

    /// Chebyshev distance in chunk space.
    pub fn chebyshev(&self, other: ChunkPos) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }

    /// Every chunk within Chebyshev `radius` of this one, row-major.
    pub fn square_around(&self, radius: i32) -> impl Iterator<Item = ChunkPos> + use<> {
        let center = *self;
        let radius = radius.max(0);
        (-radius..=radius).flat_map(move |dx| {
            (-radius..=radius).map(move |dz| ChunkPos::new(center.x + dx, center.z + dz))
        })
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Block position local to a chunk (x, z in 0..16, y in 0..128).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalBlockPos {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

impl LocalBlockPos {
    /// Build a local position. X and Z are taken modulo the chunk footprint;
    /// `None` if `y` is outside the column.
    pub fn wrapping(x: i32, y: i32, z: i32) -> Option<Self> {
        if !(0..CHUNK_HEIGHT as i32).contains(&y) {
            return None;
        }
        Some(Self {
            x: x.rem_euclid(CHUNK_WIDTH as i32) as u8,
            y: y as u8,
            z: z.rem_euclid(CHUNK_DEPTH as i32) as u8,
        })
    }

    /// Index into the flat block arrays. Y varies fastest, then Z, then X.
    #[inline]
    pub const fn index(&self) -> usize {
        (self.x as usize) * CHUNK_DEPTH * CHUNK_HEIGHT
            + (self.z as usize) * CHUNK_HEIGHT
            + (self.y as usize)
    }

    /// Inverse of [`index`](Self::index).
    pub const fn from_index(index: usize) -> Self {
        Self {
            x: (index / (CHUNK_DEPTH * CHUNK_HEIGHT)) as u8,
            z: ((index / CHUNK_HEIGHT) % CHUNK_DEPTH) as u8,
            y: (index % CHUNK_HEIGHT) as u8,
        }
    }

    /// World position of this block inside chunk `chunk`.
    pub const fn world(&self, chunk: ChunkPos) -> BlockPos {
        BlockPos::new(
            (chunk.x << 4) + self.x as i32,
            self.y as i32,
            (chunk.z << 4) + self.z as i32,
        )
    }

    /// The packed coordinate used by multi-block-change packets.
    pub const fn packed(&self) -> u16 {
        ((self.x as u16) << 12) | ((self.z as u16) << 8) | self.y as u16
    }
}
