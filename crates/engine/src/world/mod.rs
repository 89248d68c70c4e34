pub mod block;
pub mod chunk;
pub mod document;
pub mod nibble;
pub mod position;

pub use block::BlockId;
pub use chunk::{
    BlockChange, ChunkStore, DamageReport, Entity, TileEntity, CHUNK_AREA, CHUNK_DEPTH,
    CHUNK_HEIGHT, CHUNK_VOLUME, CHUNK_WIDTH,
};
pub use document::{ChunkDocument, DocumentError, LevelDocument, PlayerDocument};
pub use position::{BlockPos, ChunkPos, LocalBlockPos};
