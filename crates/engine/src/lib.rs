//! World model, terrain generation and the chunk cache.
//!
//! Nothing here knows about sockets or packets; the server crate layers the
//! wire protocol on top.

pub mod cache;
pub mod generation;
pub mod persistence;
pub mod world;

pub use cache::{CacheError, CacheOptions, ChunkHandle, WorldCache};
pub use generation::GenerationPipeline;
pub use persistence::{MemoryPersistence, Persistence};
