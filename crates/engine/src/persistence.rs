//! Persistence boundary: load and save documents by key.
//!
//! Calls are synchronous and may block or fail; the cache runs them on the
//! blocking pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use parking_lot::Mutex;

use crate::world::document::{self, ChunkDocument, LevelDocument, PlayerDocument};
use crate::world::position::ChunkPos;

pub trait Persistence: Send + Sync + 'static {
    /// `Ok(None)` when nothing was ever saved for this chunk.
    fn load_chunk(&self, pos: ChunkPos) -> Result<Option<ChunkDocument>>;
    fn save_chunk(&self, pos: ChunkPos, doc: &ChunkDocument) -> Result<()>;

    fn load_level(&self) -> Result<Option<LevelDocument>>;
    fn save_level(&self, doc: &LevelDocument) -> Result<()>;

    fn load_player(&self, username: &str) -> Result<Option<PlayerDocument>>;
    fn save_player(&self, username: &str, doc: &PlayerDocument) -> Result<()>;
}

/// Keeps NBT-encoded documents in memory. Used for tests and throwaway worlds.
///
/// Failures and slowness can be injected to exercise error paths.
#[derive(Default)]
pub struct MemoryPersistence {
    chunks: Mutex<HashMap<ChunkPos, Vec<u8>>>,
    level: Mutex<Option<Vec<u8>>>,
    players: Mutex<HashMap<String, Vec<u8>>>,
    fail_saves: AtomicBool,
    load_delay_ms: AtomicU64,
    chunk_loads: AtomicUsize,
    chunk_saves: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save_chunk` fail until switched off.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every `load_chunk`.
    pub fn set_load_delay(&self, delay: Duration) {
        self.load_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn chunk_loads(&self) -> usize {
        self.chunk_loads.load(Ordering::SeqCst)
    }

    pub fn chunk_saves(&self) -> usize {
        self.chunk_saves.load(Ordering::SeqCst)
    }

    pub fn has_chunk(&self, pos: ChunkPos) -> bool {
        self.chunks.lock().contains_key(&pos)
    }

    pub fn stored_chunks(&self) -> usize {
        self.chunks.lock().len()
    }
}

impl Persistence for MemoryPersistence {
    fn load_chunk(&self, pos: ChunkPos) -> Result<Option<ChunkDocument>> {
        self.chunk_loads.fetch_add(1, Ordering::SeqCst);
        let delay = self.load_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let bytes = self.chunks.lock().get(&pos).cloned();
        bytes.map(|b| document::decode(&b)).transpose()
    }

    fn save_chunk(&self, pos: ChunkPos, doc: &ChunkDocument) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("injected save failure for chunk {pos}");
        }
        let bytes = document::encode(doc)?;
        self.chunks.lock().insert(pos, bytes);
        self.chunk_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_level(&self) -> Result<Option<LevelDocument>> {
        let bytes = self.level.lock().clone();
        bytes.map(|b| document::decode(&b)).transpose()
    }

    fn save_level(&self, doc: &LevelDocument) -> Result<()> {
        *self.level.lock() = Some(document::encode(doc)?);
        Ok(())
    }

    fn load_player(&self, username: &str) -> Result<Option<PlayerDocument>> {
        let bytes = self.players.lock().get(username).cloned();
        bytes.map(|b| document::decode(&b)).transpose()
    }

    fn save_player(&self, username: &str, doc: &PlayerDocument) -> Result<()> {
        let bytes = document::encode(doc)?;
        self.players.lock().insert(username.to_string(), bytes);
        Ok(())
    }
}
