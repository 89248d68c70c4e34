//! The world cache: one authoritative `ChunkStore` per coordinate.
//!
//! Each coordinate is Absent, Loading or Resident. The Absent→Loading step
//! happens under the hot map's entry lock, so at most one load-or-generate
//! runs per coordinate and every concurrent requester awaits that same
//! result.
//!
//! Lock order: overflow mutex, then a hot-map shard, then an interest shard,
//! then a chunk mutex. Nothing takes them in the other direction.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use anyhow::anyhow;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::generation::GenerationPipeline;
use crate::persistence::Persistence;
use crate::world::chunk::ChunkStore;
use crate::world::document::DocumentError;
use crate::world::position::ChunkPos;

/// Shared handle to a resident chunk. Every session viewing the chunk holds a
/// clone of the same handle; mutation is serialized by the mutex.
pub type ChunkHandle = Arc<Mutex<ChunkStore>>;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("loading chunk {pos} failed: {cause:#}")]
    Load {
        pos: ChunkPos,
        cause: Arc<anyhow::Error>,
    },
    #[error("saving chunk {pos} failed: {cause:#}")]
    Save {
        pos: ChunkPos,
        cause: Arc<anyhow::Error>,
    },
    #[error("loader for chunk {0} stopped without a result")]
    Abandoned(ChunkPos),
}

impl CacheError {
    fn load(pos: ChunkPos, cause: anyhow::Error) -> Self {
        Self::Load {
            pos,
            cause: Arc::new(cause),
        }
    }

    pub fn pos(&self) -> ChunkPos {
        match self {
            Self::Load { pos, .. } | Self::Save { pos, .. } => *pos,
            Self::Abandoned(pos) => *pos,
        }
    }
}

type LoadOutcome = Option<Result<ChunkHandle, CacheError>>;

enum Slot {
    Loading(watch::Receiver<LoadOutcome>),
    Resident(ChunkHandle),
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub seed: u64,
    /// Clean chunks kept after eviction for cheap resurrection. Zero disables
    /// the overflow tier.
    pub overflow_capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            overflow_capacity: 256,
        }
    }
}

#[derive(Default)]
struct CacheStats {
    loads: AtomicU64,
    generations: AtomicU64,
    resurrections: AtomicU64,
    save_failures: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub loads: u64,
    pub generations: u64,
    pub resurrections: u64,
    pub save_failures: u64,
    pub resident: usize,
    pub overflow: usize,
}

/// Outcome of a bulk save.
#[derive(Debug, Default)]
pub struct SaveReport {
    pub saved: usize,
    pub failures: Vec<CacheError>,
}

/// Outcome of an eviction pass.
#[derive(Debug, Default)]
pub struct EvictReport {
    pub evicted: usize,
    pub saved: usize,
    pub failures: Vec<CacheError>,
}

struct Inner {
    slots: DashMap<ChunkPos, Slot>,
    overflow: Mutex<IndexMap<ChunkPos, ChunkHandle>>,
    interest: DashMap<ChunkPos, usize>,
    persistence: Arc<dyn Persistence>,
    pipeline: Arc<GenerationPipeline>,
    options: CacheOptions,
    /// World time stamped into saved documents.
    world_time: AtomicI64,
    stats: CacheStats,
}

#[derive(Clone)]
pub struct WorldCache {
    inner: Arc<Inner>,
}

impl WorldCache {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        pipeline: Arc<GenerationPipeline>,
        options: CacheOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                overflow: Mutex::new(IndexMap::new()),
                interest: DashMap::new(),
                persistence,
                pipeline,
                options,
                world_time: AtomicI64::new(0),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn seed(&self) -> u64 {
        self.inner.options.seed
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.inner.persistence
    }

    pub fn set_world_time(&self, time: i64) {
        self.inner.world_time.store(time, Ordering::Relaxed);
    }

    // ── Request ──────────────────────────────────────────────────────────

    /// The chunk at `pos`, loading or generating it if needed.
    ///
    /// Concurrent calls for a coordinate that is not resident share a single
    /// load. The load runs in its own task, so dropping this future never
    /// strands the other waiters.
    pub async fn request(&self, pos: ChunkPos) -> Result<ChunkHandle, CacheError> {
        let mut rx = match self.attach(pos) {
            Attached::Ready(handle) => return Ok(handle),
            Attached::Waiting(rx) => rx,
        };
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CacheError::Abandoned(pos))?;
        match &*outcome {
            Some(result) => result.clone(),
            None => Err(CacheError::Abandoned(pos)),
        }
    }

    fn attach(&self, pos: ChunkPos) -> Attached {
        if let Some(slot) = self.inner.slots.get(&pos) {
            return Attached::from_slot(&slot);
        }

        let mut overflow = self.inner.overflow.lock();
        match self.inner.slots.entry(pos) {
            Entry::Occupied(entry) => Attached::from_slot(entry.get()),
            Entry::Vacant(entry) => {
                if let Some(handle) = overflow.shift_remove(&pos) {
                    entry.insert(Slot::Resident(handle.clone()));
                    self.inner.stats.resurrections.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("Resurrected chunk {} from overflow", pos);
                    return Attached::Ready(handle);
                }
                let (tx, rx) = watch::channel(None);
                entry.insert(Slot::Loading(rx.clone()));
                drop(overflow);
                tokio::spawn(Inner::run_loader(self.inner.clone(), pos, tx));
                Attached::Waiting(rx)
            }
        }
    }

    /// The chunk at `pos` if it is already resident. Never loads.
    pub fn resident(&self, pos: ChunkPos) -> Option<ChunkHandle> {
        match self.inner.slots.get(&pos).as_deref() {
            Some(Slot::Resident(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn is_loading(&self, pos: ChunkPos) -> bool {
        matches!(self.inner.slots.get(&pos).as_deref(), Some(Slot::Loading(_)))
    }

    /// Number of hot entries, including in-flight loads.
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn overflow_len(&self) -> usize {
        self.inner.overflow.lock().len()
    }

    // ── Interest ─────────────────────────────────────────────────────────

    /// Record that one more session has this chunk enabled, or is loading
    /// it to enable it.
    pub fn retain(&self, pos: ChunkPos) {
        *self.inner.interest.entry(pos).or_insert(0) += 1;
    }

    /// Undo one `retain`.
    pub fn release(&self, pos: ChunkPos) {
        if let Entry::Occupied(mut entry) = self.inner.interest.entry(pos) {
            let count = entry.get_mut();
            *count = count.saturating_sub(1);
            if *count == 0 {
                entry.remove();
            }
        }
    }

    pub fn interest(&self, pos: ChunkPos) -> usize {
        self.inner.interest.get(&pos).map(|c| *c).unwrap_or(0)
    }

    // ── Save & evict ─────────────────────────────────────────────────────

    /// Save one resident chunk if dirty. `Ok(false)` when there was nothing
    /// to write.
    pub async fn save(&self, pos: ChunkPos) -> Result<bool, CacheError> {
        let Some(handle) = self.resident(pos) else {
            return Ok(false);
        };
        let inner = self.inner.clone();
        match tokio::task::spawn_blocking(move || inner.save_one(pos, &handle)).await {
            Ok(result) => result,
            Err(e) => Err(CacheError::Save {
                pos,
                cause: Arc::new(anyhow!("save task failed: {e}")),
            }),
        }
    }

    /// Save every dirty resident chunk, in parallel.
    pub async fn save_all(&self) -> SaveReport {
        let handles = self.resident_handles(|_| true);
        let inner = self.inner.clone();
        let results = tokio::task::spawn_blocking(move || inner.save_many(&handles)).await;
        let mut report = SaveReport::default();
        match results {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(true) => report.saved += 1,
                        Ok(false) => {}
                        Err(e) => report.failures.push(e),
                    }
                }
            }
            Err(e) => tracing::error!("Bulk save task failed: {}", e),
        }
        if report.saved > 0 || !report.failures.is_empty() {
            tracing::info!(
                "Saved {} chunks ({} failed)",
                report.saved,
                report.failures.len()
            );
        }
        report
    }

    /// Drop chunks no session has enabled from the hot set.
    ///
    /// Dirty chunks are saved first; a chunk whose save fails stays hot and
    /// dirty. Evicted chunks move to the overflow tier.
    pub async fn evict_unused(&self) -> EvictReport {
        let inner = self.inner.clone();
        let candidates = self.resident_handles(|pos| inner.interest_of(pos) == 0);
        let mut report = EvictReport::default();
        if candidates.is_empty() {
            return report;
        }

        let saver = self.inner.clone();
        let to_save = candidates.clone();
        let results = match tokio::task::spawn_blocking(move || saver.save_many(&to_save)).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("Eviction save task failed: {}", e);
                return report;
            }
        };

        let mut overflow = self.inner.overflow.lock();
        for ((pos, handle), result) in candidates.into_iter().zip(results) {
            match result {
                Ok(saved) => report.saved += saved as usize,
                Err(e) => {
                    report.failures.push(e);
                    continue;
                }
            }
            let removed = self.inner.slots.remove_if(&pos, |_, slot| {
                matches!(slot, Slot::Resident(h) if Arc::ptr_eq(h, &handle))
                    && self.inner.interest_of(pos) == 0
                    && !handle.lock().is_dirty()
            });
            if removed.is_none() {
                continue;
            }
            report.evicted += 1;
            if self.inner.options.overflow_capacity > 0 {
                overflow.insert(pos, handle);
            }
        }

        while overflow.len() > self.inner.options.overflow_capacity {
            let Some((pos, handle)) = overflow.shift_remove_index(0) else {
                break;
            };
            // Edited through a stale handle after eviction: keep it hot so
            // the next pass saves it.
            if handle.lock().is_dirty() {
                self.inner.slots.entry(pos).or_insert(Slot::Resident(handle));
            }
        }
        drop(overflow);

        if report.evicted > 0 {
            tracing::debug!(
                "Evicted {} chunks ({} saved first, {} overflow)",
                report.evicted,
                report.saved,
                self.overflow_len()
            );
        }
        report
    }

    fn resident_handles(&self, keep: impl Fn(ChunkPos) -> bool) -> Vec<(ChunkPos, ChunkHandle)> {
        self.inner
            .slots
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Resident(handle) if keep(*entry.key()) => Some((*entry.key(), handle.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let stats = &self.inner.stats;
        CacheStatsSnapshot {
            loads: stats.loads.load(Ordering::Relaxed),
            generations: stats.generations.load(Ordering::Relaxed),
            resurrections: stats.resurrections.load(Ordering::Relaxed),
            save_failures: stats.save_failures.load(Ordering::Relaxed),
            resident: self.len(),
            overflow: self.overflow_len(),
        }
    }
}

enum Attached {
    Ready(ChunkHandle),
    Waiting(watch::Receiver<LoadOutcome>),
}

impl Attached {
    fn from_slot(slot: &Slot) -> Self {
        match slot {
            Slot::Resident(handle) => Self::Ready(handle.clone()),
            Slot::Loading(rx) => Self::Waiting(rx.clone()),
        }
    }
}

impl Inner {
    async fn run_loader(self: Arc<Self>, pos: ChunkPos, tx: watch::Sender<LoadOutcome>) {
        let worker = self.clone();
        let result = match tokio::task::spawn_blocking(move || worker.load_or_generate(pos)).await {
            Ok(result) => result,
            Err(e) => Err(CacheError::load(pos, anyhow!("loader task failed: {e}"))),
        };
        let result = result.map(|chunk| Arc::new(Mutex::new(chunk)));

        match &result {
            Ok(handle) => {
                self.slots.insert(pos, Slot::Resident(handle.clone()));
            }
            Err(e) => {
                tracing::warn!("{}", e);
                self.slots
                    .remove_if(&pos, |_, slot| matches!(slot, Slot::Loading(_)));
            }
        }
        tx.send_replace(Some(result));
    }

    fn load_or_generate(&self, pos: ChunkPos) -> Result<ChunkStore, CacheError> {
        let loaded = self
            .persistence
            .load_chunk(pos)
            .map_err(|e| CacheError::load(pos, e.context("persistence load failed")))?;

        if let Some(doc) = loaded {
            if doc.pos() != pos {
                let err = DocumentError::WrongChunk {
                    expected: pos,
                    found: doc.pos(),
                };
                return Err(CacheError::load(pos, err.into()));
            }
            let chunk = ChunkStore::from_document(doc).map_err(|e| CacheError::load(pos, e.into()))?;
            self.stats.loads.fetch_add(1, Ordering::Relaxed);
            if chunk.is_populated() {
                return Ok(chunk);
            }
        }

        let mut chunk = ChunkStore::new(pos);
        self.pipeline.generate(&mut chunk, self.options.seed);
        self.stats.generations.fetch_add(1, Ordering::Relaxed);
        Ok(chunk)
    }

    fn interest_of(&self, pos: ChunkPos) -> usize {
        self.interest.get(&pos).map(|c| *c).unwrap_or(0)
    }

    fn save_many(&self, handles: &[(ChunkPos, ChunkHandle)]) -> Vec<Result<bool, CacheError>> {
        handles
            .par_iter()
            .map(|(pos, handle)| self.save_one(*pos, handle))
            .collect()
    }

    /// Write one chunk if dirty. The dirty flag is cleared only if nothing
    /// edited the chunk while its snapshot was being written.
    fn save_one(&self, pos: ChunkPos, handle: &ChunkHandle) -> Result<bool, CacheError> {
        let (revision, doc) = {
            let chunk = handle.lock();
            if !chunk.is_dirty() {
                return Ok(false);
            }
            let time = self.world_time.load(Ordering::Relaxed);
            (chunk.revision(), chunk.to_document(time))
        };

        match self.persistence.save_chunk(pos, &doc) {
            Ok(()) => {
                if !handle.lock().mark_clean(revision) {
                    tracing::trace!("Chunk {} edited during save; still dirty", pos);
                }
                Ok(true)
            }
            Err(e) => {
                self.stats.save_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Saving chunk {} failed: {:#}", pos, e);
                Err(CacheError::Save {
                    pos,
                    cause: Arc::new(e),
                })
            }
        }
    }
}
