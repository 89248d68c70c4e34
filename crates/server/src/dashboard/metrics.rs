//! Lock-free server counters.
//!
//! Connection and streaming tasks bump these with relaxed atomics; the
//! metrics endpoint reads them whenever it is asked.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::Instant;

use bravo_engine::cache::CacheStatsSnapshot;

pub struct Metrics {
    // Monotonic counters
    chunks_streamed: AtomicU64,
    stream_failures: AtomicU64,
    streams_superseded: AtomicU64,
    block_edits: AtomicU64,
    packets_received: AtomicU64,

    // Gauges
    sessions: AtomicU64,

    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            chunks_streamed: AtomicU64::new(0),
            stream_failures: AtomicU64::new(0),
            streams_superseded: AtomicU64::new(0),
            block_edits: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn chunk_streamed(&self) {
        self.chunks_streamed.fetch_add(1, Relaxed);
    }

    pub fn stream_failed(&self) {
        self.stream_failures.fetch_add(1, Relaxed);
    }

    /// A streaming task was cancelled before it finished.
    pub fn stream_superseded(&self) {
        self.streams_superseded.fetch_add(1, Relaxed);
    }

    pub fn block_edited(&self) {
        self.block_edits.fetch_add(1, Relaxed);
    }

    pub fn packets_received(&self, n: u64) {
        self.packets_received.fetch_add(n, Relaxed);
    }

    pub fn session_opened(&self) {
        self.sessions.fetch_add(1, Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions.fetch_sub(1, Relaxed);
    }

    pub fn snapshot(&self, cache: CacheStatsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            sessions: self.sessions.load(Relaxed),
            chunks_streamed: self.chunks_streamed.load(Relaxed),
            stream_failures: self.stream_failures.load(Relaxed),
            streams_superseded: self.streams_superseded.load(Relaxed),
            block_edits: self.block_edits.load(Relaxed),
            packets_received: self.packets_received.load(Relaxed),
            cache,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub sessions: u64,
    pub chunks_streamed: u64,
    pub stream_failures: u64,
    pub streams_superseded: u64,
    pub block_edits: u64,
    pub packets_received: u64,
    pub cache: CacheStatsSnapshot,
}
