//! Keeps a client's loaded chunks equal to the square around its position.
//!
//! Each move across a chunk boundary starts a new streaming task and
//! cancels the previous one. The task sends the missing chunks nearest
//! first, then tells the client to forget the ones now out of range.
//!
//! The enabled set only ever records what was fully written: a coordinate is
//! inserted after its chunk packet is on the wire and removed after its
//! forget packet is. Cancellation is checked between chunks, never during a
//! write. Interest in a chunk is taken before it is requested.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bravo_engine::cache::{ChunkHandle, WorldCache};
use bravo_engine::world::position::ChunkPos;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::outbound::Outbound;
use crate::dashboard::Metrics;
use crate::protocol::Clientbound;
use crate::protocol::packets::ChunkSnapshot;

/// Coordinates a client currently has loaded. Shared with the session
/// registry so edits can be routed to viewers.
pub type EnabledSet = Arc<Mutex<HashSet<ChunkPos>>>;

/// What has to change to go from `enabled` to the square around a center.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkDelta {
    /// Nearest first.
    pub to_enable: Vec<ChunkPos>,
    pub to_disable: Vec<ChunkPos>,
}

impl ChunkDelta {
    pub fn is_empty(&self) -> bool {
        self.to_enable.is_empty() && self.to_disable.is_empty()
    }
}

pub fn compute_delta(enabled: &HashSet<ChunkPos>, center: ChunkPos, radius: i32) -> ChunkDelta {
    let needed: HashSet<ChunkPos> = center.square_around(radius).collect();

    let mut to_enable: Vec<ChunkPos> = needed.difference(enabled).copied().collect();
    to_enable.sort_by_key(|p| (p.distance_sq(center), *p));

    let mut to_disable: Vec<ChunkPos> = enabled.difference(&needed).copied().collect();
    to_disable.sort();

    ChunkDelta {
        to_enable,
        to_disable,
    }
}

struct Running {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Everything a streaming task needs, cloned into it.
#[derive(Clone)]
struct StreamContext {
    cache: WorldCache,
    out: Outbound,
    enabled: EnabledSet,
    timeout: Option<Duration>,
    metrics: Arc<Metrics>,
}

pub struct VisibilityStreamer {
    ctx: StreamContext,
    radius: i32,
    running: Option<Running>,
}

impl VisibilityStreamer {
    pub fn new(
        cache: WorldCache,
        out: Outbound,
        enabled: EnabledSet,
        radius: i32,
        timeout: Option<Duration>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            ctx: StreamContext {
                cache,
                out,
                enabled,
                timeout,
                metrics,
            },
            radius: radius.max(0),
            running: None,
        }
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    pub fn enabled(&self) -> &EnabledSet {
        &self.ctx.enabled
    }

    /// Supersede any running stream with one centred on `center`.
    ///
    /// Waits for the previous task to stop so the delta is computed against
    /// what was actually sent.
    pub async fn update(&mut self, center: ChunkPos) {
        self.cancel().await;

        let delta = compute_delta(&self.ctx.enabled.lock(), center, self.radius);
        if delta.is_empty() {
            return;
        }
        tracing::debug!(
            "streaming around {}: +{} -{}",
            center,
            delta.to_enable.len(),
            delta.to_disable.len()
        );

        let token = CancellationToken::new();
        let task = tokio::spawn(stream(self.ctx.clone(), delta, token.clone()));
        self.running = Some(Running { token, task });
    }

    /// Wait for the current stream to finish on its own.
    pub async fn wait_idle(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.task.await;
        }
    }

    /// Stop streaming and drop interest in every enabled chunk. Nothing is
    /// sent; the connection is going away.
    pub async fn disconnect(&mut self) {
        self.cancel().await;
        self.release_all();
    }

    /// Forget every enabled chunk and drop interest in it, without waiting
    /// for a running stream. Chunks that stream goes on to enable stay held.
    pub fn release_all(&self) {
        let enabled: Vec<ChunkPos> = self.ctx.enabled.lock().drain().collect();
        for pos in enabled {
            self.ctx.cache.release(pos);
        }
    }

    /// Move the running stream and the enabled set into a new streamer,
    /// leaving this one idle.
    pub fn detach(&mut self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            radius: self.radius,
            running: self.running.take(),
        }
    }

    /// Stop the running stream, if any, and wait for it to exit. Whatever
    /// it already wrote stays enabled.
    pub async fn cancel(&mut self) {
        if let Some(running) = self.running.take() {
            if !running.task.is_finished() {
                self.ctx.metrics.stream_superseded();
            }
            running.token.cancel();
            if let Err(e) = running.task.await {
                tracing::warn!("streaming task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for VisibilityStreamer {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.token.cancel();
        }
    }
}

/// Send one chunk as pre-chunk plus map-chunk in a single write. Returns
/// the chunk revision the packet was built from.
pub async fn send_chunk(out: &Outbound, handle: &ChunkHandle) -> Result<u64, String> {
    let (snapshot, revision) = {
        let chunk = handle.lock();
        (ChunkSnapshot::take(&chunk), chunk.revision())
    };
    let pos = snapshot.pos;
    let packet = tokio::task::spawn_blocking(move || snapshot.into_packet())
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

    let mut bytes = Clientbound::PreChunk { pos, enable: true }
        .encode(out.codec())
        .map_err(|e| e.to_string())?;
    bytes.extend(packet.encode(out.codec()).map_err(|e| e.to_string())?);
    out.send_raw(&bytes).await.map_err(|e| e.to_string())?;
    Ok(revision)
}

/// Send a chunk and mark it enabled, then resend until no edit landed
/// while a copy was in flight.
///
/// Edits made before the insertion were flushed to viewers this client was
/// not yet one of; the revision check catches them. Edits after it reach
/// the client as damage packets like every other viewer's.
pub async fn deliver(out: &Outbound, enabled: &EnabledSet, handle: &ChunkHandle) -> Result<(), String> {
    let pos = handle.lock().pos();
    let mut sent = send_chunk(out, handle).await?;
    enabled.lock().insert(pos);
    while handle.lock().revision() != sent {
        tracing::debug!("chunk {} changed while being sent, resending", pos);
        sent = send_chunk(out, handle).await?;
    }
    Ok(())
}

async fn request(ctx: &StreamContext, pos: ChunkPos) -> Result<ChunkHandle, String> {
    match ctx.timeout {
        None => ctx.cache.request(pos).await.map_err(|e| e.to_string()),
        Some(limit) => match tokio::time::timeout(limit, ctx.cache.request(pos)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("loading chunk {pos} timed out after {limit:?}")),
        },
    }
}

async fn stream(ctx: StreamContext, delta: ChunkDelta, token: CancellationToken) {
    for pos in delta.to_enable {
        if token.is_cancelled() {
            return;
        }
        // Held before the load so eviction cannot drop it in between.
        ctx.cache.retain(pos);
        let handle = tokio::select! {
            biased;
            _ = token.cancelled() => {
                ctx.cache.release(pos);
                return;
            }
            result = request(&ctx, pos) => result,
        };
        let handle = match handle {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!("skipping chunk {}: {}", pos, e);
                ctx.cache.release(pos);
                ctx.metrics.stream_failed();
                continue;
            }
        };

        if let Err(e) = deliver(&ctx.out, &ctx.enabled, &handle).await {
            tracing::debug!("stopped streaming at {}: {}", pos, e);
            // Enabled chunks are released on disconnect.
            if !ctx.enabled.lock().contains(&pos) {
                ctx.cache.release(pos);
            }
            return;
        }
        ctx.metrics.chunk_streamed();
    }

    for pos in delta.to_disable {
        if token.is_cancelled() {
            return;
        }
        let forget = Clientbound::PreChunk { pos, enable: false };
        if let Err(e) = ctx.out.send(&forget).await {
            tracing::debug!("stopped unloading at {}: {}", pos, e);
            return;
        }
        ctx.enabled.lock().remove(&pos);
        ctx.cache.release(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_from_empty_is_the_whole_square() {
        let delta = compute_delta(&HashSet::new(), ChunkPos::new(0, 0), 1);
        assert_eq!(delta.to_enable.len(), 9);
        assert_eq!(delta.to_enable[0], ChunkPos::new(0, 0));
        assert!(delta.to_disable.is_empty());
    }

    #[test]
    fn unchanged_position_needs_nothing() {
        let enabled: HashSet<_> = ChunkPos::new(3, 3).square_around(2).collect();
        assert!(compute_delta(&enabled, ChunkPos::new(3, 3), 2).is_empty());
    }
}
