//! Server-wide state: the world cache, level metadata, connected sessions
//! and the world tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use bravo_engine::cache::{CacheError, CacheOptions, WorldCache};
use bravo_engine::generation::GenerationPipeline;
use bravo_engine::persistence::Persistence;
use bravo_engine::world::BlockId;
use bravo_engine::world::block;
use bravo_engine::world::chunk::ChunkStore;
use bravo_engine::world::document::{LevelDocument, PlayerDocument};
use bravo_engine::world::position::{BlockPos, ChunkPos, LocalBlockPos};
use parking_lot::{Mutex, RwLock};
use slotmap::{SlotMap, new_key_type};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dashboard::{Metrics, MetricsSnapshot};
use crate::net::auth::{self, Authenticator};
use crate::net::outbound::Outbound;
use crate::net::visibility::EnabledSet;
use crate::protocol::packets::{DamageUpdate, damage_update};
use crate::protocol::{self, Clientbound, PacketCodec};

/// How long shutdown waits for connections to finish saving.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tunables the core and its connections read at runtime.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub view_distance: i32,
    pub keepalive: Duration,
    pub chunk_timeout: Option<Duration>,
    pub tick: Duration,
    pub time_broadcast_ticks: u64,
    pub evict_every_ticks: u64,
}

impl From<&Config> for CoreSettings {
    fn from(config: &Config) -> Self {
        Self {
            view_distance: config.server.view_distance,
            keepalive: config.keepalive(),
            chunk_timeout: config.chunk_timeout(),
            tick: config.tick(),
            time_broadcast_ticks: config.server.time_broadcast_ticks.max(1),
            evict_every_ticks: config.server.evict_every_ticks.max(1),
        }
    }
}

// ── Sessions ─────────────────────────────────────────────────────────────────

new_key_type! {
    pub struct SessionKey;
}

/// A joined player, as seen by everyone else.
#[derive(Clone)]
pub struct SessionEntry {
    pub username: String,
    pub entity_id: i32,
    pub out: Outbound,
    pub enabled: EnabledSet,
}

/// Joined players. Every operation is brief and never awaits under the lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<SlotMap<SessionKey, SessionEntry>>,
    /// Lowercased names held from login until the connection is torn down.
    names: Mutex<HashSet<String>>,
}

impl SessionRegistry {
    pub fn insert(&self, entry: SessionEntry) -> SessionKey {
        self.sessions.write().insert(entry)
    }

    pub fn remove(&self, key: SessionKey) -> Option<SessionEntry> {
        self.sessions.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Claim `username` for one connection. `false` if another connection,
    /// joined or still joining, holds it in any letter case.
    pub fn try_reserve(&self, username: &str) -> bool {
        self.names.lock().insert(username.to_ascii_lowercase())
    }

    pub fn release_name(&self, username: &str) {
        self.names.lock().remove(&username.to_ascii_lowercase());
    }

    pub fn is_reserved(&self, username: &str) -> bool {
        self.names.lock().contains(&username.to_ascii_lowercase())
    }

    pub fn usernames(&self) -> Vec<String> {
        self.sessions
            .read()
            .values()
            .map(|s| s.username.clone())
            .collect()
    }

    /// Writers of every session matching `filter`.
    fn recipients(&self, filter: impl Fn(&SessionEntry) -> bool) -> Vec<Outbound> {
        self.sessions
            .read()
            .values()
            .filter(|s| filter(s))
            .map(|s| s.out.clone())
            .collect()
    }
}

// ── Core ─────────────────────────────────────────────────────────────────────

struct LevelState {
    seed: u64,
    spawn: BlockPos,
    time: i64,
}

pub struct ServerCore {
    settings: CoreSettings,
    cache: WorldCache,
    auth: Arc<dyn Authenticator>,
    sessions: SessionRegistry,
    level: Mutex<LevelState>,
    ticks: AtomicU64,
    next_entity_id: AtomicI32,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    codec: PacketCodec,
}

/// Run a persistence call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow!("blocking task failed: {e}"))?
}

impl ServerCore {
    /// Load (or create) the level, build the generation pipeline and the
    /// authenticator named in `config`.
    pub async fn open(config: &Config, persistence: Arc<dyn Persistence>) -> Result<Arc<Self>> {
        let pipeline = GenerationPipeline::from_names(config.world.generators.as_slice())?;
        let authenticator = auth::by_name(&config.server.authenticator, &config.server.whitelist)?;

        let store = persistence.clone();
        let stored = blocking(move || store.load_level())
            .await
            .context("loading level metadata")?;
        let (seed, spawn, time) = match &stored {
            Some(level) => (level.seed(), Some(level.spawn()), level.time()),
            None => (config.world.seed.unwrap_or_else(rand::random), None, 0),
        };

        let cache = WorldCache::new(
            persistence,
            Arc::new(pipeline),
            CacheOptions {
                seed,
                overflow_capacity: config.world.overflow_capacity,
            },
        );
        cache.set_world_time(time);

        let spawn = match spawn {
            Some(spawn) => spawn,
            None => find_spawn(&cache).await?,
        };

        let core = Arc::new(Self {
            settings: CoreSettings::from(config),
            cache,
            auth: authenticator,
            sessions: SessionRegistry::default(),
            level: Mutex::new(LevelState { seed, spawn, time }),
            ticks: AtomicU64::new(0),
            next_entity_id: AtomicI32::new(1),
            metrics: Arc::new(Metrics::new()),
            shutdown: CancellationToken::new(),
            codec: protocol::clientbound(),
        });

        if stored.is_none() {
            core.save_level().await?;
            tracing::info!("Created level with seed {}, spawn at {:?}", seed, spawn);
        } else {
            tracing::info!("Loaded level with seed {}, time {}", seed, time);
        }
        Ok(core)
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    pub fn cache(&self) -> &WorldCache {
        &self.cache
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.auth
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.cache.stats())
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn seed(&self) -> u64 {
        self.level.lock().seed
    }

    pub fn spawn(&self) -> BlockPos {
        self.level.lock().spawn
    }

    pub fn time(&self) -> i64 {
        self.level.lock().time
    }

    pub fn allocate_entity_id(&self) -> i32 {
        self.next_entity_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, entry: SessionEntry) -> SessionKey {
        tracing::info!("{} joined (entity {})", entry.username, entry.entity_id);
        self.metrics.session_opened();
        self.sessions.insert(entry)
    }

    pub fn unregister(&self, key: SessionKey) {
        if let Some(entry) = self.sessions.remove(key) {
            self.metrics.session_closed();
            tracing::info!("{} left", entry.username);
        }
    }

    // ── Sending ──────────────────────────────────────────────────────────

    /// Send to every joined session.
    pub async fn broadcast(&self, packet: &Clientbound) {
        self.send_matching(packet, |_| true).await;
    }

    /// Send to the sessions that have `pos` enabled.
    pub async fn send_to_viewers(&self, pos: ChunkPos, packet: &Clientbound) {
        self.send_matching(packet, |s| s.enabled.lock().contains(&pos))
            .await;
    }

    async fn send_matching(&self, packet: &Clientbound, filter: impl Fn(&SessionEntry) -> bool) {
        let bytes = match packet.encode(&self.codec) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Cannot encode {:?}: {}", packet, e);
                return;
            }
        };
        for out in self.sessions.recipients(filter) {
            if let Err(e) = out.send_raw(&bytes).await {
                tracing::debug!("Dropping send to closed session: {}", e);
            }
        }
    }

    /// Relay a chat line from `from` to everyone.
    pub async fn chat(&self, from: &str, message: &str) {
        let line = format!("<{}> {}", from, message);
        tracing::info!("{}", line);
        self.broadcast(&Clientbound::Chat { message: line }).await;
    }

    // ── World edits ──────────────────────────────────────────────────────

    /// Change one block and push the change to every viewer. `Ok(false)`
    /// when nothing changed or `pos` is outside the world.
    pub async fn set_block(&self, pos: BlockPos, block: BlockId, metadata: u8) -> Result<bool, CacheError> {
        self.edit_block(pos, |chunk, local| {
            let block_changed = chunk.set_block(local, block);
            let meta_changed = chunk.set_metadata(local, metadata);
            block_changed || meta_changed
        })
        .await
    }

    /// Like [`set_block`](Self::set_block), but only over a block a player
    /// may build into.
    pub async fn place_block(&self, pos: BlockPos, block: BlockId, metadata: u8) -> Result<bool, CacheError> {
        self.edit_block(pos, |chunk, local| {
            if !block::is_replaceable(chunk.get_block(local)) {
                return false;
            }
            let block_changed = chunk.set_block(local, block);
            let meta_changed = chunk.set_metadata(local, metadata);
            block_changed || meta_changed
        })
        .await
    }

    async fn edit_block(
        &self,
        pos: BlockPos,
        edit: impl FnOnce(&mut ChunkStore, LocalBlockPos) -> bool,
    ) -> Result<bool, CacheError> {
        let Some(local) = pos.local() else {
            return Ok(false);
        };
        let handle = self.cache.request(pos.chunk()).await?;
        let changed = edit(&mut handle.lock(), local);
        if changed {
            self.metrics.block_edited();
            self.flush_damage(pos.chunk()).await;
        }
        Ok(changed)
    }

    /// Send pending damage of a resident chunk to its viewers, then clear
    /// it.
    pub async fn flush_damage(&self, pos: ChunkPos) {
        let Some(handle) = self.cache.resident(pos) else {
            return;
        };
        let update = {
            let mut chunk = handle.lock();
            let update = damage_update(&chunk);
            chunk.clear_damage();
            update
        };
        let packet = match update {
            None => return,
            Some(DamageUpdate::Packet(packet)) => packet,
            Some(DamageUpdate::Resend(snapshot)) => {
                match tokio::task::spawn_blocking(move || snapshot.into_packet()).await {
                    Ok(Ok(packet)) => packet,
                    Ok(Err(e)) => {
                        tracing::warn!("Cannot compress chunk {}: {}", pos, e);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("Compression task for chunk {} failed: {}", pos, e);
                        return;
                    }
                }
            }
        };
        self.send_to_viewers(pos, &packet).await;
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    /// Advance the world by one tick.
    pub async fn tick(&self) {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let time = {
            let mut level = self.level.lock();
            level.time += 1;
            level.time
        };
        self.cache.set_world_time(time);

        if tick % self.settings.time_broadcast_ticks == 0 {
            self.broadcast(&Clientbound::TimeUpdate { time }).await;
        }
        if tick % self.settings.evict_every_ticks == 0 {
            let report = self.cache.evict_unused().await;
            for failure in &report.failures {
                tracing::warn!("Kept chunk {} hot: {}", failure.pos(), failure);
            }
        }
    }

    /// Run [`tick`](Self::tick) on the configured interval until shutdown.
    pub fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(core.settings.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => core.tick().await,
                    _ = core.shutdown.cancelled() => break,
                }
            }
        })
    }

    // ── Persistence ──────────────────────────────────────────────────────

    pub async fn load_player(&self, username: &str) -> Result<Option<PlayerDocument>> {
        let store = self.cache.persistence().clone();
        let name = username.to_string();
        blocking(move || store.load_player(&name))
            .await
            .with_context(|| format!("loading player {}", username))
    }

    pub async fn save_player(&self, username: &str, doc: PlayerDocument) -> Result<()> {
        let store = self.cache.persistence().clone();
        let name = username.to_string();
        blocking(move || store.save_player(&name, &doc))
            .await
            .with_context(|| format!("saving player {}", username))
    }

    pub async fn save_level(&self) -> Result<()> {
        let doc = {
            let level = self.level.lock();
            LevelDocument::new(level.seed, level.spawn, level.time)
        };
        let store = self.cache.persistence().clone();
        blocking(move || store.save_level(&doc))
            .await
            .context("saving level metadata")
    }

    /// Save the level and every dirty chunk. Returns the number of chunks
    /// written.
    pub async fn save_world(&self) -> Result<usize> {
        self.save_level().await?;
        let report = self.cache.save_all().await;
        if let Some(first) = report.failures.first() {
            return Err(anyhow!(
                "{} chunks failed to save, first: {}",
                report.failures.len(),
                first
            ));
        }
        Ok(report.saved)
    }

    /// Disconnect everyone, wait for their player data to be written, then
    /// flush the world.
    pub async fn shutdown(&self) -> Result<usize> {
        self.shutdown.cancel();
        let waited = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while !self.sessions.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if waited.is_err() {
            tracing::warn!(
                "{} sessions still open after {:?}",
                self.sessions.len(),
                SHUTDOWN_GRACE
            );
        }
        self.save_world().await
    }
}

/// Stand on the surface at the middle of chunk (0, 0).
async fn find_spawn(cache: &WorldCache) -> Result<BlockPos> {
    let handle = cache
        .request(ChunkPos::new(0, 0))
        .await
        .context("generating spawn chunk")?;
    let height = handle.lock().height_at(8, 8) as i32;
    Ok(BlockPos::new(8, height + 1, 8))
}
