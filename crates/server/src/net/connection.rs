//! Per-client connection handler.
//!
//! Handshake -> Login -> Play. World packets only take effect once the
//! player has been given a position (`Located`); before that they are
//! dropped.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bravo_engine::world::document::PlayerDocument;
use bravo_engine::world::{BlockId, BlockPos};
use bravo_engine::world::block;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use super::auth::{HandshakeOutcome, LoginOutcome, LoginRequest};
use super::outbound::Outbound;
use super::session::{AuthStage, Inventory, Location, SessionError, StageMachine};
use super::visibility::{EnabledSet, VisibilityStreamer, deliver};
use crate::protocol::{self, Clientbound, Decoded, ItemStack, PROTOCOL_VERSION, Serverbound};
use crate::server::{ServerCore, SessionEntry, SessionKey};

/// Bytes read from the transport per call.
const READ_CHUNK: usize = 4096;

/// Digging status sent when a block is broken.
const DIG_FINISHED: i8 = 2;

/// Farthest block centre a player may dig or build at, in blocks.
const MAX_REACH: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Handle a single client connection until it closes.
pub async fn handle<S>(stream: S, peer: SocketAddr, core: Arc<ServerCore>) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read, write) = tokio::io::split(stream);
    let out = Outbound::new(write);
    let mut session = Session::new(peer, core, out);

    let result = session.run(&mut read).await;
    session.finish().await;
    result
}

struct Session {
    peer: SocketAddr,
    core: Arc<ServerCore>,
    out: Outbound,
    stage: StageMachine,
    /// Name given in the handshake, checked again at login.
    handshake_username: Option<String>,
    username: Option<String>,
    location: Location,
    inventory: Inventory,
    streamer: VisibilityStreamer,
    key: Option<SessionKey>,
    /// Name held in the registry from login on.
    reserved: Option<String>,
    finished: bool,
}

impl Session {
    fn new(peer: SocketAddr, core: Arc<ServerCore>, out: Outbound) -> Self {
        let settings = core.settings();
        let streamer = VisibilityStreamer::new(
            core.cache().clone(),
            out.clone(),
            EnabledSet::default(),
            settings.view_distance,
            settings.chunk_timeout,
            Arc::clone(core.metrics()),
        );
        let location = Location::at_spawn(core.spawn());
        Self {
            peer,
            core,
            out,
            stage: StageMachine::default(),
            handshake_username: None,
            username: None,
            location,
            inventory: Inventory::default(),
            streamer,
            key: None,
            reserved: None,
            finished: false,
        }
    }

    fn name(&self) -> &str {
        self.username.as_deref().unwrap_or("(unknown)")
    }

    // ── Main loop: keep-alive + incoming packets ─────────────────────────

    async fn run<R>(&mut self, read: &mut R) -> Result<(), SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let codec = protocol::serverbound();
        let shutdown = self.core.shutdown_token().clone();
        let mut keepalive = tokio::time::interval(self.core.settings().keepalive);
        // The first tick is immediate.
        keepalive.tick().await;

        let mut pending: Vec<u8> = Vec::new();
        let mut scratch = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.kick("Server shutting down").await;
                    return Ok(());
                }
                _ = keepalive.tick() => {
                    if self.stage.stage() >= AuthStage::Authenticated {
                        self.out.send(&Clientbound::KeepAlive).await?;
                    }
                }
                result = read.read(&mut scratch) => {
                    let n = result?;
                    if n == 0 {
                        tracing::debug!("{} closed the connection", self.peer);
                        return Ok(());
                    }
                    pending.extend_from_slice(&scratch[..n]);

                    let (packets, rest) = match codec.parse_stream(&pending) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            tracing::warn!("Bad packet from {}: {}", self.peer, e);
                            self.kick(&e.to_string()).await;
                            return Err(e.into());
                        }
                    };
                    pending = rest;
                    self.core.metrics().packets_received(packets.len() as u64);

                    for decoded in &packets {
                        if self.dispatch(decoded).await? == Flow::Close {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, decoded: &Decoded) -> Result<Flow, SessionError> {
        let Some(packet) = Serverbound::from_decoded(decoded)? else {
            tracing::debug!("Ignoring {} from {}", decoded.name, self.peer);
            return Ok(Flow::Continue);
        };

        match packet {
            Serverbound::KeepAlive => {}
            Serverbound::Disconnect { reason } => {
                tracing::info!("{} disconnected: {}", self.name(), reason);
                return Ok(Flow::Close);
            }
            Serverbound::Handshake { username } => self.on_handshake(username).await?,
            Serverbound::Login { protocol, username } => self.on_login(protocol, username).await?,
            other if !self.stage.is(AuthStage::Located) => {
                tracing::debug!("Dropping {:?} from {} while {}", other, self.peer, self.stage.stage());
            }
            other => self.on_play(other).await?,
        }
        Ok(Flow::Continue)
    }

    // ── Handshake and login ──────────────────────────────────────────────

    async fn on_handshake(&mut self, username: String) -> Result<(), SessionError> {
        if !self.stage.is(AuthStage::Unauthenticated) {
            return self.out_of_order("handshake").await;
        }
        match self.core.authenticator().handshake(self.peer, &username).await {
            HandshakeOutcome::Continue { challenge } => {
                self.stage.advance(AuthStage::Challenged)?;
                tracing::debug!("Handshake from {} as {}", self.peer, username);
                self.handshake_username = Some(username);
                self.out.send(&Clientbound::Handshake { challenge }).await?;
                Ok(())
            }
            HandshakeOutcome::Reject(reason) => self.reject(reason).await,
        }
    }

    async fn on_login(&mut self, protocol: i32, username: String) -> Result<(), SessionError> {
        if !self.stage.is(AuthStage::Challenged) {
            return self.out_of_order("login").await;
        }
        if protocol < PROTOCOL_VERSION {
            return self.reject("Outdated client!".into()).await;
        }
        if protocol > PROTOCOL_VERSION {
            return self.reject("Outdated server!".into()).await;
        }
        // Held until teardown, so a second login racing this one is
        // refused even before this one registers.
        if !self.core.sessions().try_reserve(&username) {
            return self.reject("Already logged in".into()).await;
        }
        self.reserved = Some(username.clone());

        let request = LoginRequest {
            username: username.clone(),
            handshake_username: self.handshake_username.clone().unwrap_or_default(),
            protocol,
        };
        match self.core.authenticator().login(self.peer, &request).await {
            LoginOutcome::Accept => {}
            LoginOutcome::Reject(reason) => return self.reject(reason).await,
        }
        self.stage.advance(AuthStage::Authenticated)?;
        self.join(username).await
    }

    /// Send everything a client needs to spawn, then start streaming.
    async fn join(&mut self, username: String) -> Result<(), SessionError> {
        let entity_id = self.core.allocate_entity_id();
        let spawn = self.core.spawn();
        let (mut location, inventory) = match self.core.load_player(&username).await? {
            Some(doc) => (Location::from_document(&doc), Inventory::from_items(&doc.inventory)),
            None => (Location::at_spawn(spawn), Inventory::default()),
        };

        self.out
            .send(&Clientbound::LoginResponse {
                entity_id,
                seed: self.core.seed() as i64,
                dimension: 0,
            })
            .await?;
        self.out.send(&Clientbound::SpawnPosition { pos: spawn }).await?;
        self.out
            .send(&Clientbound::TimeUpdate {
                time: self.core.time(),
            })
            .await?;

        // The chunk underfoot goes first so the position can be checked
        // against real terrain.
        let here = location.chunk();
        let cache = self.core.cache();
        cache.retain(here);
        let handle = match cache.request(here).await {
            Ok(handle) => handle,
            Err(e) => {
                cache.release(here);
                return Err(e.into());
            }
        };
        if location.lift_out_of(&handle.lock()) {
            tracing::debug!("Lifted {} out of the ground to y={}", username, location.y);
        }
        if let Err(e) = deliver(&self.out, self.streamer.enabled(), &handle).await {
            if !self.streamer.enabled().lock().contains(&here) {
                cache.release(here);
            }
            return Err(io::Error::other(e).into());
        }
        self.core.metrics().chunk_streamed();

        self.out.send(&position_look(&location)).await?;
        for (slot, item) in inventory.occupied() {
            self.out
                .send(&Clientbound::SetSlot {
                    window: 0,
                    slot: slot as i16,
                    item: Some(item),
                })
                .await?;
        }

        self.key = Some(self.core.register(SessionEntry {
            username: username.clone(),
            entity_id,
            out: self.out.clone(),
            enabled: Arc::clone(self.streamer.enabled()),
        }));
        self.stage.advance(AuthStage::Located)?;
        self.location = location;
        self.inventory = inventory;
        self.username = Some(username);

        self.streamer.update(here).await;
        Ok(())
    }

    // ── Play ─────────────────────────────────────────────────────────────

    async fn on_play(&mut self, packet: Serverbound) -> Result<(), SessionError> {
        match packet {
            Serverbound::Chat { message } => {
                let message = message.trim();
                if !message.is_empty() {
                    let name = self.name().to_string();
                    self.core.chat(&name, message).await;
                }
            }
            Serverbound::Grounded { grounded } => self.location.grounded = grounded,
            Serverbound::Position {
                x,
                y,
                stance,
                z,
                grounded,
            } => {
                self.relocate(|l| {
                    l.x = x;
                    l.y = y;
                    l.stance = stance;
                    l.z = z;
                    l.grounded = grounded;
                })
                .await
            }
            Serverbound::Look {
                yaw,
                pitch,
                grounded,
            } => {
                self.location.yaw = yaw;
                self.location.pitch = pitch;
                self.location.grounded = grounded;
            }
            Serverbound::PositionLook {
                x,
                y,
                stance,
                z,
                yaw,
                pitch,
                grounded,
            } => {
                self.relocate(|l| {
                    *l = Location {
                        x,
                        y,
                        z,
                        stance,
                        yaw,
                        pitch,
                        grounded,
                    }
                })
                .await
            }
            Serverbound::Digging { status, pos, .. } => {
                if status == DIG_FINISHED && self.can_reach(pos) {
                    if let Err(e) = self.core.set_block(pos, block::AIR, 0).await {
                        tracing::warn!("Dig at {:?} by {} failed: {}", pos, self.name(), e);
                    }
                }
            }
            Serverbound::Placement { pos, face, held } => self.on_placement(pos, face, held).await,
            Serverbound::HoldingChange { slot } => {
                if !self.inventory.select(slot) {
                    tracing::debug!("{} selected invalid hotbar slot {}", self.name(), slot);
                }
            }
            Serverbound::Respawn => {
                let location = Location::at_spawn(self.core.spawn());
                self.relocate(|l| *l = location).await;
                self.out.send(&position_look(&self.location)).await?;
            }
            Serverbound::WindowClick { window, slot, action, .. } => {
                // Inventory contents are only ever set by the server.
                tracing::debug!("Refusing click on slot {} of window {} from {}", slot, window, self.name());
                self.out
                    .send(&Clientbound::Transaction {
                        window,
                        action,
                        accepted: false,
                    })
                    .await?;
            }
            Serverbound::Transaction { window, action, accepted } => {
                tracing::debug!(
                    "{} acknowledged action {} of window {} ({})",
                    self.name(),
                    action,
                    window,
                    accepted
                );
            }
            Serverbound::UpdateSign { pos, .. } => {
                tracing::debug!("Ignoring sign text at {:?} from {}", pos, self.name());
            }
            Serverbound::KeepAlive
            | Serverbound::Disconnect { .. }
            | Serverbound::Handshake { .. }
            | Serverbound::Login { .. } => {}
        }
        Ok(())
    }

    /// Apply a movement and restream when it crosses a chunk boundary.
    async fn relocate(&mut self, apply: impl FnOnce(&mut Location)) {
        let before = self.location.chunk();
        apply(&mut self.location);
        let after = self.location.chunk();
        if after != before {
            tracing::debug!("{} moved from chunk {} to {}", self.name(), before, after);
            self.streamer.update(after).await;
        }
    }

    /// Whether `pos` is in a chunk this client has loaded and within reach
    /// of where it stands.
    fn can_reach(&self, pos: BlockPos) -> bool {
        if !self.streamer.enabled().lock().contains(&pos.chunk()) {
            tracing::debug!("{} edited {:?} outside its loaded chunks", self.name(), pos);
            return false;
        }
        let dx = f64::from(pos.x) + 0.5 - self.location.x;
        let dy = f64::from(pos.y) + 0.5 - self.location.y;
        let dz = f64::from(pos.z) + 0.5 - self.location.z;
        if dx * dx + dy * dy + dz * dz > MAX_REACH * MAX_REACH {
            tracing::debug!("{} edited {:?} out of reach", self.name(), pos);
            return false;
        }
        true
    }

    async fn on_placement(&self, pos: BlockPos, face: i8, held: Option<ItemStack>) {
        // Using an item in the air, not against a block.
        if pos.y == -1 || face < 0 {
            return;
        }
        let Some(item) = held else {
            return;
        };
        let Some(target) = pos.offset_by_face(face) else {
            tracing::debug!("{} placed against invalid face {}", self.name(), face);
            return;
        };
        let Ok(id) = u8::try_from(item.id) else {
            return;
        };
        if id == 0 || !self.can_reach(target) {
            return;
        }
        let metadata = (item.damage & 0xF) as u8;
        if let Err(e) = self.core.place_block(target, BlockId::new(id), metadata).await {
            tracing::warn!("Placement at {:?} by {} failed: {}", target, self.name(), e);
        }
    }

    // ── Errors and teardown ──────────────────────────────────────────────

    /// Best-effort disconnect packet with a reason.
    async fn kick(&self, reason: &str) {
        let packet = Clientbound::Disconnect {
            reason: reason.to_string(),
        };
        if let Err(e) = self.out.send(&packet).await {
            tracing::debug!("Could not tell {} why it was kicked: {}", self.peer, e);
        }
    }

    async fn reject(&self, reason: String) -> Result<(), SessionError> {
        tracing::info!("Rejected {}: {}", self.peer, reason);
        self.kick(&reason).await;
        Err(SessionError::Rejected(reason))
    }

    async fn out_of_order(&self, packet: &'static str) -> Result<(), SessionError> {
        let err = SessionError::OutOfOrder {
            packet,
            stage: self.stage.stage(),
        };
        self.kick(&err.to_string()).await;
        Err(err)
    }

    /// Stop streaming, save the player and leave the registry.
    async fn finish(&mut self) {
        self.finished = true;
        self.teardown().run().await;
    }

    /// Move everything cleanup needs out of the session.
    fn teardown(&mut self) -> Teardown {
        let key = self.key.take();
        let player = match (&key, &self.username) {
            (Some(_), Some(username)) => Some((username.clone(), self.location.to_document(&self.inventory))),
            _ => None,
        };
        Teardown {
            core: Arc::clone(&self.core),
            streamer: self.streamer.detach(),
            key,
            player,
            reserved: self.reserved.take(),
            out: self.out.clone(),
        }
    }
}

/// A session dropped without [`Session::finish`], because its task was
/// aborted or a handler panicked, still leaves the registry and saves its
/// player.
impl Drop for Session {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!("Connection from {} ended abruptly, cleaning up", self.peer);
        let teardown = self.teardown();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(teardown.run());
            }
            Err(_) => teardown.abandon(),
        }
    }
}

/// Session cleanup, detached from the session so it can outlive it.
struct Teardown {
    core: Arc<ServerCore>,
    streamer: VisibilityStreamer,
    key: Option<SessionKey>,
    player: Option<(String, PlayerDocument)>,
    reserved: Option<String>,
    out: Outbound,
}

impl Teardown {
    async fn run(mut self) {
        self.streamer.disconnect().await;
        if let Some((username, doc)) = self.player.take() {
            if let Err(e) = self.core.save_player(&username, doc).await {
                tracing::error!("Failed to save {}: {:#}", username, e);
            }
        }
        self.leave();
        self.out.shutdown().await;
    }

    /// Without a runtime nothing can be awaited: drop interest and leave
    /// the registry, but the player is not saved.
    fn abandon(mut self) {
        self.streamer.release_all();
        if let Some((username, _)) = &self.player {
            tracing::error!("No runtime to save {} on", username);
        }
        self.leave();
    }

    fn leave(&mut self) {
        if let Some(key) = self.key.take() {
            self.core.unregister(key);
        }
        if let Some(name) = self.reserved.take() {
            self.core.sessions().release_name(&name);
        }
    }
}

fn position_look(location: &Location) -> Clientbound {
    Clientbound::PositionLook {
        x: location.x,
        stance: location.stance,
        y: location.y,
        z: location.z,
        yaw: location.yaw,
        pitch: location.pitch,
        grounded: location.grounded,
    }
}
