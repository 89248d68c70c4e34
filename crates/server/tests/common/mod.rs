//! Shared helpers: an in-memory client speaking the wire protocol and a
//! memory-backed server core.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bravo_engine::cache::{CacheOptions, WorldCache};
use bravo_engine::generation::GenerationPipeline;
use bravo_engine::persistence::{MemoryPersistence, Persistence};
use bravo_server::config::{Backend, Config};
use bravo_server::protocol::{self, Clientbound, Decoded, PacketCodec, Serverbound};
use bravo_server::server::ServerCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const DUPLEX_CAPACITY: usize = 1 << 20;
const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Flat stone to y=64 with bedrock at the bottom; spawn is (8, 65, 8).
pub const TEST_STAGES: &[&str] = &["boring", "safety"];

pub fn test_config(view_distance: i32) -> Config {
    let mut config = Config::default();
    config.server.view_distance = view_distance;
    config.server.keepalive_secs = 3600;
    config.server.time_broadcast_ticks = 2;
    config.world.backend = Backend::Memory;
    config.world.seed = Some(42);
    config.world.generators = TEST_STAGES.iter().map(|s| s.to_string()).collect();
    config
}

pub async fn memory_core(config: &Config) -> (Arc<ServerCore>, Arc<MemoryPersistence>) {
    let persistence = Arc::new(MemoryPersistence::new());
    let core = ServerCore::open(config, persistence.clone()).await.unwrap();
    (core, persistence)
}

pub fn memory_cache(persistence: Arc<dyn Persistence>) -> WorldCache {
    let pipeline = GenerationPipeline::from_names(TEST_STAGES).unwrap();
    WorldCache::new(
        persistence,
        Arc::new(pipeline),
        CacheOptions {
            seed: 42,
            ..CacheOptions::default()
        },
    )
}

/// The client end of a duplex transport.
pub struct TestClient {
    stream: DuplexStream,
    pending: Vec<u8>,
    queue: VecDeque<Decoded>,
    read_codec: PacketCodec,
    write_codec: PacketCodec,
}

impl TestClient {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            queue: VecDeque::new(),
            read_codec: protocol::clientbound(),
            write_codec: protocol::serverbound(),
        }
    }

    pub async fn send(&mut self, packet: &Serverbound) {
        let bytes = packet.encode(&self.write_codec).unwrap();
        self.send_raw(&bytes).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Next packet, or `None` once the server closed the connection.
    pub async fn recv_decoded(&mut self) -> Option<Decoded> {
        match tokio::time::timeout(RECV_TIMEOUT, self.next_decoded()).await {
            Ok(packet) => packet,
            Err(_) => panic!("timed out waiting for a packet"),
        }
    }

    /// Next packet if one arrives within `wait`.
    pub async fn recv_within(&mut self, wait: Duration) -> Option<Decoded> {
        tokio::time::timeout(wait, self.next_decoded()).await.ok().flatten()
    }

    pub async fn recv(&mut self) -> Clientbound {
        let decoded = self.recv_decoded().await.expect("connection closed");
        Clientbound::from_decoded(&decoded)
            .unwrap()
            .unwrap_or_else(|| panic!("no typed form for {}", decoded.name))
    }

    /// Skip packets until one matches.
    pub async fn recv_until(&mut self, mut wanted: impl FnMut(&Clientbound) -> bool) -> Clientbound {
        loop {
            let packet = self.recv().await;
            if wanted(&packet) {
                return packet;
            }
        }
    }

    pub async fn closed(&mut self) -> bool {
        loop {
            match self.recv_decoded().await {
                None => return true,
                Some(_) => continue,
            }
        }
    }

    async fn next_decoded(&mut self) -> Option<Decoded> {
        let mut scratch = [0u8; 8192];
        loop {
            if let Some(packet) = self.queue.pop_front() {
                return Some(packet);
            }
            let n = self.stream.read(&mut scratch).await.ok()?;
            if n == 0 {
                return None;
            }
            self.pending.extend_from_slice(&scratch[..n]);
            let (packets, rest) = self.read_codec.parse_stream(&self.pending).unwrap();
            self.pending = rest;
            self.queue.extend(packets);
        }
    }
}
