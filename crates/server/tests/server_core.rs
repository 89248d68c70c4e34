//! Shared world state: ticking, edits fanned out to viewers, saving and
//! reopening.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bravo_engine::persistence::Persistence;
use bravo_engine::world::block::{self, BlockId};
use bravo_engine::world::position::{BlockPos, ChunkPos};
use bravo_server::net::outbound::Outbound;
use bravo_server::net::visibility::EnabledSet;
use bravo_server::protocol::Clientbound;
use bravo_server::server::{ServerCore, SessionEntry};
use common::{DUPLEX_CAPACITY, TestClient, memory_core, test_config};
use parking_lot::Mutex;

/// Register a bare session that sees `chunks`.
fn watcher(core: &ServerCore, name: &str, chunks: &[ChunkPos]) -> TestClient {
    let (server, client) = tokio::io::duplex(DUPLEX_CAPACITY);
    let enabled: EnabledSet = Arc::new(Mutex::new(chunks.iter().copied().collect::<HashSet<_>>()));
    core.register(SessionEntry {
        username: name.into(),
        entity_id: core.allocate_entity_id(),
        out: Outbound::new(server),
        enabled,
    });
    TestClient::new(client)
}

const QUIET: Duration = Duration::from_millis(100);

#[tokio::test]
async fn time_is_broadcast_every_few_ticks() {
    let (core, _) = memory_core(&test_config(1)).await;
    let mut client = watcher(&core, "nadia", &[]);
    let start = core.time();

    core.tick().await;
    assert!(client.recv_within(QUIET).await.is_none());
    core.tick().await;
    assert_eq!(
        client.recv().await,
        Clientbound::TimeUpdate { time: start + 2 }
    );
    assert_eq!(core.time(), start + 2);
}

#[tokio::test]
async fn edits_reach_viewers_only() {
    let (core, _) = memory_core(&test_config(1)).await;
    let mut viewer = watcher(&core, "oscar", &[ChunkPos::new(0, 0)]);
    let mut elsewhere = watcher(&core, "pia", &[ChunkPos::new(4, 4)]);

    let pos = BlockPos::new(3, 64, 5);
    assert!(core.set_block(pos, block::SAND, 0).await.unwrap());
    assert_eq!(
        viewer.recv().await,
        Clientbound::BlockChange {
            pos,
            block: block::SAND,
            metadata: 0,
        }
    );
    assert!(elsewhere.recv_within(QUIET).await.is_none());
    assert_eq!(core.metrics_snapshot().block_edits, 1);
}

#[tokio::test]
async fn no_op_and_out_of_world_edits_change_nothing() {
    let (core, _) = memory_core(&test_config(1)).await;
    let mut viewer = watcher(&core, "quinn", &[ChunkPos::new(0, 0)]);

    assert!(!core.set_block(BlockPos::new(3, 10, 5), block::STONE, 0).await.unwrap());
    assert!(!core.set_block(BlockPos::new(3, 128, 5), block::STONE, 0).await.unwrap());
    assert!(!core.set_block(BlockPos::new(3, -1, 5), block::STONE, 0).await.unwrap());
    assert!(viewer.recv_within(QUIET).await.is_none());
    assert_eq!(core.metrics_snapshot().block_edits, 0);
}

#[tokio::test]
async fn placement_needs_room() {
    let (core, _) = memory_core(&test_config(1)).await;

    assert!(!core.place_block(BlockPos::new(0, 30, 0), BlockId(4), 0).await.unwrap());
    assert!(core.place_block(BlockPos::new(0, 65, 0), BlockId(4), 0).await.unwrap());
    assert!(!core.place_block(BlockPos::new(0, 65, 0), BlockId(5), 0).await.unwrap());
}

#[tokio::test]
async fn saving_writes_dirty_chunks() {
    let (core, persistence) = memory_core(&test_config(1)).await;
    core.set_block(BlockPos::new(20, 64, 20), block::AIR, 0)
        .await
        .unwrap();

    let saved = core.save_world().await.unwrap();
    assert!(saved >= 1);
    assert!(persistence.has_chunk(ChunkPos::new(1, 1)));
    assert_eq!(core.save_world().await.unwrap(), 0);
}

#[tokio::test]
async fn reopening_keeps_seed_spawn_and_time() {
    let (core, persistence) = memory_core(&test_config(1)).await;
    for _ in 0..3 {
        core.tick().await;
    }
    core.save_world().await.unwrap();

    let mut other_seed = test_config(1);
    other_seed.world.seed = Some(7);
    let reopened = ServerCore::open(&other_seed, persistence).await.unwrap();
    assert_eq!(reopened.seed(), 42);
    assert_eq!(reopened.spawn(), core.spawn());
    assert_eq!(reopened.time(), 3);
}

#[tokio::test]
async fn shutdown_with_nobody_online_just_saves() {
    let (core, persistence) = memory_core(&test_config(1)).await;
    core.shutdown().await.unwrap();
    assert!(core.shutdown_token().is_cancelled());
    assert!(persistence.load_level().is_ok());
}
