//! ChunkStore tests: block/metadata access, height-map upkeep, damage
//! reports and dirty/revision bookkeeping.

use bravo_engine::world::block;
use bravo_engine::world::chunk::{ChunkStore, DamageReport, DAMAGE_THRESHOLD, CHUNK_HEIGHT};
use bravo_engine::world::nibble::unpack_nibbles;
use bravo_engine::world::position::{BlockPos, ChunkPos, LocalBlockPos};

fn at(x: u8, y: u8, z: u8) -> LocalBlockPos {
    LocalBlockPos { x, y, z }
}

/// Tiny xorshift so the height-map test covers irregular columns.
fn scatter(seed: &mut u64) -> u64 {
    *seed ^= *seed << 13;
    *seed ^= *seed >> 7;
    *seed ^= *seed << 17;
    *seed
}

// ---------------------------------------------------------------------------
// Blocks & metadata
// ---------------------------------------------------------------------------

#[test]
fn new_chunk_is_zeroed_and_unpopulated() {
    let chunk = ChunkStore::new(ChunkPos::new(4, -9));
    assert!(chunk.blocks().iter().all(|&b| b == 0));
    assert!(!chunk.is_populated());
    assert!(!chunk.is_dirty());
    assert_eq!(chunk.height_at(3, 3), 0);
}

#[test]
fn set_block_marks_dirty_and_damage_only_on_change() {
    let mut chunk = ChunkStore::new(ChunkPos::new(0, 0));
    assert!(chunk.set_block(at(1, 2, 3), block::STONE));
    assert!(chunk.is_dirty());
    assert_eq!(chunk.damage_count(), 1);

    let rev = chunk.revision();
    assert!(!chunk.set_block(at(1, 2, 3), block::STONE));
    assert_eq!(chunk.revision(), rev);
    assert_eq!(chunk.get_block(at(1, 2, 3)), block::STONE);
}

#[test]
fn metadata_is_four_bits_in_packed_storage() {
    let mut chunk = ChunkStore::new(ChunkPos::new(0, 0));
    let pos = at(0, 1, 0);
    chunk.set_metadata(pos, 0x1A);
    assert_eq!(chunk.get_metadata(pos), 0x0A);
    let unpacked = unpack_nibbles(chunk.metadata().as_packed());
    assert_eq!(unpacked[pos.index()], 0x0A);
    assert_eq!(unpacked[pos.index() - 1], 0);
}

#[test]
fn world_coordinates_wrap_into_chunk() {
    let world = BlockPos::new(-1, 70, 33);
    assert_eq!(world.chunk(), ChunkPos::new(-1, 2));
    let local = world.local().unwrap();
    assert_eq!((local.x, local.y, local.z), (15, 70, 1));
    assert_eq!(local.world(world.chunk()), world);
    assert!(BlockPos::new(0, 128, 0).local().is_none());
    assert!(BlockPos::new(0, -1, 0).local().is_none());
}

#[test]
fn face_offsets_stop_at_the_coordinate_limits() {
    let pos = BlockPos::new(4, 64, -4);
    assert_eq!(pos.offset_by_face(1), Some(BlockPos::new(4, 65, -4)));
    assert_eq!(pos.offset_by_face(4), Some(BlockPos::new(3, 64, -4)));
    assert_eq!(pos.offset_by_face(6), None);
    assert_eq!(BlockPos::new(i32::MAX, 10, 0).offset_by_face(5), None);
    assert_eq!(BlockPos::new(0, 10, i32::MIN).offset_by_face(2), None);
    assert_eq!(BlockPos::new(0, i32::MIN, 0).offset_by_face(0), None);
}

// ---------------------------------------------------------------------------
// Height-map
// ---------------------------------------------------------------------------

#[test]
fn regenerated_heightmap_matches_linear_scan() {
    let mut chunk = ChunkStore::new(ChunkPos::new(2, 2));
    let mut seed = 0x1234_5678_9ABC_DEF0;
    for _ in 0..3000 {
        let r = scatter(&mut seed);
        let pos = at((r & 15) as u8, ((r >> 4) % CHUNK_HEIGHT as u64) as u8, ((r >> 12) & 15) as u8);
        chunk.put_block(pos, block::DIRT);
    }
    chunk.regenerate_heightmap();

    for x in 0..16u8 {
        for z in 0..16u8 {
            let expected = (0..CHUNK_HEIGHT as u8)
                .rev()
                .find(|&y| !chunk.get_block(at(x, y, z)).is_air())
                .unwrap_or(0);
            assert_eq!(chunk.height_at(x, z), expected, "column ({x}, {z})");
        }
    }
}

#[test]
fn set_block_keeps_heightmap_current() {
    let mut chunk = ChunkStore::new(ChunkPos::new(0, 0));
    chunk.set_block(at(5, 10, 5), block::STONE);
    chunk.set_block(at(5, 40, 5), block::STONE);
    assert_eq!(chunk.height_at(5, 5), 40);

    chunk.set_block(at(5, 40, 5), block::AIR);
    assert_eq!(chunk.height_at(5, 5), 10);

    chunk.set_block(at(5, 10, 5), block::AIR);
    assert_eq!(chunk.height_at(5, 5), 0);
}

#[test]
fn skylight_is_full_only_above_the_surface() {
    let mut chunk = ChunkStore::new(ChunkPos::new(0, 0));
    for y in 0..=20 {
        chunk.put_block(at(0, y, 0), block::STONE);
    }
    chunk.regenerate_heightmap();
    chunk.regenerate_skylight();
    assert_eq!(chunk.get_sky_light(at(0, 21, 0)), 15);
    assert_eq!(chunk.get_sky_light(at(0, 20, 0)), 0);
    // Empty column: lit all the way down.
    assert_eq!(chunk.get_sky_light(at(1, 0, 1)), 15);
}

// ---------------------------------------------------------------------------
// Damage
// ---------------------------------------------------------------------------

#[test]
fn damage_report_escalates_with_change_count() {
    let mut chunk = ChunkStore::new(ChunkPos::new(0, 0));
    assert_eq!(chunk.build_damage_report(), DamageReport::Clean);

    chunk.set_block(at(0, 5, 0), block::SAND);
    match chunk.build_damage_report() {
        DamageReport::Single(change) => {
            assert_eq!(change.pos, at(0, 5, 0));
            assert_eq!(change.block, block::SAND);
        }
        other => panic!("expected single change, got {other:?}"),
    }

    chunk.set_block(at(1, 5, 0), block::SAND);
    chunk.set_metadata(at(1, 5, 0), 3);
    match chunk.build_damage_report() {
        DamageReport::Batch(changes) => {
            assert_eq!(changes.len(), 2);
            assert_eq!(changes[1].metadata, 3);
        }
        other => panic!("expected batch, got {other:?}"),
    }

    chunk.clear_damage();
    let mut placed = 0;
    'fill: for x in 0..16u8 {
        for z in 0..16u8 {
            chunk.set_block(at(x, 90, z), block::GRAVEL);
            placed += 1;
            if placed > DAMAGE_THRESHOLD {
                break 'fill;
            }
        }
    }
    assert_eq!(chunk.build_damage_report(), DamageReport::Full);
    chunk.clear_damage();
    assert_eq!(chunk.build_damage_report(), DamageReport::Clean);
}

#[test]
fn mark_clean_refuses_stale_revisions() {
    let mut chunk = ChunkStore::new(ChunkPos::new(0, 0));
    chunk.set_block(at(0, 0, 0), block::STONE);
    let rev = chunk.revision();
    chunk.set_block(at(0, 1, 0), block::STONE);
    assert!(!chunk.mark_clean(rev));
    assert!(chunk.is_dirty());
    assert!(chunk.mark_clean(chunk.revision()));
    assert!(!chunk.is_dirty());
}
