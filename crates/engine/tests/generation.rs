//! Generation pipeline tests: stage registry, determinism and the
//! end-to-end terrain shape.

use bravo_engine::generation::{GenerationPipeline, PipelineError, DEFAULT_STAGES};
use bravo_engine::world::block;
use bravo_engine::world::chunk::{ChunkStore, CHUNK_HEIGHT};
use bravo_engine::world::position::{ChunkPos, LocalBlockPos};

fn generate(names: &[&str], pos: ChunkPos, seed: u64) -> ChunkStore {
    let pipeline = GenerationPipeline::from_names(names).unwrap();
    let mut chunk = ChunkStore::new(pos);
    pipeline.generate(&mut chunk, seed);
    chunk
}

#[test]
fn registry_builds_stages_in_configured_order() {
    let pipeline = GenerationPipeline::from_names(&["safety", "boring"]).unwrap();
    assert_eq!(pipeline.names(), vec!["safety", "boring"]);
    assert_eq!(GenerationPipeline::default().names(), DEFAULT_STAGES.to_vec());
}

#[test]
fn unknown_stage_name_is_rejected() {
    let err = GenerationPipeline::from_names(&["boring", "volcanoes"]).err();
    assert_eq!(err, Some(PipelineError::UnknownStage("volcanoes".into())));
}

#[test]
fn full_pipeline_is_deterministic() {
    for pos in [ChunkPos::new(0, 0), ChunkPos::new(-7, 13)] {
        let a = generate(DEFAULT_STAGES, pos, 0xC0FFEE);
        let b = generate(DEFAULT_STAGES, pos, 0xC0FFEE);
        assert_eq!(a.blocks(), b.blocks(), "blocks differ at {pos}");
        assert_eq!(a.metadata(), b.metadata());
        assert_eq!(a.heightmap(), b.heightmap());
    }
}

#[test]
fn concurrent_generations_with_different_seeds_stay_independent() {
    let pos = ChunkPos::new(3, 3);
    let expected_a = generate(DEFAULT_STAGES, pos, 1);
    let expected_b = generate(DEFAULT_STAGES, pos, 2);
    assert_ne!(expected_a.blocks(), expected_b.blocks());

    let handles: Vec<_> = (0..8u64)
        .map(|i| std::thread::spawn(move || (i, generate(DEFAULT_STAGES, pos, 1 + i % 2))))
        .collect();
    for handle in handles {
        let (i, chunk) = handle.join().unwrap();
        let expected = if i % 2 == 0 { &expected_a } else { &expected_b };
        assert_eq!(chunk.blocks(), expected.blocks());
    }
}

#[test]
fn neighbouring_chunks_differ() {
    let a = generate(DEFAULT_STAGES, ChunkPos::new(0, 0), 42);
    let b = generate(DEFAULT_STAGES, ChunkPos::new(1, 0), 42);
    assert_ne!(a.blocks(), b.blocks());
}

#[test]
fn generated_chunk_is_populated_and_dirty() {
    let chunk = generate(&["boring"], ChunkPos::new(0, 0), 0);
    assert!(chunk.is_populated());
    assert!(chunk.is_dirty());
    assert_eq!(chunk.damage_count(), 0);
    assert_eq!(chunk.height_at(0, 0), 64);
}

#[test]
fn stone_erosion_grass_safety_scenario() {
    let chunk = generate(
        &["boring", "erosion", "grass", "safety"],
        ChunkPos::new(0, 0),
        42,
    );

    assert_eq!(chunk.get_block(LocalBlockPos { x: 0, y: 0, z: 0 }), block::BEDROCK);

    let surface = chunk.get_block(LocalBlockPos { x: 8, y: 64, z: 8 });
    assert!(
        [block::STONE, block::DIRT, block::GRASS].contains(&surface),
        "unexpected block {surface:?}"
    );

    let top = CHUNK_HEIGHT as u8 - 1;
    for x in 0..16u8 {
        for z in 0..16u8 {
            assert!(chunk.get_block(LocalBlockPos { x, y: top, z }).is_air());
            assert!(chunk.get_block(LocalBlockPos { x, y: top - 1, z }).is_air());
            // Surface is grass over dirt.
            assert_eq!(chunk.get_block(LocalBlockPos { x, y: 64, z }), block::GRASS);
            assert_eq!(chunk.get_block(LocalBlockPos { x, y: 63, z }), block::DIRT);
        }
    }
}

#[test]
fn default_terrain_has_bedrock_floor_and_water_at_sea_level() {
    let chunk = generate(DEFAULT_STAGES, ChunkPos::new(5, -2), 7);
    for x in 0..16u8 {
        for z in 0..16u8 {
            assert_eq!(chunk.get_block(LocalBlockPos { x, y: 0, z }), block::BEDROCK);
            let sea = chunk.get_block(LocalBlockPos { x, y: 62, z });
            assert!(!sea.is_air(), "air at sea level in column ({x}, {z})");
        }
    }
}
