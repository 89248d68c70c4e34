//! Terrain generation: an ordered list of stages run over a fresh chunk.
//!
//! Stage order matters. Later stages read what earlier ones placed, so
//! `erosion` must follow whatever lays stone and precede `grass`.

pub mod noise;
pub mod stages;

use thiserror::Error;

use crate::world::chunk::ChunkStore;

/// One terrain pass. Stateless: everything it needs is the chunk and the seed.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, chunk: &mut ChunkStore, seed: u64);
}

type StageCtor = fn() -> Box<dyn Stage>;

/// Every stage that can be named in configuration.
pub const REGISTRY: &[(&str, StageCtor)] = &[
    ("boring", || Box::new(stages::Boring)),
    ("simplex", || Box::new(stages::Simplex::default())),
    ("erosion", || Box::new(stages::Erosion)),
    ("watertable", || Box::new(stages::WaterTable)),
    ("beaches", || Box::new(stages::Beaches)),
    ("grass", || Box::new(stages::Grass)),
    ("ore", || Box::new(stages::Ore)),
    ("safety", || Box::new(stages::Safety)),
];

/// Stage list used when configuration names none.
pub const DEFAULT_STAGES: &[&str] = &[
    "simplex",
    "erosion",
    "watertable",
    "beaches",
    "grass",
    "ore",
    "safety",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("unknown generation stage {0:?}")]
    UnknownStage(String),
}

pub struct GenerationPipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl GenerationPipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Build a pipeline from registered stage names, in order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, PipelineError> {
        let stages = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                REGISTRY
                    .iter()
                    .find(|(registered, _)| *registered == name)
                    .map(|(_, ctor)| ctor())
                    .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { stages })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage, then mark the chunk populated and dirty with fresh
    /// height-map and sky light.
    pub fn generate(&self, chunk: &mut ChunkStore, seed: u64) {
        for stage in &self.stages {
            stage.apply(chunk, seed);
        }
        chunk.set_populated(true);
        chunk.regenerate_heightmap();
        chunk.regenerate_skylight();
        chunk.clear_damage();
        chunk.mark_dirty();
        tracing::debug!(
            "Generated chunk {} with {} stages",
            chunk.pos(),
            self.stages.len()
        );
    }
}

impl Default for GenerationPipeline {
    fn default() -> Self {
        // Every DEFAULT_STAGES entry is in REGISTRY.
        Self::from_names(DEFAULT_STAGES).unwrap_or_else(|_| Self::new(Vec::new()))
    }
}
