//! Server configuration: a TOML file overridden by command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bravo_engine::generation::DEFAULT_STAGES;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerSection,
    pub world: WorldSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: String,
    /// Chunk radius streamed around each player.
    pub view_distance: i32,
    pub keepalive_secs: u64,
    /// Length of one world tick.
    pub tick_millis: u64,
    /// Ticks between time broadcasts.
    pub time_broadcast_ticks: u64,
    pub autosave_secs: u64,
    /// Ticks between eviction passes.
    pub evict_every_ticks: u64,
    /// Serve `/metrics` on this port when set.
    pub dashboard_port: Option<u16>,
    pub authenticator: String,
    pub whitelist: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:25565".into(),
            view_distance: 5,
            keepalive_secs: 15,
            tick_millis: 50,
            time_broadcast_ticks: 20,
            autosave_secs: 300,
            evict_every_ticks: 600,
            dashboard_port: None,
            authenticator: "offline".into(),
            whitelist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Region,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldSection {
    pub path: PathBuf,
    pub backend: Backend,
    /// Used only when the world has no level document yet.
    pub seed: Option<u64>,
    pub generators: Vec<String>,
    pub overflow_capacity: usize,
    /// Per-chunk streaming timeout; none when unset.
    pub chunk_timeout_ms: Option<u64>,
}

impl Default for WorldSection {
    fn default() -> Self {
        Self {
            path: "world".into(),
            backend: Backend::Region,
            seed: None,
            generators: DEFAULT_STAGES.iter().map(|s| s.to_string()).collect(),
            overflow_capacity: 256,
            chunk_timeout_ms: None,
        }
    }
}

impl Config {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `--bind` and `--world` from the command line.
    pub fn apply_args(&mut self, args: &[String]) {
        if let Some(bind) = flag(args, "--bind") {
            self.server.bind = bind;
        }
        if let Some(world) = flag(args, "--world") {
            self.world.path = world.into();
        }
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.server.keepalive_secs.max(1))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.server.tick_millis.max(1))
    }

    pub fn autosave(&self) -> Duration {
        Duration::from_secs(self.server.autosave_secs.max(1))
    }

    pub fn chunk_timeout(&self) -> Option<Duration> {
        self.world.chunk_timeout_ms.map(Duration::from_millis)
    }
}

/// The value following `name` in `args`.
pub fn flag(args: &[String], name: &str) -> Option<String> {
    args.iter().skip_while(|a| *a != name).nth(1).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:25565");
        assert_eq!(config.server.keepalive_secs, 15);
        assert_eq!(config.world.backend, Backend::Region);
        assert_eq!(config.world.generators.len(), DEFAULT_STAGES.len());
    }

    #[test]
    fn sections_override_single_keys() {
        let config = Config::parse(
            r#"
            [server]
            view_distance = 3
            authenticator = "whitelist"
            whitelist = ["alice"]

            [world]
            backend = "memory"
            seed = 42
            generators = ["boring", "safety"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.view_distance, 3);
        assert_eq!(config.server.keepalive_secs, 15);
        assert_eq!(config.server.whitelist, vec!["alice".to_string()]);
        assert_eq!(config.world.backend, Backend::Memory);
        assert_eq!(config.world.seed, Some(42));
        assert_eq!(config.world.generators, vec!["boring", "safety"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("[server]\nviewdistance = 3\n").is_err());
    }

    #[test]
    fn flags_override_file() {
        let mut config = Config::default();
        let args: Vec<String> = ["bravo", "--world", "/tmp/w", "--bind", "127.0.0.1:1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        config.apply_args(&args);
        assert_eq!(config.server.bind, "127.0.0.1:1");
        assert_eq!(config.world.path, PathBuf::from("/tmp/w"));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join("bravo_config_that_does_not_exist.toml");
        assert!(Config::load(&path).is_ok());
    }
}
