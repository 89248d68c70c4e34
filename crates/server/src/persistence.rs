//! On-disk world storage.
//!
//! Chunks live in McRegion files, `<world>/region/r.X.Z.mcr`, 32x32 chunks
//! per file. The level and each player are gzip-compressed NBT files:
//! `<world>/level.dat` and `<world>/players/<name>.dat`.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bravo_engine::persistence::Persistence;
use bravo_engine::world::document::{self, ChunkDocument, LevelDocument, PlayerDocument};
use bravo_engine::world::position::ChunkPos;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Chunks per region edge.
const REGION_SIZE: i32 = 32;

pub struct RegionPersistence {
    root: PathBuf,
    /// Serializes every region file access.
    regions: Mutex<()>,
}

impl RegionPersistence {
    /// Open (creating if needed) the world directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("region"))
            .with_context(|| format!("creating world directory {}", root.display()))?;
        fs::create_dir_all(root.join("players"))
            .with_context(|| format!("creating players directory in {}", root.display()))?;
        Ok(Self {
            root,
            regions: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn region_path(&self, pos: ChunkPos) -> PathBuf {
        let rx = pos.x.div_euclid(REGION_SIZE);
        let rz = pos.z.div_euclid(REGION_SIZE);
        self.root.join("region").join(format!("r.{}.{}.mcr", rx, rz))
    }

    fn player_path(&self, username: &str) -> PathBuf {
        self.root.join("players").join(format!("{}.dat", username))
    }
}

/// Position of a chunk inside its region file.
fn region_local(pos: ChunkPos) -> (usize, usize) {
    (
        pos.x.rem_euclid(REGION_SIZE) as usize,
        pos.z.rem_euclid(REGION_SIZE) as usize,
    )
}

impl Persistence for RegionPersistence {
    fn load_chunk(&self, pos: ChunkPos) -> Result<Option<ChunkDocument>> {
        let path = self.region_path(pos);
        let _guard = self.regions.lock();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("opening {}", path.display())),
        };
        let mut region = fastanvil::Region::from_stream(file)
            .with_context(|| format!("parsing region file {}", path.display()))?;

        let (x, z) = region_local(pos);
        let Some(bytes) = region
            .read_chunk(x, z)
            .with_context(|| format!("reading chunk {} from {}", pos, path.display()))?
        else {
            return Ok(None);
        };
        let doc = document::decode(&bytes)
            .with_context(|| format!("deserializing chunk {}", pos))?;
        Ok(Some(doc))
    }

    fn save_chunk(&self, pos: ChunkPos, doc: &ChunkDocument) -> Result<()> {
        let bytes = document::encode(doc).with_context(|| format!("serializing chunk {}", pos))?;
        let path = self.region_path(pos);
        let _guard = self.regions.lock();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        let fresh = file.metadata()?.len() == 0;
        let mut region = if fresh {
            fastanvil::Region::new(file)
                .with_context(|| format!("creating region file {}", path.display()))?
        } else {
            fastanvil::Region::from_stream(file)
                .with_context(|| format!("parsing region file {}", path.display()))?
        };

        let (x, z) = region_local(pos);
        region
            .write_chunk(x, z, &bytes)
            .with_context(|| format!("writing chunk {} to {}", pos, path.display()))?;
        region.into_inner()?.sync_data()?;
        Ok(())
    }

    fn load_level(&self) -> Result<Option<LevelDocument>> {
        read_gzip(&self.root.join("level.dat"))
    }

    fn save_level(&self, doc: &LevelDocument) -> Result<()> {
        write_gzip(&self.root.join("level.dat"), doc)
    }

    fn load_player(&self, username: &str) -> Result<Option<PlayerDocument>> {
        read_gzip(&self.player_path(username))
    }

    fn save_player(&self, username: &str, doc: &PlayerDocument) -> Result<()> {
        write_gzip(&self.player_path(username), doc)
    }
}

// ── Gzip documents ───────────────────────────────────────────────────────────

fn read_gzip<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("opening {}", path.display())),
    };
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .with_context(|| format!("decompressing {}", path.display()))?;
    let doc = document::decode(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(doc))
}

/// Write through a temporary file so a crash never leaves half a document.
fn write_gzip<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let bytes = document::encode(doc)?;
    let tmp = path.with_extension("dat.tmp");
    {
        let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()?.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
