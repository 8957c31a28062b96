//! Persistent chunk cache.
//!
//! One JSON file per `(language, chunk_size)`, published atomically. The key
//! does not cover the corpus content: an entry written for one corpus is
//! served for any other with the same language and chunk size.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use hyrag_core::{Chunk, Language, RagError, Result};

/// Identity of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub language: Language,
    pub chunk_size: usize,
}

impl CacheKey {
    pub fn new(language: Language, chunk_size: usize) -> Self {
        Self { language, chunk_size }
    }

    /// Entry file name, `chunks_<language>_<chunk_size>.json`.
    pub fn file_name(&self) -> String {
        format!("chunks_{}_{}.json", self.language, self.chunk_size)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.language, self.chunk_size)
    }
}

enum Lookup {
    Hit(Vec<Chunk>),
    Missing,
    Corrupt(RagError),
}

/// Directory of chunk lists keyed by [`CacheKey`].
pub struct ChunkCache {
    dir: PathBuf,
}

impl ChunkCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry for `key`.
    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    fn lookup(&self, key: &CacheKey) -> Lookup {
        let path = self.path(key);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Lookup::Missing,
            Err(e) => {
                return Lookup::Corrupt(RagError::CacheCorrupt {
                    key: key.file_name(),
                    reason: e.to_string(),
                })
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(chunks) => Lookup::Hit(chunks),
            Err(e) => Lookup::Corrupt(RagError::CacheCorrupt {
                key: key.file_name(),
                reason: e.to_string(),
            }),
        }
    }

    /// Cached chunks for `key`.
    ///
    /// A missing, unreadable or unparsable entry is a miss.
    pub fn load(&self, key: &CacheKey) -> Option<Vec<Chunk>> {
        match self.lookup(key) {
            Lookup::Hit(chunks) => {
                info!("Loaded {} cached chunks for {}", chunks.len(), key);
                Some(chunks)
            }
            Lookup::Missing => {
                debug!("No cached chunks for {}", key);
                None
            }
            Lookup::Corrupt(e) => {
                warn!("{}; treating as a miss", e);
                None
            }
        }
    }

    /// Publish `chunks` under `key`.
    ///
    /// The entry is written to a temporary file in the cache directory and
    /// linked into place only if no entry exists yet. If another writer got
    /// there first, this write is discarded and `Ok` is returned.
    pub fn store(&self, key: &CacheKey, chunks: &[Chunk]) -> Result<()> {
        let path = self.path(key);
        if path.exists() {
            debug!("Cache entry {} already published, skipping write", key);
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir)?;

        let mut file = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut file, chunks)?;
        file.flush()?;
        file.as_file().sync_all()?;

        match file.persist_noclobber(&path) {
            Ok(_) => {
                info!("Cached {} chunks for {} at {:?}", chunks.len(), key, path);
                Ok(())
            }
            Err(e) if path.exists() => {
                debug!("Lost publish race for {}: {}", key, e.error);
                Ok(())
            }
            Err(e) => Err(e.error.into()),
        }
    }

    /// Cached chunks for `key`, or the result of `build`, which is then
    /// cached.
    ///
    /// A corrupt entry is removed before the rebuilt list is published.
    pub fn load_or_build<F>(&self, key: &CacheKey, build: F) -> Result<Vec<Chunk>>
    where
        F: FnOnce() -> Result<Vec<Chunk>>,
    {
        match self.lookup(key) {
            Lookup::Hit(chunks) => {
                info!("Loaded {} cached chunks for {}", chunks.len(), key);
                return Ok(chunks);
            }
            Lookup::Missing => {}
            Lookup::Corrupt(e) => {
                warn!("{}; rebuilding", e);
                if let Err(e) = std::fs::remove_file(self.path(key)) {
                    warn!("Could not remove corrupt cache entry {}: {}", key, e);
                }
            }
        }

        let chunks = build()?;
        self.store(key, &chunks)?;
        Ok(chunks)
    }
}
