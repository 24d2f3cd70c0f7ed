//! Content-addressed cache for pool embeddings
//!
//! Embedding a pool costs one provider call per batch of answers, so the
//! pool's vectors are kept on disk and reused while the pool file is
//! unchanged. Two files sit next to each other:
//!
//! - `<stem>_embeddings.bin`: the [`PoolEmbeddingSet`] plus the hash and
//!   model it was computed from (see `format.rs`)
//! - `<stem>_hash.txt`: the blake3 hash of the pool bytes, as hex
//!
//! Deleting either file forces a full recomputation.
//!
//! # Write order
//!
//! `store` removes the marker, writes the blob through a temporary file and
//! rename, then writes the marker the same way. The blob also carries the
//! hash, so a blob and marker from different generations never validate.
//!
//! # Usage
//!
//! ```ignore
//! use wandermatch_lib::cache::{CacheShape, EmbeddingCache};
//!
//! let cache = EmbeddingCache::beside("data/user_pool.csv");
//! let _lock = cache.lock()?;
//! let set = match cache.load(&pool_bytes, &shape) {
//!     Some(set) => set,
//!     None => {
//!         let set = embed_pool()?;
//!         cache.store(&pool_bytes, &set, model)?;
//!         set
//!     }
//! };
//! ```

use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::embed::PoolEmbeddingSet;
use crate::{Error, Result};

mod format;
mod lock;

pub use lock::CacheLock;

/// A content hash using blake3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Create a hash from content bytes.
    #[must_use]
    pub fn of(content: &[u8]) -> Self {
        Self(*blake3::hash(content).as_bytes())
    }

    /// Get the hash as a hex string.
    #[must_use]
    pub fn to_hex(self) -> String {
        self.to_string()
    }

    /// Parse a 64 character hex string.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != 64 || !s.is_ascii() {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// What a cached set must look like to be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheShape {
    pub candidates: usize,
    pub fields: usize,
    pub dim: usize,
    pub model: String,
}

/// Result of inspecting a cache without loading it for use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    /// One or both artifacts are absent
    Missing,
    /// The pool changed since the cache was written
    Stale { cached: String, current: String },
    /// The cache matches the pool
    Valid {
        candidates: usize,
        fields: usize,
        dim: usize,
        model: String,
    },
    /// The blob cannot be decoded or disagrees with the marker
    Corrupt(String),
}

/// Pool embedding cache backed by two files.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    blob_path: PathBuf,
    marker_path: PathBuf,
    lock_path: PathBuf,
}

impl EmbeddingCache {
    /// Cache files next to the pool file, named after its stem.
    #[must_use]
    pub fn beside(pool_path: impl AsRef<Path>) -> Self {
        let pool_path = pool_path.as_ref();
        let dir = pool_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::in_dir(dir, stem_of(pool_path))
    }

    /// Cache files in `dir`, named `<stem>_embeddings.bin` and `<stem>_hash.txt`.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>, stem: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            blob_path: dir.join(format!("{stem}_embeddings.bin")),
            marker_path: dir.join(format!("{stem}_hash.txt")),
            lock_path: dir.join(format!("{stem}.lock")),
        }
    }

    /// Cache for `pool_path`, in `cache_dir` when given, otherwise beside it.
    #[must_use]
    pub fn for_pool(pool_path: impl AsRef<Path>, cache_dir: Option<&Path>) -> Self {
        let pool_path = pool_path.as_ref();
        match cache_dir {
            Some(dir) => Self::in_dir(dir, stem_of(pool_path)),
            None => Self::beside(pool_path),
        }
    }

    #[must_use]
    pub fn blob_path(&self) -> &Path {
        &self.blob_path
    }

    #[must_use]
    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    /// Take the cross-process lock for this cache, blocking until available.
    pub fn lock(&self) -> Result<CacheLock> {
        if let Some(dir) = self.lock_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Persistence(format!("failed to create {}: {e}", dir.display()))
            })?;
        }
        CacheLock::acquire(&self.lock_path)
    }

    /// True only when the stored marker equals the hash of `pool_bytes`.
    #[must_use]
    pub fn validate(&self, pool_bytes: &[u8]) -> bool {
        self.stored_hash() == Some(ContentHash::of(pool_bytes))
    }

    /// Cached embeddings for this pool, or `None` if they must be recomputed.
    ///
    /// Corruption is logged and reported as a miss.
    #[must_use]
    pub fn load(&self, pool_bytes: &[u8], shape: &CacheShape) -> Option<PoolEmbeddingSet> {
        match self.try_load(pool_bytes, shape) {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    cache = %self.blob_path.display(),
                    error = %e,
                    "ignoring unusable embeddings cache; fresh computation required"
                );
                None
            }
        }
    }

    /// Like [`load`](Self::load), but surfaces corruption as
    /// [`Error::CacheCorruption`].
    pub fn try_load(
        &self,
        pool_bytes: &[u8],
        shape: &CacheShape,
    ) -> Result<Option<PoolEmbeddingSet>> {
        let Some(stored) = self.stored_hash() else {
            info!(
                cache = %self.marker_path.display(),
                "embeddings cache not found; fresh computation required"
            );
            return Ok(None);
        };

        let current = ContentHash::of(pool_bytes);
        if stored != current {
            warn!(
                cached = %stored,
                current = %current,
                "pool changed since embeddings were cached; fresh computation required"
            );
            return Ok(None);
        }

        let blob = self.read_blob()?;

        if blob.hash != current {
            return Err(Error::CacheCorruption(format!(
                "blob was written for pool {}, marker says {current}",
                blob.hash
            )));
        }
        if blob.model != shape.model {
            return Err(Error::CacheCorruption(format!(
                "blob was computed with model '{}', expected '{}'",
                blob.model, shape.model
            )));
        }

        let set = blob.set;
        let actual = (set.candidates(), set.fields(), set.dim());
        let expected = (shape.candidates, shape.fields, shape.dim);
        if actual != expected {
            return Err(Error::CacheCorruption(format!(
                "blob has shape {actual:?}, expected {expected:?}"
            )));
        }

        info!(
            candidates = set.candidates(),
            fields = set.fields(),
            "loaded cached pool embeddings"
        );
        Ok(Some(set))
    }

    /// Persist `set` as the embeddings of `pool_bytes`.
    pub fn store(&self, pool_bytes: &[u8], set: &PoolEmbeddingSet, model: &str) -> Result<()> {
        let hash = ContentHash::of(pool_bytes);
        let blob = format::encode(&hash, model, set)?;

        if let Some(dir) = self.blob_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Persistence(format!("failed to create {}: {e}", dir.display()))
            })?;
        }

        remove_if_exists(&self.marker_path)?;
        write_atomic(&self.blob_path, &blob)?;
        write_atomic(&self.marker_path, hash.to_hex().as_bytes())?;

        info!(
            candidates = set.candidates(),
            fields = set.fields(),
            hash = %hash,
            "saved pool embeddings to cache"
        );
        Ok(())
    }

    /// Delete both artifacts.
    pub fn clear(&self) -> Result<()> {
        remove_if_exists(&self.marker_path)?;
        remove_if_exists(&self.blob_path)
    }

    /// Inspect the cache against the current pool bytes.
    #[must_use]
    pub fn status(&self, pool_bytes: &[u8]) -> CacheStatus {
        let Some(stored) = self.stored_hash() else {
            return CacheStatus::Missing;
        };
        if !self.blob_path.exists() {
            return CacheStatus::Missing;
        }

        let current = ContentHash::of(pool_bytes);
        if stored != current {
            return CacheStatus::Stale {
                cached: stored.to_hex(),
                current: current.to_hex(),
            };
        }

        match self.read_blob() {
            Ok(blob) if blob.hash != stored => {
                CacheStatus::Corrupt("blob and marker disagree".to_string())
            }
            Ok(blob) => CacheStatus::Valid {
                candidates: blob.set.candidates(),
                fields: blob.set.fields(),
                dim: blob.set.dim(),
                model: blob.model,
            },
            Err(e) => CacheStatus::Corrupt(e.to_string()),
        }
    }

    fn stored_hash(&self) -> Option<ContentHash> {
        let text = std::fs::read_to_string(&self.marker_path).ok()?;
        let hash = ContentHash::from_hex(&text);
        if hash.is_none() {
            warn!(marker = %self.marker_path.display(), "unreadable cache marker");
        }
        hash
    }

    fn read_blob(&self) -> Result<format::Blob> {
        let bytes = std::fs::read(&self.blob_path).map_err(|e| {
            Error::CacheCorruption(format!("failed to read {}: {e}", self.blob_path.display()))
        })?;
        format::decode(&bytes)
    }
}

fn stem_of(path: &Path) -> &str {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("pool")
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let persist = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    };

    persist().map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        Error::Persistence(format!("failed to write {}: {e}", path.display()))
    })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Persistence(format!(
            "failed to remove {}: {e}",
            path.display()
        ))),
    }
}
