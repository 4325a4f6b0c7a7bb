//! Content hashing and persisted upload state.
//!
//! Publishing is incremental: a run only talks to the remote store about
//! files whose content changed since the last successful upload. This module
//! provides the two pieces that make that possible.
//!
//! ## Hashes
//!
//! Everything is keyed by SHA-256 of file contents, not modification time, so
//! state survives `git checkout` (which resets mtimes). [`short_hash`] is the
//! 10-character prefix used in cache-busted filenames.
//!
//! ## Upload cache
//!
//! [`UploadCache`] maps object keys to the hash of the content last uploaded
//! there (or found there, for create-only uploads that skipped an existing
//! object). It is stored per bucket at `<cache_dir>/<bucket>.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "stories/2024/03/my-story/index.html": { "sha256": "9f86d0…" }
//!   }
//! }
//! ```
//!
//! A cache entry is a hint, never the source of truth: a stale entry makes a
//! run skip a file, so the cache is only updated after the remote confirms
//! the write. Delete the file to force a full comparison.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Version of the cache file format. Bump this to invalidate all existing
/// caches when the format or key computation changes.
const CACHE_VERSION: u32 = 1;

/// Length of the hash embedded in cache-busted filenames.
pub const SHORT_HASH_LEN: usize = 10;

/// State recorded for one uploaded object.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub sha256: String,
}

/// On-disk record of previously uploaded objects for one bucket.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UploadCache {
    pub version: u32,
    pub entries: BTreeMap<String, CacheEntry>,
}

impl UploadCache {
    /// Create an empty cache (first run, or after invalidation).
    pub fn empty() -> Self {
        Self {
            version: CACHE_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Load the cache for `bucket`. Returns an empty cache if the file
    /// doesn't exist or can't be parsed (version mismatch, corruption).
    pub fn load(cache_dir: &Path, bucket: &str) -> Self {
        let path = cache_file(cache_dir, bucket);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let cache: Self = match serde_json::from_str(&content) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt upload cache");
                return Self::empty();
            }
        };
        if cache.version != CACHE_VERSION {
            return Self::empty();
        }
        cache
    }

    /// Save the cache for `bucket`, creating the cache directory if needed.
    pub fn save(&self, cache_dir: &Path, bucket: &str) -> io::Result<()> {
        std::fs::create_dir_all(cache_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(cache_file(cache_dir, bucket), json)
    }

    /// Whether `key` was last uploaded with exactly this content.
    pub fn is_current(&self, key: &str, sha256: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.sha256 == sha256)
    }

    pub fn insert(&mut self, key: String, sha256: String) {
        self.entries.insert(key, CacheEntry { sha256 });
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Path of the cache file for a bucket.
pub fn cache_file(cache_dir: &Path, bucket: &str) -> PathBuf {
    cache_dir.join(format!("{bucket}.json"))
}

/// SHA-256 of a byte slice, as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hash_bytes(&bytes))
}

/// Hash prefix used in cache-busted filenames.
pub fn short_hash(full: &str) -> &str {
    &full[..SHORT_HASH_LEN.min(full.len())]
}
