//! Remote object storage.
//!
//! | Piece | Role |
//! |---|---|
//! | [`ObjectStore`] | the four operations publishing needs: head, put, list, delete |
//! | [`S3Store`] | S3-compatible REST over blocking `reqwest`, SigV4-signed |
//! | [`MemoryStore`] | in-process store with identical semantics, used by tests |
//!
//! Object keys are `<publish prefix><relative path>` with `/` separators.
//! Every upload records the SHA-256 of its source content as object
//! metadata (`x-amz-meta-sha256` on S3) so a later sync can tell whether
//! the remote copy is identical without downloading it.

mod memory;
mod s3;
mod sign;

pub use memory::{MemoryStore, StoredObject};
pub use s3::S3Store;

use thiserror::Error;

/// Metadata key holding the source content hash.
pub const SHA256_META: &str = "sha256";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{op} {key} failed with HTTP {status}: {body}")]
    Status {
        op: &'static str,
        key: String,
        status: u16,
        body: String,
    },
    #[error("Malformed store response: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(e) => e.is_timeout() || e.is_connect(),
            StoreError::Status { status, .. } => *status == 429 || *status >= 500,
            StoreError::Malformed(_) => false,
        }
    }
}

/// How a put treats an object already present at the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Refuse to replace an existing object.
    CreateOnly,
    /// Replace whatever is there.
    Overwrite,
}

/// A single object upload.
#[derive(Debug, Clone)]
pub struct PutObject {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    /// `Some("gzip")` when `body` is compressed.
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    /// SHA-256 of the uncompressed source content.
    pub sha256: String,
    pub mode: WriteMode,
}

/// Result of a put that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    /// CreateOnly put found an object already at the key; nothing changed.
    AlreadyExists,
}

/// What a head request reports about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Source content hash recorded at upload time, if the object has one.
    pub sha256: Option<String>,
}

/// One entry of a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// The storage operations the publishers depend on.
///
/// `Sync` so a single store can serve a parallel upload batch.
pub trait ObjectStore: Sync {
    /// Bucket (or equivalent) name, used for messages and cache files.
    fn name(&self) -> &str;

    /// Metadata for `key`, or `None` if no object exists there.
    fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError>;

    /// Upload an object, honoring its [`WriteMode`].
    fn put(&self, object: &PutObject) -> Result<PutOutcome, StoreError>;

    /// Every object whose key starts with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError>;

    /// Remove `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}
