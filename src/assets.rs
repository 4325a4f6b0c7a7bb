//! Asset publishing.
//!
//! Uploads the project's generic assets (images, fonts, media, scripts,
//! data) to the asset bucket under
//! `<assets.root>/<year>/<month>/<project-slug>/`.
//!
//! ## Source Directory
//!
//! When the cache-busting task has run, the staging directory holds the
//! hash-named copies and a `rev-manifest.json`; those are published. Otherwise
//! the raw assets directory is published as-is.
//!
//! ## Create-Only Uploads
//!
//! Published asset URLs may already be embedded in live pages, so an existing
//! object is never overwritten. For each file:
//!
//! ```text
//! cache says key already holds this content  → [cache]   no network call
//! remote object exists                       → [exists]  left untouched
//! otherwise                                  → [upload]  create-only put
//! ```
//!
//! Text-like files are gzip-compressed and uploaded with
//! `Content-Encoding: gzip`.
//!
//! ## Failures
//!
//! Uploads run in parallel on a bounded pool. Every file is attempted; the
//! upload cache is saved with whatever succeeded, then all failures are
//! reported together. Re-running picks up only what failed.

use crate::cache::{UploadCache, hash_bytes};
use crate::cachebust::REV_MANIFEST;
use crate::config::{ProjectConfig, effective_upload_threads};
use crate::naming::publish_path;
use crate::preflight::ProjectDate;
use crate::scan::{self, LocalFile};
use crate::store::{ObjectStore, PutObject, PutOutcome, StoreError, WriteMode};
use flate2::Compression;
use flate2::write::GzEncoder;
use rayon::prelude::*;
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Extensions eligible for asset publishing.
pub const ASSET_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // media
    "mp4", "webm", "mp3", "ogg", "m4a", "vtt",
    // scripts, styles, data
    "js", "css", "map", "json", "geojson", "csv", "txt", "xml", "pdf",
];

/// Extensions compressed before upload.
pub const GZIP_EXTENSIONS: &[&str] = &[
    "js", "css", "map", "json", "geojson", "csv", "txt", "xml", "svg", "html", "htm",
];

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to walk asset directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Failed to start upload pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("Asset directory not found: {0}")]
    MissingDir(PathBuf),
    #[error("{} of {total} uploads failed:\n  {}", .failures.len(), summarize(.failures))]
    Failed {
        total: usize,
        failures: Vec<UploadFailure>,
    },
}

/// One object that could not be uploaded.
#[derive(Debug)]
pub struct UploadFailure {
    pub key: String,
    pub error: StoreError,
}

fn summarize(failures: &[UploadFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.key, f.error))
        .collect::<Vec<_>>()
        .join("\n  ")
}

/// What happened to one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetAction {
    Uploaded,
    /// Remote object already existed; left untouched.
    Existing,
    /// Upload cache showed the key already holds this content.
    Cached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub key: String,
    pub action: AssetAction,
    pub gzipped: bool,
}

/// Result of an asset publish run, entries sorted by key.
#[derive(Debug, Clone)]
pub struct AssetReport {
    pub bucket: String,
    pub prefix: String,
    pub source: PathBuf,
    pub entries: Vec<AssetEntry>,
}

impl AssetReport {
    pub fn count(&self, action: AssetAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}

/// A file read, hashed, and (maybe) compressed, ready to upload.
struct PreparedAsset {
    key: String,
    sha256: String,
    body: Vec<u8>,
    content_type: String,
    gzipped: bool,
}

/// Directory assets are published from: staging once cache-busted.
pub fn asset_source_dir(config: &ProjectConfig) -> PathBuf {
    let staging = config.staging_path();
    if staging.join(REV_MANIFEST).is_file() {
        staging
    } else {
        config.assets_path()
    }
}

pub fn is_publishable_asset(file: &LocalFile) -> bool {
    file.rel != REV_MANIFEST && ASSET_EXTENSIONS.contains(&file.extension().as_str())
}

/// Publish assets to `store` with create-only semantics.
pub fn publish_assets(
    config: &ProjectConfig,
    date: &ProjectDate,
    store: &dyn ObjectStore,
) -> Result<AssetReport, PublishError> {
    let source = asset_source_dir(config);
    if !source.is_dir() {
        return Err(PublishError::MissingDir(source));
    }
    let prefix = publish_path(&config.assets.root, date, &config.project_name);
    let files = scan::scan_files(&source, is_publishable_asset)?;
    tracing::debug!(count = files.len(), source = %source.display(), "assets collected");

    let prepared = files
        .par_iter()
        .map(|file| prepare(file, &prefix))
        .collect::<Result<Vec<_>, io::Error>>()?;

    let cache_dir = config.cache_path();
    let mut cache = UploadCache::load(&cache_dir, store.name());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(effective_upload_threads(&config.uploads))
        .build()?;
    let cache_control = config.assets.cache_control.as_str();
    let results: Vec<Result<AssetAction, StoreError>> = pool.install(|| {
        prepared
            .par_iter()
            .map(|asset| upload(asset, cache_control, store, &cache))
            .collect()
    });

    let total = prepared.len();
    let mut entries = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (asset, result) in prepared.into_iter().zip(results) {
        match result {
            Ok(action) => {
                cache.insert(asset.key.clone(), asset.sha256);
                entries.push(AssetEntry {
                    key: asset.key,
                    action,
                    gzipped: asset.gzipped,
                });
            }
            Err(error) => failures.push(UploadFailure {
                key: asset.key,
                error,
            }),
        }
    }
    cache.save(&cache_dir, store.name())?;

    if !failures.is_empty() {
        return Err(PublishError::Failed { total, failures });
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(AssetReport {
        bucket: store.name().to_string(),
        prefix,
        source,
        entries,
    })
}

fn prepare(file: &LocalFile, prefix: &str) -> io::Result<PreparedAsset> {
    let raw = std::fs::read(&file.path)?;
    let sha256 = hash_bytes(&raw);
    let gzipped = GZIP_EXTENSIONS.contains(&file.extension().as_str());
    let body = if gzipped { gzip(&raw)? } else { raw };
    Ok(PreparedAsset {
        key: format!("{prefix}{}", file.rel),
        sha256,
        body,
        content_type: content_type_for(&file.rel),
        gzipped,
    })
}

fn upload(
    asset: &PreparedAsset,
    cache_control: &str,
    store: &dyn ObjectStore,
    cache: &UploadCache,
) -> Result<AssetAction, StoreError> {
    if cache.is_current(&asset.key, &asset.sha256) {
        return Ok(AssetAction::Cached);
    }
    if store.head(&asset.key)?.is_some() {
        return Ok(AssetAction::Existing);
    }
    let object = PutObject {
        key: asset.key.clone(),
        body: asset.body.clone(),
        content_type: asset.content_type.clone(),
        content_encoding: asset.gzipped.then(|| "gzip".to_string()),
        cache_control: Some(cache_control.to_string()),
        sha256: asset.sha256.clone(),
        mode: WriteMode::CreateOnly,
    };
    match store.put(&object)? {
        PutOutcome::Written => Ok(AssetAction::Uploaded),
        PutOutcome::AlreadyExists => Ok(AssetAction::Existing),
    }
}

/// Gzip-compress a buffer.
pub fn gzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// MIME type for a path, falling back to `application/octet-stream`.
pub fn content_type_for(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
