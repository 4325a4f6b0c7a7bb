//! Story publishing.
//!
//! Mirrors the generated site directory onto the story bucket under
//! `<story.root>/<year>/<month>/<project-slug>/`. The flow is linear with a
//! single gate:
//!
//! ```text
//! preflight (clean tree, valid date) → confirm → upload new/changed → delete stale
//! ```
//!
//! [`preflight`] runs both checks and returns a [`Cleared`] token; only a
//! cleared project can be published. Declining the confirmation ends the run
//! before any store call.
//!
//! Design-tool sources, markdown previews, and template sources are never
//! published. Hidden files and directories are skipped too, except the ones
//! in [`PUBLISHED_HIDDEN`] such as `.well-known/`.
//!
//! ## Change Detection
//!
//! A local file whose key is already listed remotely is skipped when either
//! the upload cache or the remote `sha256` metadata shows identical content.
//! Otherwise it is uploaded with overwrite semantics. Remote keys under the
//! prefix with no local counterpart are deleted, but only after every upload
//! succeeded: a failed batch never removes anything.

use crate::cache::{UploadCache, hash_bytes};
use crate::config::{ProjectConfig, effective_upload_threads};
use crate::naming::publish_path;
use crate::preflight::{self, PreflightError, ProjectDate};
use crate::scan::{self, LocalFile};
use crate::store::{ObjectStore, PutObject, StoreError, WriteMode};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Extensions excluded from story publishing.
pub const EXCLUDED_EXTENSIONS: &[&str] = &[
    // design sources
    "psd", "ai", "sketch",
    // markup previews
    "md", "markdown",
    // template sources
    "hbs", "handlebars", "njk", "mustache",
];

/// Hidden entries that still belong to the published site.
pub const PUBLISHED_HIDDEN: &[&str] = &[".well-known"];

#[derive(Error, Debug)]
pub enum StoryError {
    #[error(transparent)]
    Preflight(#[from] PreflightError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to walk site directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Confirmation prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("Failed to start upload pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("Site directory not found: {0}")]
    MissingDir(PathBuf),
}

/// Asks the operator whether to go ahead.
pub trait Confirmation {
    fn confirm(&self, prompt: &str) -> Result<bool, StoryError>;
}

/// Interactive yes/no prompt on the terminal, defaulting to no.
pub struct TerminalConfirmation;

impl Confirmation for TerminalConfirmation {
    fn confirm(&self, prompt: &str) -> Result<bool, StoryError> {
        Ok(dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?)
    }
}

/// Answers every prompt the same way. Used by `--yes` and tests.
pub struct FixedConfirmation(pub bool);

impl Confirmation for FixedConfirmation {
    fn confirm(&self, _prompt: &str) -> Result<bool, StoryError> {
        Ok(self.0)
    }
}

/// A project that passed preflight, with its computed publish prefix.
#[derive(Debug)]
pub struct Cleared<'a> {
    config: &'a ProjectConfig,
    date: ProjectDate,
    prefix: String,
}

impl Cleared<'_> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn date(&self) -> &ProjectDate {
        &self.date
    }
}

/// Run the clean-tree and project-date checks.
pub fn preflight(config: &ProjectConfig) -> Result<Cleared<'_>, PreflightError> {
    preflight::check_clean_worktree(config.base_dir())?;
    let date = preflight::validate_project_date(
        config.project_year.as_deref(),
        config.project_month.as_deref(),
    )?;
    let prefix = publish_path(&config.story.root, &date, &config.project_name);
    Ok(Cleared {
        config,
        date,
        prefix,
    })
}

/// What happened to one remote key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Created,
    Updated,
    Unchanged,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    pub key: String,
    pub action: SyncAction,
}

/// Result of a completed mirror-sync, entries sorted by key.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub bucket: String,
    pub prefix: String,
    pub entries: Vec<SyncEntry>,
}

impl SyncReport {
    pub fn count(&self, action: SyncAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}

#[derive(Debug)]
pub enum StoryOutcome {
    /// Operator declined; nothing was sent.
    Declined,
    Published(SyncReport),
}

pub fn is_publishable_story_file(file: &LocalFile) -> bool {
    !EXCLUDED_EXTENSIONS.contains(&file.extension().as_str())
}

/// Confirm, then mirror the site directory onto the cleared prefix.
pub fn publish_story(
    cleared: &Cleared<'_>,
    store: &dyn ObjectStore,
    confirmation: &dyn Confirmation,
) -> Result<StoryOutcome, StoryError> {
    let config = cleared.config;
    let source = config.dest_path();
    if !source.is_dir() {
        return Err(StoryError::MissingDir(source));
    }

    let prompt = format!(
        "Publish {} to {}/{}?",
        source.display(),
        store.name(),
        cleared.prefix
    );
    if !confirmation.confirm(&prompt)? {
        tracing::info!("story publish declined");
        return Ok(StoryOutcome::Declined);
    }

    let files = scan::scan_files_allowing(&source, PUBLISHED_HIDDEN, is_publishable_story_file)?;
    let local = files
        .par_iter()
        .map(|file| -> io::Result<(String, (String, Vec<u8>))> {
            let body = std::fs::read(&file.path)?;
            Ok((format!("{}{}", cleared.prefix, file.rel), (hash_bytes(&body), body)))
        })
        .collect::<Result<BTreeMap<String, (String, Vec<u8>)>, io::Error>>()?;

    let remote: BTreeSet<String> = store
        .list(&cleared.prefix)?
        .into_iter()
        .map(|o| o.key)
        .collect();
    tracing::debug!(local = local.len(), remote = remote.len(), "story sync plan");

    let cache_dir = config.cache_path();
    let mut cache = UploadCache::load(&cache_dir, store.name());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(effective_upload_threads(&config.uploads))
        .build()?;
    let cache_control = config.story.cache_control.as_str();
    let results: Vec<(String, Result<SyncAction, StoreError>)> = pool.install(|| {
        local
            .par_iter()
            .map(|(key, (sha256, body))| {
                let result = sync_file(
                    key,
                    sha256,
                    body,
                    remote.contains(key),
                    cache_control,
                    store,
                    &cache,
                );
                (key.clone(), result)
            })
            .collect()
    });

    let mut entries = Vec::with_capacity(local.len());
    let mut first_error = None;
    for (key, result) in results {
        match result {
            Ok(action) => {
                if let Some((sha256, _)) = local.get(&key) {
                    cache.insert(key.clone(), sha256.clone());
                }
                entries.push(SyncEntry { key, action });
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "story upload failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        cache.save(&cache_dir, store.name())?;
        return Err(e.into());
    }

    let mut first_error = None;
    for key in remote.iter().filter(|k| !local.contains_key(*k)) {
        match store.delete(key) {
            Ok(()) => {
                cache.remove(key);
                entries.push(SyncEntry {
                    key: key.clone(),
                    action: SyncAction::Deleted,
                });
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "stale object delete failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    // Uploads above succeeded, so their entries are saved even if a delete failed
    cache.save(&cache_dir, store.name())?;
    if let Some(e) = first_error {
        return Err(e.into());
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(StoryOutcome::Published(SyncReport {
        bucket: store.name().to_string(),
        prefix: cleared.prefix.clone(),
        entries,
    }))
}

fn sync_file(
    key: &str,
    sha256: &str,
    body: &[u8],
    exists_remotely: bool,
    cache_control: &str,
    store: &dyn ObjectStore,
    cache: &UploadCache,
) -> Result<SyncAction, StoreError> {
    if exists_remotely {
        if cache.is_current(key, sha256) {
            return Ok(SyncAction::Unchanged);
        }
        let remote_sha = store.head(key)?.and_then(|meta| meta.sha256);
        if remote_sha.as_deref() == Some(sha256) {
            return Ok(SyncAction::Unchanged);
        }
    }
    store.put(&PutObject {
        key: key.to_string(),
        body: body.to_vec(),
        content_type: crate::assets::content_type_for(key),
        content_encoding: None,
        cache_control: Some(cache_control.to_string()),
        sha256: sha256.to_string(),
        mode: WriteMode::Overwrite,
    })?;
    Ok(if exists_remotely {
        SyncAction::Updated
    } else {
        SyncAction::Created
    })
}
