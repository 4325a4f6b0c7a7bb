//! Pre-publish checks.
//!
//! Two independent checks guard the publish tasks. Both are synchronous and
//! run before any network call, so a failure never leaves partial remote
//! state behind:
//!
//! 1. [`check_clean_worktree`]: the git working tree has no uncommitted or
//!    untracked changes. What gets published should be what is committed.
//! 2. [`validate_project_date`]: the configured project year and month are
//!    present and well-formed. They become path segments, so a bad value
//!    would publish to the wrong place.

use git2::{ErrorCode, Repository, Status, StatusOptions};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

static YEAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[12][0-9]{3}$").expect("year pattern must compile"));
static MONTH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(1[0-2]|0[1-9])$").expect("month pattern must compile"));

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("Workspace has uncommitted changes; commit or stash them first:\n  {}", .0.join("\n  "))]
    DirtyWorkspace(Vec<String>),
    #[error("Not inside a git repository: {0}")]
    NotARepository(PathBuf),
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("Missing project date: set project_year and project_month in the config")]
    MissingProjectDate,
    #[error(
        "Malformed project date (year {year:?}, month {month:?}): expected a quoted 4-digit year and a 01-12 month"
    )]
    MalformedProjectDate { year: String, month: String },
}

/// A validated project date. Only [`validate_project_date`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDate {
    year: String,
    month: String,
}

impl ProjectDate {
    pub fn year(&self) -> &str {
        &self.year
    }

    pub fn month(&self) -> &str {
        &self.month
    }
}

/// Validate the configured project year and month.
///
/// Year must match `^[12][0-9]{3}$` and month `^(1[0-2]|0[1-9])$`.
pub fn validate_project_date(
    year: Option<&str>,
    month: Option<&str>,
) -> Result<ProjectDate, PreflightError> {
    let (year, month) = match (year, month) {
        (Some(y), Some(m)) if !y.is_empty() && !m.is_empty() => (y, m),
        _ => return Err(PreflightError::MissingProjectDate),
    };
    if !YEAR_PATTERN.is_match(year) || !MONTH_PATTERN.is_match(month) {
        return Err(PreflightError::MalformedProjectDate {
            year: year.to_string(),
            month: month.to_string(),
        });
    }
    Ok(ProjectDate {
        year: year.to_string(),
        month: month.to_string(),
    })
}

/// Fail if the git repository containing `dir` has local changes.
///
/// Modified, staged, deleted, renamed, and untracked files all count;
/// ignored files do not.
pub fn check_clean_worktree(dir: &Path) -> Result<(), PreflightError> {
    let repo = match Repository::discover(dir) {
        Ok(repo) => repo,
        Err(e) if e.code() == ErrorCode::NotFound => {
            return Err(PreflightError::NotARepository(dir.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    let statuses = repo.statuses(Some(&mut options))?;

    let dirty: Vec<String> = statuses
        .iter()
        .filter(|entry| {
            let status = entry.status();
            status != Status::CURRENT && !status.contains(Status::IGNORED)
        })
        .map(|entry| entry.path().unwrap_or("<non-utf8 path>").to_string())
        .collect();

    if dirty.is_empty() {
        tracing::debug!(repo = %repo.path().display(), "working tree clean");
        Ok(())
    } else {
        Err(PreflightError::DirtyWorkspace(dirty))
    }
}
