//! Shared test utilities for the storypress test suite.
//!
//! Provides project fixtures (a temp directory with a `config.yaml`, a
//! generated site and an assets directory), git repository helpers for the
//! preflight checks, and a store wrapper that fails on demand.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let project = Project::new(DATED);
//! project.write("build/index.html", "<p>hi</p>");
//! project.commit("initial");
//!
//! let config = project.config();
//! ```

use git2::{IndexAddOption, Repository, Signature};
use std::path::Path;
use tempfile::TempDir;

use crate::config::{self, ProjectConfig};
use crate::store::{
    MemoryStore, ObjectMeta, ObjectStore, ObjectSummary, PutObject, PutOutcome, StoreError,
};

/// Config body with a valid project date.
pub const DATED: &str = r#"
project_name: My   Cool  Story
project_year: "2024"
project_month: "03"
asset_domain: https://cdn.example.com/
uploads:
  max_concurrent: 2
  retry_delay_ms: 1
"#;

// =========================================================================
// Files
// =========================================================================

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: impl AsRef<[u8]>) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

pub fn read_file(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}

// =========================================================================
// Git
// =========================================================================

/// Initialize an empty repository at `path`.
pub fn init_repo(path: &Path) -> Repository {
    Repository::init(path).unwrap()
}

/// Stage every non-ignored change and commit it.
pub fn commit_all(repo: &Repository, message: &str) {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let signature = Signature::now("Test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )
    .unwrap();
}

// =========================================================================
// Project fixture
// =========================================================================

/// A temp project directory with a config file and a git repository.
///
/// The publish cache directory is git-ignored, so publishing never dirties
/// the working tree.
pub struct Project {
    pub tmp: TempDir,
    pub repo: Repository,
}

impl Project {
    pub fn new(config_yaml: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let repo = init_repo(tmp.path());
        write_file(tmp.path(), "config.yaml", config_yaml);
        write_file(tmp.path(), ".gitignore", ".publish-cache/\n.tmp/\n");
        Self { tmp, repo }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn write(&self, rel: &str, contents: impl AsRef<[u8]>) {
        write_file(self.root(), rel, contents);
    }

    pub fn read(&self, rel: &str) -> String {
        read_file(self.root(), rel)
    }

    pub fn commit(&self, message: &str) {
        commit_all(&self.repo, message);
    }

    pub fn config(&self) -> ProjectConfig {
        config::load_config(&self.root().join("config.yaml")).unwrap()
    }
}

// =========================================================================
// Stores
// =========================================================================

/// Wraps a [`MemoryStore`] and fails every put whose key contains `marker`.
pub struct FailingStore {
    pub inner: MemoryStore,
    pub marker: String,
    /// Also refuse every delete with a 403.
    pub deny_deletes: bool,
}

impl FailingStore {
    pub fn new(marker: &str) -> Self {
        Self {
            inner: MemoryStore::new("failing"),
            marker: marker.to_string(),
            deny_deletes: false,
        }
    }

    /// Accepts every upload but rejects deletes.
    pub fn denying_deletes() -> Self {
        Self {
            deny_deletes: true,
            ..Self::new("\0")
        }
    }
}

impl ObjectStore for FailingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        self.inner.head(key)
    }

    fn put(&self, object: &PutObject) -> Result<PutOutcome, StoreError> {
        if object.key.contains(&self.marker) {
            return Err(StoreError::Status {
                op: "PUT",
                key: object.key.clone(),
                status: 500,
                body: "InternalError".to_string(),
            });
        }
        self.inner.put(object)
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        self.inner.list(prefix)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.deny_deletes {
            return Err(StoreError::Status {
                op: "DELETE",
                key: key.to_string(),
                status: 403,
                body: "AccessDenied".to_string(),
            });
        }
        self.inner.delete(key)
    }
}
