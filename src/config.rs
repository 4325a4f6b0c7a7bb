//! Project configuration module.
//!
//! Handles loading and validating the project `config.yaml`, and reading the
//! two independent sets of storage credentials from the environment.
//!
//! ## Config File
//!
//! ```yaml
//! # Required
//! project_name: My Cool Story          # slugified into publish paths
//! project_year: "2024"                 # quoted: 4 digits, 1000-2999
//! project_month: "03"                  # quoted: 01-12
//! asset_domain: https://assets.example.com
//!
//! # Optional - defaults shown
//! dest_dir: build                      # generated site directory
//! cache_dir: .publish-cache            # upload cache state
//!
//! assets:
//!   dir: assets                        # asset sources
//!   staging: .tmp/assets               # cache-busted copies
//!   root: assets                       # publish-path root in the asset bucket
//!   cache_control: public, max-age=31536000
//!
//! story:
//!   root: stories                      # publish-path root in the story bucket
//!   cache_control: public, max-age=300
//!
//! combine:                             # relative to dest_dir
//!   embed: embed.json
//!   styles: main.json
//!   output: combined.json
//!
//! uploads:
//!   max_concurrent: 8                  # omit for auto = CPU cores
//!   max_retries: 3
//!   retry_delay_ms: 500
//! ```
//!
//! The project date stays optional at load time: a missing or malformed date
//! is reported by [`crate::preflight`] when a publish task needs it.
//!
//! Unknown keys are rejected to catch typos early. Relative paths resolve
//! against the directory containing the config file.
//!
//! ## Environment
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `STORY_BUCKET`, `ASSETS_BUCKET` | bucket name |
//! | `STORY_REGION`, `ASSETS_REGION` | bucket region |
//! | `STORY_ACCESS_KEY`, `ASSETS_ACCESS_KEY` | access key id |
//! | `STORY_SECRET_KEY`, `ASSETS_SECRET_KEY` | secret access key |
//! | `STORY_ENDPOINT`, `ASSETS_ENDPOINT` | optional S3-compatible endpoint |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
}

/// Project configuration loaded from `config.yaml`.
///
/// Loaded once at process start and passed by reference to every task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Human-readable project name; slugified into publish paths.
    pub project_name: String,
    /// Initial year of the project, as a 4-digit string.
    #[serde(default)]
    pub project_year: Option<String>,
    /// Initial month of the project, as a 2-digit string.
    #[serde(default)]
    pub project_month: Option<String>,
    /// Base URL that hosted assets are served from.
    pub asset_domain: String,
    /// Generated site directory.
    #[serde(default = "default_dest_dir")]
    pub dest_dir: String,
    /// Directory holding persisted upload cache state.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub story: StoryConfig,
    #[serde(default)]
    pub combine: CombineConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    /// Directory containing the config file. Never serialized.
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_dest_dir() -> String {
    "build".to_string()
}

fn default_cache_dir() -> String {
    ".publish-cache".to_string()
}

impl ProjectConfig {
    /// Validate values that every task relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "project_name must not be empty".into(),
            ));
        }
        if self.dest_dir.trim().is_empty() {
            return Err(ConfigError::Validation("dest_dir must not be empty".into()));
        }
        if self.asset_domain.trim().is_empty() {
            return Err(ConfigError::Validation(
                "asset_domain must not be empty".into(),
            ));
        }
        if self.assets.dir == self.assets.staging {
            return Err(ConfigError::Validation(
                "assets.dir and assets.staging must differ".into(),
            ));
        }
        if self.uploads.max_concurrent == Some(0) {
            return Err(ConfigError::Validation(
                "uploads.max_concurrent must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve a config-relative path against the config file's directory.
    pub fn resolve(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.base_dir.join(rel)
    }

    /// Directory the config file was loaded from.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn dest_path(&self) -> PathBuf {
        self.resolve(&self.dest_dir)
    }

    pub fn assets_path(&self) -> PathBuf {
        self.resolve(&self.assets.dir)
    }

    pub fn staging_path(&self) -> PathBuf {
        self.resolve(&self.assets.staging)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.resolve(&self.cache_dir)
    }

    /// Parse config from YAML text, rooting relative paths at `base_dir`.
    pub fn from_yaml(content: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: ProjectConfig = serde_yaml::from_str(content)?;
        config.base_dir = base_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }
}

/// Asset source and publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetsConfig {
    /// Asset source directory.
    pub dir: String,
    /// Staging directory for cache-busted copies.
    pub staging: String,
    /// Publish-path root inside the asset bucket.
    pub root: String,
    /// `Cache-Control` header for uploaded assets.
    pub cache_control: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            dir: "assets".to_string(),
            staging: ".tmp/assets".to_string(),
            root: "assets".to_string(),
            cache_control: "public, max-age=31536000".to_string(),
        }
    }
}

/// Story publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoryConfig {
    /// Publish-path root inside the story bucket.
    pub root: String,
    /// `Cache-Control` header for uploaded story files.
    pub cache_control: String,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            root: "stories".to_string(),
            cache_control: "public, max-age=300".to_string(),
        }
    }
}

/// Metadata combiner file names, relative to `dest_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CombineConfig {
    pub embed: String,
    pub styles: String,
    pub output: String,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            embed: "embed.json".to_string(),
            styles: "main.json".to_string(),
            output: "combined.json".to_string(),
        }
    }
}

/// Upload batch settings shared by both publishers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Maximum parallel uploads. When absent, defaults to the number of CPU
    /// cores. Values larger than the core count are clamped down.
    pub max_concurrent: Option<usize>,
    /// Retries for transient failures (5xx, 429, timeouts).
    pub max_retries: u32,
    /// Base backoff delay; doubles after each retry.
    pub retry_delay_ms: u64,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// Resolve the effective upload thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_upload_threads(config: &UploadsConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_concurrent
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Load config from a YAML file.
pub fn load_config(path: &Path) -> Result<ProjectConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    ProjectConfig::from_yaml(&content, base_dir)
}

// =============================================================================
// Credentials
// =============================================================================

/// Which bucket a credential set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
    Story,
    Assets,
}

impl BucketKind {
    /// Environment variable prefix for this credential set.
    pub fn env_prefix(self) -> &'static str {
        match self {
            BucketKind::Story => "STORY",
            BucketKind::Assets => "ASSETS",
        }
    }
}

/// Credentials and addressing for one remote bucket.
#[derive(Clone)]
pub struct StoreCredentials {
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// S3-compatible endpoint override. Switches to path-style addressing.
    pub endpoint: Option<String>,
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("access_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

impl StoreCredentials {
    /// Read a credential set from the process environment.
    pub fn from_env(kind: BucketKind) -> Result<Self, ConfigError> {
        Self::from_lookup(kind, |name| std::env::var(name).ok())
    }

    /// Read a credential set through an arbitrary variable lookup.
    pub fn from_lookup<F>(kind: BucketKind, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = kind.env_prefix();
        let required = |suffix: &str| {
            let name = format!("{prefix}_{suffix}");
            lookup(&name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };
        Ok(Self {
            bucket: required("BUCKET")?,
            region: required("REGION")?,
            access_key: required("ACCESS_KEY")?,
            secret_key: required("SECRET_KEY")?,
            endpoint: lookup(&format!("{prefix}_ENDPOINT")).filter(|v| !v.trim().is_empty()),
        })
    }
}

/// Returns a fully-commented starter `config.yaml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_yaml() -> &'static str {
    r##"# storypress configuration
# ========================
# Required keys come first. Everything below them is optional and shows the
# default value. Unknown keys will cause an error.

# Human-readable project name. Slugified into publish paths:
#   "My Cool Story" -> my-cool-story
project_name: My Cool Story

# Project initial date. Quote both values.
#   year:  4 digits, 1000-2999
#   month: 2 digits, 01-12
project_year: "2024"
project_month: "01"

# Base URL that hosted assets are served from.
asset_domain: https://assets.example.com

# Generated site directory.
dest_dir: build

# Where upload cache state is kept between runs. Add it to .gitignore so a
# publish never dirties the working tree.
cache_dir: .publish-cache

# ---------------------------------------------------------------------------
# Assets
# ---------------------------------------------------------------------------
assets:
  dir: assets
  staging: .tmp/assets
  # Published under <root>/<year>/<month>/<project-slug>/
  root: assets
  cache_control: public, max-age=31536000

# ---------------------------------------------------------------------------
# Story
# ---------------------------------------------------------------------------
story:
  # Published under <root>/<year>/<month>/<project-slug>/
  root: stories
  cache_control: public, max-age=300

# ---------------------------------------------------------------------------
# Metadata combiner (paths relative to dest_dir)
# ---------------------------------------------------------------------------
combine:
  embed: embed.json
  styles: main.json
  output: combined.json

# ---------------------------------------------------------------------------
# Uploads
# ---------------------------------------------------------------------------
uploads:
  # Maximum parallel uploads. Omit to auto-detect (= number of CPU cores).
  # max_concurrent: 8
  max_retries: 3
  retry_delay_ms: 500
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
project_name: My Story
asset_domain: https://cdn.example.com
"#;

    fn parse(yaml: &str) -> Result<ProjectConfig, ConfigError> {
        ProjectConfig::from_yaml(yaml, Path::new("/project"))
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.project_name, "My Story");
        assert_eq!(config.dest_dir, "build");
        assert_eq!(config.cache_dir, ".publish-cache");
        assert_eq!(config.assets.dir, "assets");
        assert_eq!(config.assets.staging, ".tmp/assets");
        assert_eq!(config.story.root, "stories");
        assert_eq!(config.combine.embed, "embed.json");
        assert_eq!(config.uploads.max_retries, 3);
        assert!(config.project_year.is_none());
        assert!(config.project_month.is_none());
    }

    #[test]
    fn parse_partial_section() {
        let config = parse(
            r#"
project_name: X
asset_domain: https://cdn.example.com
assets:
  root: media
"#,
        )
        .unwrap();
        assert_eq!(config.assets.root, "media");
        // Rest of the section keeps its defaults
        assert_eq!(config.assets.dir, "assets");
        assert_eq!(config.assets.cache_control, "public, max-age=31536000");
    }

    #[test]
    fn project_date_read_as_strings() {
        let config = parse(
            r#"
project_name: X
asset_domain: https://cdn.example.com
project_year: "2023"
project_month: "07"
"#,
        )
        .unwrap();
        assert_eq!(config.project_year.as_deref(), Some("2023"));
        assert_eq!(config.project_month.as_deref(), Some("07"));
    }

    #[test]
    fn missing_project_name_rejected() {
        let result = parse("asset_domain: https://cdn.example.com\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn empty_project_name_rejected() {
        let result = parse("project_name: '  '\nasset_domain: x\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn empty_asset_domain_rejected() {
        let result = parse("project_name: X\nasset_domain: ''\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let result = parse(
            r#"
project_name: X
asset_domain: https://cdn.example.com
projekt_year: "2020"
"#,
        );
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn unknown_nested_key_rejected() {
        let result = parse(
            r#"
project_name: X
asset_domain: https://cdn.example.com
story:
  roots: nope
"#,
        );
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn same_dir_and_staging_rejected() {
        let result = parse(
            r#"
project_name: X
asset_domain: https://cdn.example.com
assets:
  dir: assets
  staging: assets
"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn zero_max_concurrent_rejected() {
        let result = parse(
            r#"
project_name: X
asset_domain: https://cdn.example.com
uploads:
  max_concurrent: 0
"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn resolve_is_relative_to_config_dir() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.dest_path(), PathBuf::from("/project/build"));
        assert_eq!(config.staging_path(), PathBuf::from("/project/.tmp/assets"));
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        fs::write(&path, MINIMAL).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.project_name, "My Story");
        assert_eq!(config.base_dir(), tmp.path());
    }

    #[test]
    fn load_config_missing_file() {
        let tmp = TempDir::new().unwrap();
        let result = load_config(&tmp.path().join("nope.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn stock_config_yaml_is_valid() {
        let config = parse(stock_config_yaml()).unwrap();
        assert_eq!(config.project_name, "My Cool Story");
        assert_eq!(config.project_month.as_deref(), Some("01"));
        assert_eq!(config.assets.root, AssetsConfig::default().root);
        assert_eq!(config.story.root, StoryConfig::default().root);
    }

    // =========================================================================
    // Upload threads
    // =========================================================================

    #[test]
    fn effective_upload_threads_auto() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_upload_threads(&UploadsConfig::default()), cores);
    }

    #[test]
    fn effective_upload_threads_clamped_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = UploadsConfig {
            max_concurrent: Some(cores + 64),
            ..UploadsConfig::default()
        };
        assert_eq!(effective_upload_threads(&config), cores);
    }

    #[test]
    fn effective_upload_threads_user_constrains_down() {
        let config = UploadsConfig {
            max_concurrent: Some(1),
            ..UploadsConfig::default()
        };
        assert_eq!(effective_upload_threads(&config), 1);
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn credentials_read_with_prefix() {
        let vars = env(&[
            ("STORY_BUCKET", "stories-bucket"),
            ("STORY_REGION", "eu-west-1"),
            ("STORY_ACCESS_KEY", "AKID"),
            ("STORY_SECRET_KEY", "secret"),
            ("ASSETS_BUCKET", "assets-bucket"),
        ]);
        let creds =
            StoreCredentials::from_lookup(BucketKind::Story, |k| vars.get(k).cloned()).unwrap();
        assert_eq!(creds.bucket, "stories-bucket");
        assert_eq!(creds.region, "eu-west-1");
        assert!(creds.endpoint.is_none());
    }

    #[test]
    fn credential_sets_are_independent() {
        let vars = env(&[
            ("STORY_BUCKET", "stories-bucket"),
            ("STORY_REGION", "eu-west-1"),
            ("STORY_ACCESS_KEY", "AKID"),
            ("STORY_SECRET_KEY", "secret"),
        ]);
        let result = StoreCredentials::from_lookup(BucketKind::Assets, |k| vars.get(k).cloned());
        assert!(matches!(result, Err(ConfigError::MissingEnv(name)) if name == "ASSETS_BUCKET"));
    }

    #[test]
    fn empty_credential_treated_as_missing() {
        let vars = env(&[
            ("ASSETS_BUCKET", "b"),
            ("ASSETS_REGION", "us-east-1"),
            ("ASSETS_ACCESS_KEY", ""),
            ("ASSETS_SECRET_KEY", "s"),
        ]);
        let result = StoreCredentials::from_lookup(BucketKind::Assets, |k| vars.get(k).cloned());
        assert!(
            matches!(result, Err(ConfigError::MissingEnv(name)) if name == "ASSETS_ACCESS_KEY")
        );
    }

    #[test]
    fn endpoint_override_read() {
        let vars = env(&[
            ("ASSETS_BUCKET", "b"),
            ("ASSETS_REGION", "us-east-1"),
            ("ASSETS_ACCESS_KEY", "a"),
            ("ASSETS_SECRET_KEY", "s"),
            ("ASSETS_ENDPOINT", "http://localhost:9000"),
        ]);
        let creds =
            StoreCredentials::from_lookup(BucketKind::Assets, |k| vars.get(k).cloned()).unwrap();
        assert_eq!(creds.endpoint.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = StoreCredentials {
            region: "r".into(),
            bucket: "b".into(),
            access_key: "AKIDSECRET".into(),
            secret_key: "topsecret".into(),
            endpoint: None,
        };
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("topsecret"));
        assert!(!shown.contains("AKIDSECRET"));
        assert!(shown.contains("[REDACTED]"));
    }
}
