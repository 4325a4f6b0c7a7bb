//! Cache-busting and asset path rewriting.
//!
//! Three related tasks prepare assets and markup for deployment:
//!
//! | Task | Function | Effect |
//! |---|---|---|
//! | cachebust | [`cachebust`] | hash-named copies of images in staging, references rewritten in site markup |
//! | copy-assets | [`copy_to_output`] | staged assets copied into the site directory |
//! | rewrite-paths | [`rewrite_hosted_paths`] | relative asset references pointed at the asset domain |
//!
//! ## Hashed Names
//!
//! An image `img/map.png` whose SHA-256 starts with `3f2a9c01bd` is staged as
//! `img/map-3f2a9c01bd.png`. The mapping is written to
//! `<staging>/rev-manifest.json`, which also marks the staging directory as
//! ready for [`crate::assets::publish_assets`].
//!
//! ## Reference Rewriting
//!
//! Every `.html`/`.htm` file under the site directory is scanned for the
//! original relative paths. A match must stand alone as a path: the
//! character before and after it may not be a letter, digit, `_`, `-` or
//! `.`, so `img/map.png` never matches inside `img/map.png.bak` or
//! `bigimg/map.png`. Longer paths are tried first so `img/a/b.png` wins over
//! `a/b.png`.

use crate::cache::{hash_file, short_hash};
use crate::config::ProjectConfig;
use crate::naming::publish_path;
use crate::preflight::ProjectDate;
use crate::scan::{self, extension_of};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Manifest of original → hashed paths, written into staging.
pub const REV_MANIFEST: &str = "rev-manifest.json";

/// Image extensions that get hash-named copies.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "avif"];

/// Markup files whose references are rewritten by [`cachebust`].
pub const MARKUP_EXTENSIONS: &[&str] = &["html", "htm"];

/// Files whose asset references [`rewrite_hosted_paths`] rewrites.
pub const HOSTED_REWRITE_EXTENSIONS: &[&str] = &["html", "htm", "css"];

#[derive(Error, Debug)]
pub enum CachebustError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Failed to write manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory not found: {0}")]
    MissingDir(PathBuf),
}

/// One markup file that had references rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenFile {
    /// Path relative to the site directory.
    pub path: String,
    pub replacements: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CachebustReport {
    /// Original → hashed relative path, for every image.
    pub renamed: BTreeMap<String, String>,
    /// Files staged under their original name.
    pub copied: usize,
    pub rewritten: Vec<RewrittenFile>,
}

#[derive(Debug, Clone)]
pub struct CopyReport {
    pub destination: PathBuf,
    pub files: usize,
}

#[derive(Debug, Clone)]
pub struct RewriteReport {
    /// Absolute URL prefix references now point at.
    pub base_url: String,
    pub rewritten: Vec<RewrittenFile>,
}

/// Insert a short hash before the extension: `img/a.png` → `img/a-<hash>.png`.
pub fn hashed_name(rel: &str, hash: &str) -> String {
    let (dir, file) = match rel.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, rel),
    };
    let renamed = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{hash}.{ext}"),
        _ => format!("{file}-{hash}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{renamed}"),
        None => renamed,
    }
}

/// Stage hash-named assets and rewrite references in site markup.
///
/// The staging directory is rebuilt from scratch on every run.
pub fn cachebust(config: &ProjectConfig) -> Result<CachebustReport, CachebustError> {
    let source = config.assets_path();
    if !source.is_dir() {
        return Err(CachebustError::MissingDir(source));
    }
    let staging = config.staging_path();
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    let mut report = CachebustReport::default();
    for file in scan::scan_files(&source, |_| true)? {
        let target_rel = if is_cachebust_image(&file.rel) {
            let hash = hash_file(&file.path)?;
            let hashed = hashed_name(&file.rel, short_hash(&hash));
            report.renamed.insert(file.rel.clone(), hashed.clone());
            hashed
        } else {
            report.copied += 1;
            file.rel.clone()
        };
        copy_file(&file.path, &staging.join(&target_rel))?;
    }

    let manifest = serde_json::to_string_pretty(&report.renamed)?;
    std::fs::write(staging.join(REV_MANIFEST), manifest)?;
    tracing::debug!(
        renamed = report.renamed.len(),
        copied = report.copied,
        "assets staged"
    );

    let site = config.dest_path();
    if site.is_dir() {
        let mut pairs: Vec<(&str, &str)> = report
            .renamed
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        report.rewritten = rewrite_tree(&site, MARKUP_EXTENSIONS, |text| {
            replace_references(text, &pairs)
        })?;
    } else {
        tracing::debug!(site = %site.display(), "no site directory, skipping markup rewrite");
    }
    Ok(report)
}

/// Copy staged assets into `<dest_dir>/<assets dir name>/`.
pub fn copy_to_output(config: &ProjectConfig) -> Result<CopyReport, CachebustError> {
    let staging = config.staging_path();
    if !staging.is_dir() {
        return Err(CachebustError::MissingDir(staging));
    }
    let destination = config.dest_path().join(assets_dir_name(config));
    let files = scan::scan_files(&staging, |f| f.rel != REV_MANIFEST)?;
    for file in &files {
        copy_file(&file.path, &destination.join(&file.rel))?;
    }
    Ok(CopyReport {
        destination,
        files: files.len(),
    })
}

/// Point relative asset references in site files at the hosted asset URL.
///
/// With `assets.dir: assets`, `src="assets/img/a.png"`, `src="./assets/…"`
/// and `url(../assets/…)` all become
/// `<asset_domain>/<assets.root>/<year>/<month>/<slug>/img/a.png`.
pub fn rewrite_hosted_paths(
    config: &ProjectConfig,
    date: &ProjectDate,
) -> Result<RewriteReport, CachebustError> {
    let site = config.dest_path();
    if !site.is_dir() {
        return Err(CachebustError::MissingDir(site));
    }
    let base_url = format!(
        "{}/{}",
        config.asset_domain.trim_end_matches('/'),
        publish_path(&config.assets.root, date, &config.project_name)
    );
    let dir = assets_dir_name(config);

    let mut patterns = Vec::new();
    for opener in ['"', '\'', '(', '='] {
        for lead in ["../", "./", ""] {
            patterns.push((format!("{opener}{lead}{dir}/"), format!("{opener}{base_url}")));
        }
    }

    let rewritten = rewrite_tree(&site, HOSTED_REWRITE_EXTENSIONS, |text| {
        let mut out = text.to_string();
        let mut count = 0;
        for (from, to) in &patterns {
            let hits = out.matches(from.as_str()).count();
            if hits > 0 {
                out = out.replace(from.as_str(), to);
                count += hits;
            }
        }
        (out, count)
    })?;
    Ok(RewriteReport {
        base_url,
        rewritten,
    })
}

/// Last path component of the configured assets directory.
fn assets_dir_name(config: &ProjectConfig) -> String {
    Path::new(&config.assets.dir)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.assets.dir.trim_matches('/').to_string())
}

/// Apply `rewrite` to every file under `root` with one of `extensions`,
/// writing back only files that changed.
fn rewrite_tree<F>(
    root: &Path,
    extensions: &[&str],
    rewrite: F,
) -> Result<Vec<RewrittenFile>, CachebustError>
where
    F: Fn(&str) -> (String, usize),
{
    let files = scan::scan_files(root, |f| extensions.contains(&f.extension().as_str()))?;
    let mut rewritten = Vec::new();
    for file in files {
        let text = std::fs::read_to_string(&file.path)?;
        let (updated, replacements) = rewrite(&text);
        if replacements > 0 {
            std::fs::write(&file.path, updated)?;
            rewritten.push(RewrittenFile {
                path: file.rel,
                replacements,
            });
        }
    }
    Ok(rewritten)
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Replace standalone occurrences of each `from` with its `to`.
///
/// `pairs` must be ordered longest `from` first. Returns the new text and the
/// number of replacements.
pub fn replace_references(text: &str, pairs: &[(&str, &str)]) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut count = 0;
    let mut prev: Option<char> = None;
    let mut rest = text;

    'scan: while let Some(c) = rest.chars().next() {
        if !prev.is_some_and(is_path_char) {
            for (from, to) in pairs {
                if from.is_empty() || !rest.starts_with(from) {
                    continue;
                }
                let after = rest[from.len()..].chars().next();
                if after.is_some_and(is_path_char) {
                    continue;
                }
                out.push_str(to);
                count += 1;
                prev = from.chars().last();
                rest = &rest[from.len()..];
                continue 'scan;
            }
        }
        out.push(c);
        prev = Some(c);
        rest = &rest[c.len_utf8()..];
    }
    (out, count)
}

fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(from, to)?;
    Ok(())
}

/// Whether a path names an image that [`cachebust`] renames.
pub fn is_cachebust_image(path: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&extension_of(path).as_str())
}
