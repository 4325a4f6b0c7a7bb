//! Directory walking shared by every task.
//!
//! Walks a directory tree and returns its files with `/`-separated paths
//! relative to the root, sorted for stable output. Hidden entries (names
//! starting with `.`) are skipped along with everything beneath them, so
//! `.DS_Store`, `.git/` and editor droppings never get published.
//! [`scan_files_allowing`] lets named hidden entries through (the story
//! publisher uses it for `.well-known/`).

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file found under a scanned root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
    /// Path relative to the scanned root, `/`-separated.
    pub rel: String,
}

impl LocalFile {
    /// Lower-cased extension, empty when the file has none.
    pub fn extension(&self) -> String {
        extension_of(&self.rel)
    }
}

/// Lower-cased extension of a path string.
pub fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Collect every non-hidden file under `root` that `keep` accepts.
pub fn scan_files<F>(root: &Path, keep: F) -> Result<Vec<LocalFile>, walkdir::Error>
where
    F: Fn(&LocalFile) -> bool,
{
    scan_files_allowing(root, &[], keep)
}

/// Like [`scan_files`], but hidden entries named in `allowed_hidden` are
/// walked as usual.
pub fn scan_files_allowing<F>(
    root: &Path,
    allowed_hidden: &[&str],
    keep: F,
) -> Result<Vec<LocalFile>, walkdir::Error>
where
    F: Fn(&LocalFile) -> bool,
{
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name();
            entry.depth() == 0
                || !is_hidden(name)
                || allowed_hidden.iter().any(|allowed| name == *allowed)
        });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel_path) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let file = LocalFile {
            path: entry.path().to_path_buf(),
            rel,
        };
        if keep(&file) {
            files.push(file);
        }
    }
    Ok(files)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
