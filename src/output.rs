//! CLI output formatting for every task.
//!
//! # Object-First Display
//!
//! Publishing output is a list of remote objects, one line each, tagged with
//! what happened to it. Keys are shown relative to the publish prefix, which
//! is printed once in the header. A single summary line closes the report.
//!
//! # Output Format
//!
//! ## Publish assets
//!
//! ```text
//! Assets → assets-bucket/assets/2024/03/my-cool-story/
//!     [upload] css/site.css (gzip)
//!     [exists] img/map.png
//!     [cache]  img/cover.jpg
//! Published 1 asset (1 already present, 1 cached)
//! ```
//!
//! ## Publish story
//!
//! ```text
//! Story → story-bucket/stories/2024/03/my-cool-story/
//!     [create] index.html
//!     [update] js/app.js
//!     [skip]   css/site.css
//!     [delete] old.html
//! Synced 2 files (1 created, 1 updated, 1 unchanged, 1 deleted)
//! ```
//!
//! ## Cache-bust
//!
//! ```text
//! Staged assets
//!     img/map.png → img/map-3f2a9c01bd.png
//! Rewrote index.html (2 references)
//! Cache-busted 1 image, copied 3 files, rewrote 1 file
//! ```
//!
//! # Architecture
//!
//! Each task has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::assets::{AssetAction, AssetReport};
use crate::cachebust::{CachebustReport, CopyReport, RewriteReport, RewrittenFile};
use crate::story::{SyncAction, SyncReport};
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

const INDENT: &str = "    ";

/// `1 file`, `2 files`.
fn plural(n: usize, singular: &str) -> String {
    if n == 1 {
        format!("{n} {singular}")
    } else {
        format!("{n} {singular}s")
    }
}

/// Action tag padded so keys line up: `[cache] ` is as wide as `[upload]`.
fn tagged(tag: &str, text: &str) -> String {
    format!("{INDENT}{:<8} {}", format!("[{tag}]"), text)
}

/// Key relative to the report prefix.
fn relative<'a>(key: &'a str, prefix: &str) -> &'a str {
    key.strip_prefix(prefix).unwrap_or(key)
}

fn rewritten_lines(files: &[RewrittenFile]) -> Vec<String> {
    files
        .iter()
        .map(|f| {
            format!(
                "Rewrote {} ({})",
                f.path,
                plural(f.replacements, "reference")
            )
        })
        .collect()
}

// ============================================================================
// Publish
// ============================================================================

pub fn format_asset_report(report: &AssetReport) -> Vec<String> {
    let mut lines = vec![format!("Assets → {}/{}", report.bucket, report.prefix)];
    for entry in &report.entries {
        let tag = match entry.action {
            AssetAction::Uploaded => "upload",
            AssetAction::Existing => "exists",
            AssetAction::Cached => "cache",
        };
        let key = relative(&entry.key, &report.prefix);
        let text = if entry.gzipped && entry.action == AssetAction::Uploaded {
            format!("{key} (gzip)")
        } else {
            key.to_string()
        };
        lines.push(tagged(tag, &text));
    }
    lines.push(format!(
        "Published {} ({} already present, {} cached)",
        plural(report.count(AssetAction::Uploaded), "asset"),
        report.count(AssetAction::Existing),
        report.count(AssetAction::Cached),
    ));
    lines
}

pub fn print_asset_report(report: &AssetReport) {
    for line in format_asset_report(report) {
        println!("{}", line);
    }
}

pub fn format_sync_report(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!("Story → {}/{}", report.bucket, report.prefix)];
    for entry in &report.entries {
        let tag = match entry.action {
            SyncAction::Created => "create",
            SyncAction::Updated => "update",
            SyncAction::Unchanged => "skip",
            SyncAction::Deleted => "delete",
        };
        lines.push(tagged(tag, relative(&entry.key, &report.prefix)));
    }
    let created = report.count(SyncAction::Created);
    let updated = report.count(SyncAction::Updated);
    lines.push(format!(
        "Synced {} ({} created, {} updated, {} unchanged, {} deleted)",
        plural(created + updated, "file"),
        created,
        updated,
        report.count(SyncAction::Unchanged),
        report.count(SyncAction::Deleted),
    ));
    lines
}

pub fn print_sync_report(report: &SyncReport) {
    for line in format_sync_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Cache-bust and paths
// ============================================================================

pub fn format_cachebust_report(report: &CachebustReport) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.renamed.is_empty() {
        lines.push("Staged assets".to_string());
        for (from, to) in &report.renamed {
            lines.push(format!("{INDENT}{from} → {to}"));
        }
    }
    lines.extend(rewritten_lines(&report.rewritten));
    lines.push(format!(
        "Cache-busted {}, copied {}, rewrote {}",
        plural(report.renamed.len(), "image"),
        plural(report.copied, "file"),
        plural(report.rewritten.len(), "file"),
    ));
    lines
}

pub fn print_cachebust_report(report: &CachebustReport) {
    for line in format_cachebust_report(report) {
        println!("{}", line);
    }
}

pub fn format_copy_report(report: &CopyReport) -> Vec<String> {
    vec![format!(
        "Copied {} to {}",
        plural(report.files, "asset"),
        report.destination.display()
    )]
}

pub fn print_copy_report(report: &CopyReport) {
    for line in format_copy_report(report) {
        println!("{}", line);
    }
}

pub fn format_rewrite_report(report: &RewriteReport) -> Vec<String> {
    let mut lines = rewritten_lines(&report.rewritten);
    let total: usize = report.rewritten.iter().map(|f| f.replacements).sum();
    lines.push(format!(
        "Pointed {} at {}",
        plural(total, "asset reference"),
        report.base_url
    ));
    lines
}

pub fn print_rewrite_report(report: &RewriteReport) {
    for line in format_rewrite_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Combine and check
// ============================================================================

pub fn print_combine_output(output: &Path) {
    println!("Combined metadata → {}", output.display());
}

/// Preflight summary for the `check` task.
pub fn format_check_output(
    project_name: &str,
    story_prefix: &str,
    asset_prefix: &str,
) -> Vec<String> {
    vec![
        project_name.to_string(),
        format!("{INDENT}Working tree: clean"),
        format!("{INDENT}Story:  {story_prefix}"),
        format!("{INDENT}Assets: {asset_prefix}"),
        "Ready to publish".to_string(),
    ]
}

pub fn print_check_output(project_name: &str, story_prefix: &str, asset_prefix: &str) {
    for line in format_check_output(project_name, story_prefix, asset_prefix) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
