//! Publish-path derivation.
//!
//! Every published project lives under a canonical prefix built from the
//! project date and a slug of the project name:
//!
//! ```text
//! <root>/<year>/<month>/<slug>/
//! stories/2024/03/my-cool-story/
//! ```
//!
//! The same string is the remote object prefix and the key for local
//! cache-sync state, so both stay aligned across runs.

use crate::preflight::ProjectDate;

/// Lower-case a name and collapse every whitespace run into one hyphen.
///
/// - `"My Cool Story"` → `"my-cool-story"`
/// - `"My   Cool  Story"` → `"my-cool-story"`
/// - `"  Padded\tName "` → `"padded-name"`
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Build the publish prefix `<root>/<year>/<month>/<slug>/`.
///
/// Slashes around `root` are trimmed; an empty root drops the segment.
pub fn publish_path(root: &str, date: &ProjectDate, project_name: &str) -> String {
    let root = root.trim_matches('/');
    let tail = format!("{}/{}/{}/", date.year(), date.month(), slugify(project_name));
    if root.is_empty() {
        tail
    } else {
        format!("{root}/{tail}")
    }
}
