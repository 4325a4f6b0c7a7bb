//! # Storypress
//!
//! Finishes and publishes "storytelling" microsites. A static-site build leaves
//! a generated site in a destination directory; storypress cache-busts its
//! image assets, points asset references at the hosted asset domain, merges
//! generated metadata, and publishes both the generic assets and the story
//! itself to S3-compatible object storage.
//!
//! # Architecture: Independent Tasks
//!
//! Every task is a linear function from the read-only [`config::ProjectConfig`]
//! and the filesystem to a report. No task depends on another's runtime state:
//!
//! ```text
//! cachebust       assets/        →  .tmp/assets/  (+ rewritten build/*.html)
//! copy-assets     .tmp/assets/   →  build/assets/
//! rewrite-paths   build/         →  build/        (asset URLs → asset domain)
//! combine-json    build/*.json   →  build/combined.json
//! publish-assets  .tmp/assets/ or assets/  →  asset bucket   (create-only)
//! publish-story   build/         →  story bucket              (mirror-sync)
//! ```
//!
//! Both publish tasks place objects under the same kind of dated prefix,
//! `<root>/<year>/<month>/<project-slug>/`, derived by [`naming`].
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `config.yaml` loading and validation, storage credentials from the environment |
//! | [`naming`] | Project-name slugs and publish-path derivation |
//! | [`preflight`] | Clean working tree and project date checks, run before any network call |
//! | [`scan`] | Directory walking shared by every task |
//! | [`cache`] | Content hashing and the persisted upload cache |
//! | [`store`] | The `ObjectStore` seam: S3 over signed HTTP, plus an in-memory store |
//! | [`assets`] | Asset publisher: filter, gzip, create-only upload |
//! | [`story`] | Story publisher: preflight, confirmation, upload, delete stale |
//! | [`cachebust`] | Hash-named image copies, reference rewriting, hosted path rewriting |
//! | [`combine`] | Merges the generated metadata JSON documents |
//! | [`output`] | CLI output formatting for every task report |
//!
//! # Design Decisions
//!
//! ## Create-Only Assets, Mirrored Stories
//!
//! The two buckets get opposite write policies. Asset URLs may be embedded in
//! pages that are already live, so an asset object is never replaced; cache
//! busting gives changed content a new name instead. A story prefix, on the
//! other hand, is owned by one project, so the story publisher makes it an
//! exact mirror of the local site, deleting what is no longer there.
//!
//! ## Content Hashes, Not Timestamps
//!
//! Change detection compares SHA-256 hashes of file contents. The hash is
//! stored locally in the upload cache and remotely as `x-amz-meta-sha256`, so
//! a fresh checkout with a lost cache still recognizes identical objects
//! without downloading them.
//!
//! ## Preflight Before Network
//!
//! Publishing refuses to run from a dirty git working tree or with a missing
//! or malformed project date. Both are checked before credentials are even
//! read, so a failed check never leaves partial remote state.

pub mod assets;
pub mod cache;
pub mod cachebust;
pub mod combine;
pub mod config;
pub mod naming;
pub mod output;
pub mod preflight;
pub mod scan;
pub mod store;
pub mod story;

#[cfg(test)]
pub(crate) mod test_helpers;
