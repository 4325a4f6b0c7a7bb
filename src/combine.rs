//! Metadata combiner.
//!
//! Merges the two JSON documents the site build emits, the markup/model
//! bindings (`embed.json`) and the compiled styles (`main.json`), into one
//! payload:
//!
//! ```json
//! {"embed": <embed.json>, "styles": <main.json>}
//! ```
//!
//! Both inputs must exist and parse; their contents are carried over
//! verbatim.

use crate::config::ProjectConfig;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CombineError {
    #[error("Metadata file not found: {0}")]
    Missing(PathBuf),
    #[error("Malformed JSON in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Combine `embed` and `styles` into `output`, creating parent directories.
///
/// Returns the combined document.
pub fn combine(embed: &Path, styles: &Path, output: &Path) -> Result<Value, CombineError> {
    let combined = serde_json::json!({
        "embed": read_json(embed)?,
        "styles": read_json(styles)?,
    });
    let json = serde_json::to_string(&combined).map_err(|source| CombineError::Malformed {
        path: output.to_path_buf(),
        source,
    })?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, json)?;
    Ok(combined)
}

/// Combine the configured files under `dest_dir`. Returns the output path.
pub fn combine_project(config: &ProjectConfig) -> Result<PathBuf, CombineError> {
    let dest = config.dest_path();
    let output = dest.join(&config.combine.output);
    combine(
        &dest.join(&config.combine.embed),
        &dest.join(&config.combine.styles),
        &output,
    )?;
    Ok(output)
}

fn read_json(path: &Path) -> Result<Value, CombineError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CombineError::Missing(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content).map_err(|source| CombineError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}
