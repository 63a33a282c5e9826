//! Source list loading (`apps.source.json`).
//!
//! Any problem here aborts the run before a single package is touched.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::SourceConfig;
use crate::store::validate_id;

pub const DEFAULT_SOURCES_FILE: &str = "apps.source.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read sources file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid sources JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("source #{index} ('{id}'): {reason}")]
    InvalidSource {
        index: usize,
        id: String,
        reason: String,
    },
    #[error("duplicate source id '{0}'")]
    DuplicateId(String),
    #[error("requested ids not in the sources file: {}", .0.join(", "))]
    UnknownSelection(Vec<String>),
}

pub fn load_sources(path: &Path) -> Result<Vec<SourceConfig>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_sources(&raw)
}

pub fn parse_sources(raw: &str) -> Result<Vec<SourceConfig>, ConfigError> {
    let sources: Vec<SourceConfig> = serde_json::from_str(raw)?;

    let mut seen = HashSet::new();
    for (index, source) in sources.iter().enumerate() {
        let invalid = |reason: String| ConfigError::InvalidSource {
            index,
            id: source.id.clone(),
            reason,
        };
        validate_id(&source.id).map_err(|e| invalid(e.to_string()))?;
        if source.strategy.trim().is_empty() {
            return Err(invalid("empty strategy".to_string()));
        }
        if !seen.insert(source.id.as_str()) {
            return Err(ConfigError::DuplicateId(source.id.clone()));
        }
    }

    Ok(sources)
}

/// Restricts `sources` to the ids in `only`, keeping file order.
///
/// An empty `only` selects everything. Every requested id must exist.
pub fn select_sources(
    sources: Vec<SourceConfig>,
    only: &[String],
) -> Result<Vec<SourceConfig>, ConfigError> {
    if only.is_empty() {
        return Ok(sources);
    }

    let unknown: Vec<String> = only
        .iter()
        .filter(|id| !sources.iter().any(|source| &source.id == *id))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(ConfigError::UnknownSelection(unknown));
    }

    Ok(sources
        .into_iter()
        .filter(|source| only.contains(&source.id))
        .collect())
}
