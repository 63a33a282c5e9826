//! One JSON document per package under a base directory.
//!
//! `<base_dir>/<id>.json`, written through `<id>.json.tmp` + rename.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use crate::harvest::{StateStore, StoreError};
use crate::model::PackageRecord;

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    base_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Resolves the file for `id`, rejecting ids that would escape `base_dir`.
    pub fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.base_dir.join(format!("{id}.json")))
    }
}

/// An id must be a single, plain path component.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let invalid = || StoreError::InvalidId(id.to_string());
    if id.is_empty() || id.starts_with('.') || id.contains(|c: char| c == '/' || c == '\\') {
        return Err(invalid());
    }
    let mut components = Path::new(id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get(&self, id: &str) -> Result<Option<PackageRecord>, StoreError> {
        let path = self.record_path(id)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| StoreError::Json { path, source })
    }

    async fn save(&self, record: &PackageRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.id)?;
        let data = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| io_err(&self.base_dir, e))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err(&path, e))
    }

    async fn list_all(&self) -> Result<Vec<PackageRecord>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.base_dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err(&self.base_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable record");
                    continue;
                }
            };
            match serde_json::from_slice::<PackageRecord>(&data) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed record"),
            }
        }

        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}
