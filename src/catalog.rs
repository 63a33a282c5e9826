//! Consolidated catalog document (`catalog.json`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::harvest::{CatalogError, CatalogPublisher};
use crate::model::PackageRecord;

pub const CATALOG_FILE: &str = "catalog.json";

/// Shape of the published document, keyed by package id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub last_updated: DateTime<Utc>,
    pub apps: BTreeMap<String, PackageRecord>,
}

impl Catalog {
    pub fn from_records(records: &[PackageRecord]) -> Self {
        Self {
            last_updated: Utc::now(),
            apps: records
                .iter()
                .map(|record| (record.id.clone(), record.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonCatalogPublisher {
    output_dir: PathBuf,
}

impl JsonCatalogPublisher {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.output_dir.join(CATALOG_FILE)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> CatalogError {
    CatalogError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl CatalogPublisher for JsonCatalogPublisher {
    async fn export(&self, packages: &[PackageRecord]) -> Result<(), CatalogError> {
        let catalog = Catalog::from_records(packages);
        let data = serde_json::to_vec_pretty(&catalog)?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| io_err(&self.output_dir, e))?;

        let path = self.catalog_path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err(&path, e))?;

        info!(path = %path.display(), apps = catalog.apps.len(), "Catalog published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DisplayMetadata;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_export_writes_keyed_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let publisher = JsonCatalogPublisher::new(dir.path().join("api"));
        let records = vec![
            PackageRecord::new("zoom", DisplayMetadata::default()),
            PackageRecord::new("atom", DisplayMetadata::default()),
        ];

        publisher.export(&records).await.unwrap();

        let raw = std::fs::read(publisher.catalog_path()).unwrap();
        let catalog: Catalog = serde_json::from_slice(&raw).unwrap();
        assert_eq!(
            catalog.apps.keys().cloned().collect::<Vec<_>>(),
            vec!["atom".to_string(), "zoom".to_string()]
        );
        assert_eq!(catalog.apps["zoom"], records[0]);

        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(value["last_updated"].is_string());
    }

    #[tokio::test]
    async fn test_export_overwrites_previous() {
        let dir = tempfile::TempDir::new().unwrap();
        let publisher = JsonCatalogPublisher::new(dir.path());

        publisher
            .export(&[PackageRecord::new("old", DisplayMetadata::default())])
            .await
            .unwrap();
        publisher.export(&[]).await.unwrap();

        let raw = std::fs::read(publisher.catalog_path()).unwrap();
        let catalog: Catalog = serde_json::from_slice(&raw).unwrap();
        assert!(catalog.apps.is_empty());
    }
}
