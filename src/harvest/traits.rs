//! Collaborator contracts consumed by the reconciliation engine.
//!
//! The engine only sees these traits:
//! - Artifact download + hashing via [`ContentFetcher`]
//! - Ground-truth version extraction via [`ArtifactInspector`]
//! - Per-package persistence via [`StateStore`]
//! - Consolidated output via [`CatalogPublisher`]
//!
//! Concrete implementations live in `crate::fetcher`, `crate::harvest::formats`,
//! `crate::store` and `crate::catalog`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::model::PackageRecord;

// ============================================================================
// Content Fetcher
// ============================================================================

/// Result of streaming an artifact to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    /// Lowercase hex SHA-256 of the bytes written
    pub checksum: String,

    /// Number of bytes written
    pub size: u64,
}

/// Downloads a URL to a local file while hashing it.
///
/// # Streaming
///
/// Implementations must hash incrementally as bytes arrive and must never
/// hold the whole artifact in memory.
///
/// # Cancellation
///
/// When `cancel` fires the in-flight transfer is abandoned and
/// [`TransferError::Cancelled`] is returned. The partially written `dest` is
/// the caller's to clean up.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Writes the body of `url` to `dest` (truncating it) and returns its
    /// hash and size.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] on non-success status, transport failure,
    /// I/O failure or cancellation.
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        url: &str,
        dest: &Path,
    ) -> Result<FetchedContent, TransferError>;
}

// ============================================================================
// Artifact Inspector
// ============================================================================

/// Extracts the version embedded in a downloaded artifact.
///
/// Each installer format with readable metadata gets its own inspector
/// (see `crate::harvest::formats`).
#[async_trait]
pub trait ArtifactInspector: Send + Sync {
    /// Identifier used in logs (e.g., `"dpkg-deb"`).
    fn name(&self) -> &str;

    /// Whether artifacts tagged with `install_type` carry metadata this
    /// inspector can read.
    ///
    /// The engine always consults a supporting inspector, even when the
    /// probe already discovered a version.
    fn supports(&self, install_type: &str) -> bool;

    /// Reads the version from the artifact at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`InspectError::MetadataUnavailable`] if the format is not
    /// supported or the embedded metadata is missing or malformed.
    async fn extract_version(&self, path: &Path) -> Result<String, InspectError>;
}

// ============================================================================
// State Store
// ============================================================================

/// Persistence for per-package state.
///
/// Writes to distinct ids may happen concurrently; writes to the same id
/// never do within one run.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads a record. A missing record is `Ok(None)`, not an error.
    async fn get(&self, id: &str) -> Result<Option<PackageRecord>, StoreError>;

    /// Persists a record, replacing any previous state for its id.
    async fn save(&self, record: &PackageRecord) -> Result<(), StoreError>;

    /// Enumerates every stored record. Malformed entries are skipped.
    async fn list_all(&self) -> Result<Vec<PackageRecord>, StoreError>;
}

// ============================================================================
// Catalog Publisher
// ============================================================================

/// Serializes all known packages into one consolidated document.
#[async_trait]
pub trait CatalogPublisher: Send + Sync {
    /// Overwrites the previous catalog with `packages`.
    async fn export(&self, packages: &[PackageRecord]) -> Result<(), CatalogError>;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while downloading an artifact.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Connection or protocol failure
    #[error("transfer failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("status {status} from {url}")]
    Status { status: u16, url: String },

    /// Writing the artifact to disk failed
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cancellation token fired mid-transfer
    #[error("transfer cancelled")]
    Cancelled,

    /// Download exceeded the stage timeout
    #[error("transfer timed out after {0}s")]
    TimedOut(u64),
}

/// Errors from ground-truth version extraction.
#[derive(Error, Debug)]
pub enum InspectError {
    /// Format unsupported, tool unavailable, or metadata missing/malformed
    #[error("metadata unavailable for {path}: {reason}")]
    MetadataUnavailable { path: PathBuf, reason: String },
}

/// Errors from the state store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Identifier cannot be mapped to a storage location
    #[error("invalid package id '{0}'")]
    InvalidId(String),

    /// Filesystem failure
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored record could not be (de)serialized
    #[error("malformed record at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from catalog publication. Always fatal to the run.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Filesystem failure
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Catalog could not be serialized
    #[error("catalog serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = TransferError::Status {
            status: 503,
            url: "https://example.com/a.deb".to_string(),
        };
        assert_eq!(err.to_string(), "status 503 from https://example.com/a.deb");

        let err = InspectError::MetadataUnavailable {
            path: PathBuf::from("/tmp/pkg.deb"),
            reason: "no Version field".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "metadata unavailable for /tmp/pkg.deb: no Version field"
        );
    }
}
