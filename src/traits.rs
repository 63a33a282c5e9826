use crate::model::CandidateObservation;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("missing required config key '{0}'")]
    MissingConfig(&'static str),
    #[error("invalid config key '{key}': {reason}")]
    InvalidConfig { key: &'static str, reason: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("no asset matching '{filter}' in release {version}")]
    NoMatchingAsset { filter: String, version: String },
    #[error("probe cancelled")]
    Cancelled,
    #[error("probe timed out after {0}s")]
    TimedOut(u64),
}

/// Discovers the latest candidate release of a package from one upstream shape.
///
/// One network round trip per call, never the artifact body.
#[async_trait]
pub trait UpstreamProbe: Send + Sync {
    /// Strategy name this probe is registered under (e.g., "github_release").
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        cancel: &CancellationToken,
        config: &HashMap<String, String>,
    ) -> Result<CandidateObservation, ProbeError>;
}

/// Looks up a key the probe cannot work without.
pub fn required<'a>(
    config: &'a HashMap<String, String>,
    key: &'static str,
) -> Result<&'a str, ProbeError> {
    config
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ProbeError::MissingConfig(key))
}

/// Looks up an optional key, treating blank values as unset.
pub fn optional<'a>(config: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}
