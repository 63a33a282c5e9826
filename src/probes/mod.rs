//! Upstream probe variants and the name-keyed registry that resolves them.
//!
//! Each variant implements [`UpstreamProbe`] and validates only the config
//! keys it needs:
//! - [`GithubReleaseProbe`] (`github_release`): `repo`, optional `asset_filter`
//! - [`HeadProbe`] (`direct_url_head`): `url`, optional `regex`
//! - [`StaticProbe`] (`direct_static`): `url`
//!
//! The registry is open: anything implementing [`UpstreamProbe`] can be
//! registered next to the built-in variants.

pub mod github;
pub mod head;
pub mod fixed;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_LENGTH, USER_AGENT};
use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::traits::{ProbeError, UpstreamProbe};

pub use fixed::StaticProbe;
pub use github::GithubReleaseProbe;
pub use head::HeadProbe;

/// Integrity header some CDNs attach to artifact responses.
pub const INTEGRITY_HEADER: &str = "x-sha256";

/// Secondary transfer-length header used by some object stores.
pub const STORED_LENGTH_HEADER: &str = "x-goog-stored-content-length";

/// Download hosts tend to vary redirects by agent; look like a desktop browser.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64)";

/// Only connection setup is bounded here. The whole probe stage is bounded by
/// the reconciler's configurable probe timeout.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Registry
// ============================================================================

#[derive(Error, Debug)]
#[error("unknown strategy '{0}'")]
pub struct UnknownStrategy(pub String);

/// Read-only lookup from strategy name to probe instance.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    probes: HashMap<String, Arc<dyn UpstreamProbe>>,
}

impl ProbeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the three built-in variants.
    ///
    /// `github_token` only raises the release API's rate limit; `None` is fine.
    pub fn with_defaults(github_token: Option<String>) -> Result<Self, ProbeError> {
        Ok(Self::new()
            .register(Arc::new(GithubReleaseProbe::new(github_token)?))
            .register(Arc::new(HeadProbe::new()?))
            .register(Arc::new(StaticProbe::new()?)))
    }

    /// Adds a probe under its own [`UpstreamProbe::name`], replacing any
    /// previous probe with that name.
    pub fn register(mut self, probe: Arc<dyn UpstreamProbe>) -> Self {
        self.probes.insert(probe.name().to_string(), probe);
        self
    }

    pub fn resolve(&self, strategy: &str) -> Result<Arc<dyn UpstreamProbe>, UnknownStrategy> {
        self.probes
            .get(strategy)
            .cloned()
            .ok_or_else(|| UnknownStrategy(strategy.to_string()))
    }

    /// Registered strategy names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.probes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("probes", &self.names())
            .finish()
    }
}

// ============================================================================
// Shared HTTP plumbing
// ============================================================================

pub(crate) fn probe_client() -> Result<Client, ProbeError> {
    Ok(Client::builder()
        .connect_timeout(PROBE_CONNECT_TIMEOUT)
        .user_agent(concat!("release-harvester/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Races a request future against the cancellation token.
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    request: F,
) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, reqwest::Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        result = request => result.map_err(ProbeError::from),
    }
}

/// Outcome of a metadata-only request after redirects were followed.
#[derive(Debug)]
pub(crate) struct HeadResponse {
    pub final_url: String,
    pub headers: HeaderMap,
}

pub(crate) async fn head(
    client: &Client,
    cancel: &CancellationToken,
    url: &str,
) -> Result<HeadResponse, ProbeError> {
    let request = client.head(url).header(USER_AGENT, BROWSER_USER_AGENT).send();
    let response = cancellable(cancel, request).await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    Ok(HeadResponse {
        final_url: response.url().to_string(),
        headers: response.headers().clone(),
    })
}

/// Remote-asserted SHA-256, normalized to lowercase hex.
pub(crate) fn integrity_hash(headers: &HeaderMap) -> Option<String> {
    headers
        .get(INTEGRITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

/// Remote-asserted size. Zero counts as unknown.
pub(crate) fn transfer_length(headers: &HeaderMap) -> Option<u64> {
    let parse = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|size| *size > 0)
    };
    parse(CONTENT_LENGTH.as_str()).or_else(|| parse(STORED_LENGTH_HEADER))
}
