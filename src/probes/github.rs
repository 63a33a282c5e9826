//! Release-API probe: asks the forge for its latest release.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{cancellable, probe_client};
use crate::model::CandidateObservation;
use crate::traits::{optional, required, ProbeError, UpstreamProbe};

const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

pub struct GithubReleaseProbe {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl GithubReleaseProbe {
    pub const NAME: &'static str = "github_release";

    pub fn new(token: Option<String>) -> Result<Self, ProbeError> {
        Ok(Self {
            client: probe_client()?,
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Points the probe at another API root (GitHub Enterprise, test servers).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

/// First asset whose name contains `filter`, ignoring case.
fn select_asset<'a>(assets: &'a [ReleaseAsset], filter: &str) -> Option<&'a ReleaseAsset> {
    let filter = filter.to_lowercase();
    assets
        .iter()
        .find(|asset| asset.name.to_lowercase().contains(&filter))
}

#[async_trait]
impl UpstreamProbe for GithubReleaseProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(
        &self,
        cancel: &CancellationToken,
        config: &HashMap<String, String>,
    ) -> Result<CandidateObservation, ProbeError> {
        let repo = required(config, "repo")?;
        let filter = optional(config, "asset_filter").unwrap_or_default();

        let url = format!(
            "{}/repos/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            repo
        );
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = cancellable(cancel, request.send()).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status {
                status: status.as_u16(),
                url,
            });
        }
        let release: LatestRelease = cancellable(cancel, response.json()).await?;

        let version = release
            .tag_name
            .strip_prefix('v')
            .unwrap_or(&release.tag_name)
            .to_string();

        let asset = select_asset(&release.assets, filter).ok_or_else(|| {
            ProbeError::NoMatchingAsset {
                filter: filter.to_string(),
                version: version.clone(),
            }
        })?;
        debug!(repo, asset = %asset.name, %version, "Selected release asset");

        Ok(CandidateObservation {
            version: Some(version),
            download_url: asset.browser_download_url.clone(),
            ..CandidateObservation::default()
        })
    }
}
