//! Header/redirect probe: follows a "latest" link and reads what the final
//! response advertises.

use std::collections::HashMap;

use async_trait::async_trait;
use regex_lite::Regex;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{head, integrity_hash, probe_client, transfer_length};
use crate::model::CandidateObservation;
use crate::traits::{optional, required, ProbeError, UpstreamProbe};

pub struct HeadProbe {
    client: Client,
}

impl HeadProbe {
    pub const NAME: &'static str = "direct_url_head";

    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            client: probe_client()?,
        })
    }
}

/// First capture group of `pattern` in `url`, if any.
fn capture_version(pattern: &Regex, url: &str) -> Option<String> {
    pattern
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl UpstreamProbe for HeadProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(
        &self,
        cancel: &CancellationToken,
        config: &HashMap<String, String>,
    ) -> Result<CandidateObservation, ProbeError> {
        let url = required(config, "url")?;
        let pattern = optional(config, "regex")
            .map(Regex::new)
            .transpose()
            .map_err(|e| ProbeError::InvalidConfig {
                key: "regex",
                reason: e.to_string(),
            })?;

        let response = head(&self.client, cancel, url).await?;

        let version = pattern
            .as_ref()
            .and_then(|re| capture_version(re, &response.final_url));
        if pattern.is_some() && version.is_none() {
            debug!(final_url = %response.final_url, "Version pattern did not match");
        }

        Ok(CandidateObservation {
            version,
            remote_checksum: integrity_hash(&response.headers),
            remote_size: transfer_length(&response.headers),
            download_url: response.final_url,
            placeholder_version: None,
        })
    }
}
