//! Static probe for URLs that always serve the latest build under one name.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::{head, probe_client, transfer_length};
use crate::model::CandidateObservation;
use crate::traits::{required, ProbeError, UpstreamProbe};

pub struct StaticProbe {
    client: Client,
}

impl StaticProbe {
    pub const NAME: &'static str = "direct_static";

    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            client: probe_client()?,
        })
    }
}

/// Today's date as `YYYY.MM.DD`.
pub fn date_label() -> String {
    Utc::now().format("%Y.%m.%d").to_string()
}

#[async_trait]
impl UpstreamProbe for StaticProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    /// Only the transfer length is learned here; the date label changes every
    /// day regardless of upstream, so it is carried as a placeholder.
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        config: &HashMap<String, String>,
    ) -> Result<CandidateObservation, ProbeError> {
        let url = required(config, "url")?;
        let response = head(&self.client, cancel, url).await?;

        Ok(CandidateObservation {
            version: None,
            download_url: url.to_string(),
            remote_checksum: None,
            remote_size: transfer_length(&response.headers),
            placeholder_version: Some(date_label()),
        })
    }
}
