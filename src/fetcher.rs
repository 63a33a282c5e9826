//! Streaming artifact download with incremental SHA-256.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::harvest::{ContentFetcher, FetchedContent, TransferError};

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, TransferError> {
        Ok(Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .user_agent(concat!("release-harvester/", env!("CARGO_PKG_VERSION")))
                .build()?,
        })
    }
}

fn io_err(path: &Path, source: std::io::Error) -> TransferError {
    TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        url: &str,
        dest: &Path,
    ) -> Result<FetchedContent, TransferError> {
        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = File::create(dest).await.map_err(|e| io_err(dest, e))?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else { break };

            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(|e| io_err(dest, e))?;
            size += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| io_err(dest, e))?;

        let checksum = hex::encode(hasher.finalize());
        debug!(url, size, %checksum, "Download complete");
        Ok(FetchedContent { checksum, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_writes_and_hashes_body() {
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pkg.deb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("pkg.deb");
        let fetched = HttpFetcher::new()
            .unwrap()
            .fetch(
                &CancellationToken::new(),
                &format!("{}/pkg.deb", server.uri()),
                &dest,
            )
            .await
            .unwrap();

        assert_eq!(fetched.size, body.len() as u64);
        assert_eq!(fetched.checksum, hex::encode(Sha256::digest(&body)));
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn test_fetch_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let err = HttpFetcher::new()
            .unwrap()
            .fetch(
                &CancellationToken::new(),
                &format!("{}/gone.deb", server.uri()),
                &dir.path().join("gone.deb"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_fetch_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dir = tempfile::TempDir::new().unwrap();

        let err = HttpFetcher::new()
            .unwrap()
            .fetch(&cancel, "http://127.0.0.1:9/pkg.deb", &dir.path().join("x"))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
    }
}
