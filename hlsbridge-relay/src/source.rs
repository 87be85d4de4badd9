//! HTTP client for the HLS origin.

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::{RelayError, RelayResult};

/// Fetches manifests and segments from the source origin.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SourceClient {
    client: reqwest::Client,
}

impl SourceClient {
    pub fn new(timeout: Duration) -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hlsbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// GET the playlist text.
    pub async fn fetch_manifest(&self, url: &str) -> RelayResult<String> {
        let response = self.get(url).await?;
        Ok(response.text().await?)
    }

    /// GET a segment body.
    pub async fn fetch_segment(&self, url: &str) -> RelayResult<Bytes> {
        let response = self.get(url).await?;
        let body = response.bytes().await?;
        debug!(url, bytes = body.len(), "Segment downloaded");
        Ok(body)
    }

    async fn get(&self, url: &str) -> RelayResult<reqwest::Response> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Source(format!("GET {url} returned status {status}")));
        }
        Ok(response)
    }
}
