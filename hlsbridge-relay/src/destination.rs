//! Resumable upload client for the destination platform.
//!
//! Protocol:
//! 1. `POST {api_base}/video/v1/uploads` (basic auth) creates an upload and
//!    returns its id and a writable URL.
//! 2. Each chunk is a `PUT` to that URL with `Content-Range: bytes {start}-{end}/*`.
//!    `308 Resume Incomplete` means the chunk was stored and more may follow.
//! 3. A zero-length `PUT` with `Content-Range: bytes */{total}` closes the upload.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hlsbridge_core::config::DestinationConfig;
use hlsbridge_core::models::mask_secret;

use crate::error::{RelayError, RelayResult};

/// "Resume Incomplete": chunk accepted, upload still open
const STATUS_RESUME_INCOMPLETE: u16 = 308;

/// API credentials for creating uploads. Request-scoped; never persisted.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationCredentials {
    pub token_id: String,
    pub token_secret: String,
}

impl fmt::Debug for DestinationCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationCredentials")
            .field("token_id", &self.token_id)
            .field("token_secret", &mask_secret(&self.token_secret))
            .finish()
    }
}

/// Handle of a created upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub id: String,
    pub url: String,
}

#[derive(Serialize)]
struct CreateUploadRequest<'a> {
    cors_origin: &'a str,
    new_asset_settings: NewAssetSettings<'a>,
}

#[derive(Serialize)]
struct NewAssetSettings<'a> {
    playback_policy: [&'a str; 1],
    passthrough: &'a str,
}

#[derive(Deserialize)]
struct CreateUploadResponse {
    data: UploadData,
}

#[derive(Deserialize)]
struct UploadData {
    id: String,
    url: String,
}

/// `Content-Range` value for a chunk of `len` bytes at `byte_start`,
/// total length still unknown. `len` must be non-zero.
#[must_use]
pub fn chunk_content_range(byte_start: u64, len: u64) -> String {
    format!("bytes {}-{}/*", byte_start, byte_start + len - 1)
}

/// `Content-Range` value of the closing write
#[must_use]
pub fn final_content_range(total: u64) -> String {
    format!("bytes */{total}")
}

#[derive(Debug, Clone)]
pub struct DestinationClient {
    client: reqwest::Client,
    api_base_url: String,
    cors_origin: String,
    playback_policy: String,
}

impl DestinationClient {
    pub fn new(config: &DestinationConfig, timeout: Duration) -> RelayResult<Self> {
        // A 308 from the upload URL is a protocol answer, not a redirect
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            cors_origin: config.cors_origin.clone(),
            playback_policy: config.playback_policy.clone(),
        })
    }

    /// Create a resumable upload bound to `stream_key`.
    pub async fn create_upload(
        &self,
        stream_key: &str,
        credentials: &DestinationCredentials,
    ) -> RelayResult<UploadSession> {
        let body = CreateUploadRequest {
            cors_origin: &self.cors_origin,
            new_asset_settings: NewAssetSettings {
                playback_policy: [&self.playback_policy],
                passthrough: stream_key,
            },
        };

        let response = self
            .client
            .post(format!("{}/video/v1/uploads", self.api_base_url))
            .basic_auth(&credentials.token_id, Some(&credentials.token_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Destination(format!("Upload creation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RelayError::Destination(format!(
                "Upload creation returned status {status}: {detail}"
            )));
        }

        let created: CreateUploadResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Destination(format!("Malformed upload creation response: {e}")))?;

        Ok(UploadSession {
            id: created.data.id,
            url: created.data.url,
        })
    }

    /// Append `body` at `byte_start`.
    pub async fn append_chunk(
        &self,
        upload_url: &str,
        byte_start: u64,
        body: Bytes,
    ) -> RelayResult<()> {
        let len = body.len() as u64;
        if len == 0 {
            return Err(RelayError::InvalidRequest(
                "Cannot append an empty chunk".to_string(),
            ));
        }
        let range = chunk_content_range(byte_start, len);

        let response = self
            .client
            .put(upload_url)
            .header(CONTENT_RANGE, &range)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if is_chunk_accepted(status) {
            debug!(upload_url, range = %range, status = status.as_u16(), "Chunk accepted");
            Ok(())
        } else {
            Err(RelayError::Destination(format!(
                "Chunk {range} rejected with status {status}"
            )))
        }
    }

    /// Close the upload at `total` bytes.
    pub async fn finalize(&self, upload_url: &str, total: u64) -> RelayResult<()> {
        let response = self
            .client
            .put(upload_url)
            .header(CONTENT_RANGE, final_content_range(total))
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;

        let status = response.status();
        if is_chunk_accepted(status) {
            Ok(())
        } else {
            Err(RelayError::Destination(format!(
                "Finalization at {total} bytes rejected with status {status}"
            )))
        }
    }
}

fn is_chunk_accepted(status: StatusCode) -> bool {
    status == StatusCode::OK
        || status == StatusCode::CREATED
        || status.as_u16() == STATUS_RESUME_INCOMPLETE
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> DestinationClient {
        let config = DestinationConfig {
            api_base_url: server.uri(),
            ..DestinationConfig::default()
        };
        DestinationClient::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn credentials() -> DestinationCredentials {
        DestinationCredentials {
            token_id: "token-id".to_string(),
            token_secret: "token-secret".to_string(),
        }
    }

    #[test]
    fn test_content_ranges() {
        assert_eq!(chunk_content_range(0, 188_000), "bytes 0-187999/*");
        assert_eq!(chunk_content_range(188_000, 201_500), "bytes 188000-389499/*");
        assert_eq!(final_content_range(389_500), "bytes */389500");
    }

    #[test]
    fn test_credentials_debug_masks_secret() {
        let rendered = format!("{:?}", credentials());
        assert!(!rendered.contains("token-secret"));
        assert!(rendered.contains("****cret"));
    }

    #[tokio::test]
    async fn test_create_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/video/v1/uploads"))
            .and(basic_auth("token-id", "token-secret"))
            .and(body_partial_json(serde_json::json!({
                "new_asset_settings": { "passthrough": "key123" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "id": "up_1", "url": "https://storage.example.com/up_1", "status": "waiting" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let upload = client(&server)
            .create_upload("key123", &credentials())
            .await
            .unwrap();

        assert_eq!(upload.id, "up_1");
        assert_eq!(upload.url, "https://storage.example.com/up_1");
    }

    #[tokio::test]
    async fn test_create_upload_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_upload("key123", &credentials())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Destination(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_append_accepts_resume_incomplete() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/up_1"))
            .and(header("content-range", "bytes 100-109/*"))
            .respond_with(ResponseTemplate::new(308))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .append_chunk(&format!("{}/up_1", server.uri()), 100, Bytes::from(vec![0u8; 10]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_rejects_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = client(&server)
            .append_chunk(&format!("{}/up_1", server.uri()), 0, Bytes::from_static(b"abc"))
            .await;

        assert!(matches!(result, Err(RelayError::Destination(_))));
    }

    #[tokio::test]
    async fn test_finalize_sends_total_length() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("content-range", "bytes */389500"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .finalize(&format!("{}/up_1", server.uri()), 389_500)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].body.is_empty());
    }
}
