// HTTP error handling

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

use hlsbridge_relay::RelayError;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn stream_id_required() -> Self {
        Self::bad_request("Stream ID required")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = if status.is_server_error() {
            ErrorResponse {
                error: "Internal server error".to_string(),
                message: Some(self.message),
            }
        } else {
            ErrorResponse {
                error: self.message,
                message: None,
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Convert relay errors to HTTP errors
impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidRequest(msg) => AppError::bad_request(msg),
            RelayError::NotFound(_) => AppError::not_found("Stream not found"),
            RelayError::SessionEnded(stream_id) => AppError::conflict(format!(
                "Relay session for stream {stream_id} has ended; start a new stream id"
            )),
            RelayError::Store(e) => {
                tracing::error!("Session store error: {}", e);
                AppError::internal_server_error("Session store unavailable")
            }
            other => {
                tracing::error!("Relay error: {}", other);
                AppError::internal_server_error(other.to_string())
            }
        }
    }
}

/// Convert JSON body rejections to HTTP errors
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_client_error_shape() {
        let (status, body) = body_json(AppError::stream_id_required()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({ "error": "Stream ID required" }));
    }

    #[tokio::test]
    async fn test_server_error_shape() {
        let err = AppError::from(RelayError::Destination("status 401".to_string()));
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(body["message"].as_str().unwrap().contains("status 401"));
    }

    #[test]
    fn test_relay_error_mapping() {
        assert_eq!(
            AppError::from(RelayError::InvalidRequest("x".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(RelayError::NotFound("s1".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(RelayError::SessionEnded("s1".into())).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(RelayError::ActorUnavailable("s1".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
