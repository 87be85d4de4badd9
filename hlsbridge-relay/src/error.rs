use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stream not found: {0}")]
    NotFound(String),

    #[error("Relay session already ended for stream {0}")]
    SessionEnded(String),

    #[error("Destination error: {0}")]
    Destination(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(#[from] hlsbridge_core::Error),

    #[error("Relay actor unavailable for stream {0}")]
    ActorUnavailable(String),
}

pub type RelayResult<T> = Result<T, RelayError>;
