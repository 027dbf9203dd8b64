use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Why a single source produced no articles.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("malformed feed: {0}")]
    Malformed(String),
    #[error("feed API reported an error: {0}")]
    Api(String),
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),
    #[error("invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FetchError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::Malformed(_)
            | FetchError::Api(_)
            | FetchError::MissingApiKey(_)
            | FetchError::InvalidUrl(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to access snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt snapshot {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
