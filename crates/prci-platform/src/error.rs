//! The platform adapter's error taxonomy (spec.md §7).

use thiserror::Error;

/// Errors from the HTTP-backed [`crate::http::HttpPlatform`].
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("connection error: {0}")]
    Transient(#[from] reqwest::Error),

    #[error("rate limited, reset at {0}")]
    RateLimited(chrono::DateTime<chrono::Utc>),

    #[error("resource not found")]
    NotFound,

    #[error("platform returned {0}")]
    Http(reqwest::StatusCode),

    #[error("failed to decode response: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PlatformError {
    /// Whether this error is worth retrying (spec.md §4.5 retry policy):
    /// connection errors and 5xx responses, not 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::Transient(e) => !e.is_body() && !e.is_decode(),
            PlatformError::Http(status) => status.is_server_error(),
            _ => false,
        }
    }
}
