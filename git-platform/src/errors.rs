//! Platform client error hierarchy.
//!
//! Maps HTTP status classes onto variants so callers can decide on retry
//! policy without inspecting reqwest internals.

use thiserror::Error;

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    /// Unauthorized (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden (HTTP 403).
    #[error("forbidden")]
    Forbidden,

    /// Not found (HTTP 404).
    #[error("not found")]
    NotFound,

    /// Rate limited (HTTP 429).
    #[error("rate limited")]
    RateLimited,

    /// Server-side failure (HTTP 5xx).
    #[error("server error: status {0}")]
    Server(u16),

    /// Any other unexpected status.
    #[error("http status error: {0}")]
    HttpStatus(u16),

    /// Transport-level timeout.
    #[error("timeout")]
    Timeout,

    /// DNS/connect/reset without a status.
    #[error("network error: {0}")]
    Network(String),

    /// Response body did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PlatformError {
    /// Whether a retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited
                | PlatformError::Server(_)
                | PlatformError::Timeout
                | PlatformError::Network(_)
        )
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return PlatformError::Timeout;
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 => PlatformError::Unauthorized,
                403 => PlatformError::Forbidden,
                404 => PlatformError::NotFound,
                429 => PlatformError::RateLimited,
                500..=599 => PlatformError::Server(code),
                _ => PlatformError::HttpStatus(code),
            };
        }
        PlatformError::Network(e.to_string())
    }
}
