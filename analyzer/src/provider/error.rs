//! Error types for provider operations
//!
//! These errors never escape a single unit of work (one suite, one run):
//! the pipeline absorbs them and treats the unit as absent.

use thiserror::Error;

/// Errors that can occur when talking to a test data provider
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, TLS, body read)
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-2xx status
    #[error("upstream returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Response body did not match the expected shape
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Provider is missing required configuration
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The requested unit could not be served
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Unavailable(_) => true,
            ProviderError::Parse(_) | ProviderError::NotConfigured(_) => false,
        }
    }
}

/// Result type alias for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;
