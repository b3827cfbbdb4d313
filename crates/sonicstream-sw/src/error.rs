//! Errors for the offline worker.

use thiserror::Error;

/// Errors that can occur in worker, cache and network operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Bad response for {url}: HTTP {status}")]
    BadResponse { url: String, status: u16 },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ServiceWorkerError {
    /// Whether the failure came from the network rather than local state.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::BadResponse { .. })
    }
}

impl From<std::io::Error> for ServiceWorkerError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ServiceWorkerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<url::ParseError> for ServiceWorkerError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

/// Result alias for worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
