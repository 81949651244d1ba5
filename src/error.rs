//! Error types for query cache operations
//!
//! A fetch failure is the only domain error the cache carries around; the
//! remaining variants describe misuse of the API or of its configuration.

use std::sync::Arc;
use thiserror::Error;

/// Main error type for query cache operations
///
/// Cloneable so that one fetch outcome can be handed to every caller that
/// joined the same in-flight request.
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    /// The supplied fetch function failed (transport, status or payload shape)
    #[error("Fetch failed: {0:#}")]
    Fetch(Arc<anyhow::Error>),

    /// The in-flight fetch was cancelled before it produced a value
    #[error("Fetch cancelled for key {key}")]
    Cancelled { key: String },

    /// `write` was called for a key that has no cache entry
    #[error("No cache entry for key: {0}")]
    MissingEntry(String),

    /// Query parameters could not be turned into a key
    #[error("Key encoding error: {0}")]
    KeyEncoding(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl QueryError {
    /// Wrap a fetch failure
    pub fn fetch(err: anyhow::Error) -> Self {
        QueryError::Fetch(Arc::new(err))
    }

    /// Whether this error came from the fetch function itself
    pub fn is_fetch(&self) -> bool {
        matches!(self, QueryError::Fetch(_))
    }

    /// Whether the fetch was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled { .. })
    }
}

/// Result type alias for query cache operations
pub type Result<T> = std::result::Result<T, QueryError>;

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::KeyEncoding(e.to_string())
    }
}

impl From<String> for QueryError {
    fn from(s: String) -> Self {
        QueryError::Other(s)
    }
}

impl From<&str> for QueryError {
    fn from(s: &str) -> Self {
        QueryError::Other(s.to_string())
    }
}
