//! Error types for sync operations

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors from sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or HTTP error communicating with the upstream server.
    ///
    /// Propagated to the caller of the specific sync operation and retried
    /// on the next scheduled pass; never conflated with not-found.
    #[error("Upstream communication error: {0}")]
    Upstream(String),

    /// Upstream no longer knows the requested resource.
    ///
    /// The one upstream error with documented special semantics: for a
    /// queued/running build it is the normal signal that the build was
    /// cancelled or purged.
    #[error("Upstream not found: {0}")]
    NotFound(String),

    /// Error from the core store/dictionary layer
    #[error("Core error: {0}")]
    Core(#[from] ignited_core::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Upstream(e.to_string())
    }
}

impl SyncError {
    /// Whether this error is the documented not-found signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}
