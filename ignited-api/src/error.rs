//! Error types for the facade

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, ApiError>;

/// Facade error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Error from the core store/dictionary layer
    #[error("Core error: {0}")]
    Core(#[from] ignited_core::Error),

    /// Error from the sync layer
    #[error("Sync error: {0}")]
    Sync(#[from] ignited_sync::SyncError),

    /// Configuration error (duplicate/unknown server, mask collision)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ApiError::Config(msg.into())
    }
}
