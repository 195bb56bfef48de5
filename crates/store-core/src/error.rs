//! Error types for shared-store operations

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the shared store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No value exists at the requested path
    #[error("no value at path: {path}")]
    NotFound { path: String },

    /// A value could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend reported a failure
    #[error("store backend error: {message}")]
    Backend { message: String },

    /// The subscription channel was closed by the backend
    #[error("subscription closed")]
    SubscriptionClosed,
}

impl StoreError {
    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }
}
