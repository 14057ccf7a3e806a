//! Error types for a3s-distributor

use thiserror::Error;

/// Errors that can occur in the distribution system
#[derive(Debug, Error)]
pub enum DistributorError {
    /// Caller supplied an unusable payload, type key, or handler
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A subscriber's callback failed during dispatch
    ///
    /// Only ever logged or recorded; publishing calls never return it.
    #[error("Handler '{handler}' failed for type '{type_key}': {reason}")]
    HandlerFailure {
        type_key: String,
        handler: String,
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for distributor operations
pub type Result<T> = std::result::Result<T, DistributorError>;
