//! Common error types for FieldLine.

use thiserror::Error;

/// Top-level error type for FieldLine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A live network call was required but connectivity is down.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Offline read with no usable cache entry.
    #[error("No cached data for {0}")]
    NoCachedData(String),

    /// Write disallowed while offline by caller policy.
    #[error("Operation unavailable offline: {0}")]
    OperationUnavailableOffline(String),

    /// Signature rejected before queueing; one message per violated rule.
    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    /// A queued item failed to sync.
    #[error("Sync item failed: {0}")]
    SyncItemFailed(String),

    /// Signature aged out while pending. Terminal.
    #[error("Expired: {0}")]
    Expired(String),

    /// Transport failure with no response.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
