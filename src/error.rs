//! Error types for syncsched
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in syncsched
#[derive(Debug, Error)]
pub enum SyncschedError {
    /// Collection id already present in the registry
    #[error("Collection already registered: {0}")]
    DuplicateCollection(String),

    /// Collection id not present in the registry
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Sync cycle failed to start (propagated from the runner, non-fatal)
    #[error("Sync failed to start: {0}")]
    SyncStart(String),
}

/// Result type alias for syncsched operations
pub type Result<T> = std::result::Result<T, SyncschedError>;
