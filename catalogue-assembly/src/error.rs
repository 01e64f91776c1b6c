//! Error types for catalogue-assembly
//!
//! Sector jobs separate three kinds of failure: configuration errors (the
//! sector cannot be synced as defined), cancellation, and store failures.
//! The job outcome is derived from the variant, see [`AssemblyError::is_canceled`].

use thiserror::Error;

/// Result type for assembly operations
pub type Result<T> = std::result::Result<T, AssemblyError>;

/// Assembly error type
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Sector key does not exist
    #[error("Sector {0} not found")]
    SectorNotFound(i32),

    /// Editorial decision key does not exist
    #[error("Decision {0} not found")]
    DecisionNotFound(i32),

    /// Sector cannot be processed as configured (unresolved anchors, empty source)
    #[error("Sector configuration error: {0}")]
    Configuration(String),

    /// Job was interrupted by a cancel request or shutdown
    #[error("canceled")]
    Canceled,

    /// Coordinator no longer accepts jobs
    #[error("Assembly coordinator is shutting down")]
    ShuttingDown,

    /// Persistence or lookup failure
    #[error("Store error: {0}")]
    Store(#[from] catalogue_common::Error),
}

impl AssemblyError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, AssemblyError::Canceled)
    }
}

impl From<sqlx::Error> for AssemblyError {
    fn from(err: sqlx::Error) -> Self {
        AssemblyError::Store(catalogue_common::Error::Database(err))
    }
}

impl From<serde_json::Error> for AssemblyError {
    fn from(err: serde_json::Error) -> Self {
        AssemblyError::Store(catalogue_common::Error::Internal(format!("JSON error: {}", err)))
    }
}
