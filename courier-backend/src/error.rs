//! Store failures.

use thiserror::Error;

/// Failure of a cache store operation.
///
/// The pipeline never surfaces these: a failed read counts as a miss and a
/// failed write is skipped, both logged.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store itself failed (I/O, closed database, task panicked).
    #[error("cache store failure: {0}")]
    Internal(Box<dyn std::error::Error + Send>),

    /// Stored bytes could not be encoded or decoded.
    #[error("cached value is malformed: {0}")]
    Format(#[from] serde_json::Error),
}

impl BackendError {
    /// Wraps any store-specific error.
    pub fn internal(error: impl std::error::Error + Send + 'static) -> Self {
        BackendError::Internal(Box::new(error))
    }
}
