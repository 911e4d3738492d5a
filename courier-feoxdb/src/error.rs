use std::path::PathBuf;

use feoxdb::FeoxError;
use thiserror::Error;

/// Failure to open a [`FeOxDbBackend`](crate::FeOxDbBackend).
///
/// Operational failures after opening surface as
/// [`BackendError`](courier_backend::BackendError) instead.
#[derive(Debug, Error)]
pub enum FeOxDbError {
    /// The database file could not be opened or created.
    #[error("cannot open disk cache at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: FeoxError,
    },

    /// The memory-only database could not be created.
    #[error("cannot create in-memory disk cache: {0}")]
    Create(#[source] FeoxError),
}
