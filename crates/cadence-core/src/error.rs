//! Error types for the storage facade.

use cadence_db::DbError;

use crate::config::ConfigError;

/// Errors raised while building or starting the storage facade.
///
/// Per-call failures of individual operations are
/// [`StorageError`](cadence_db::StorageError)s instead.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The configuration is unusable.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A store could not be opened or migrated.
    #[error("store error: {0}")]
    Store(#[from] DbError),
}
