//! Error types for the operator CLI.

use cadence_core::CoreError;

/// Errors that end a `cadence-sync` run with a non-zero exit code.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The storage facade could not be configured, opened or migrated.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A store did not answer the health check.
    #[error("{store} store is unreachable: {reason}")]
    Unreachable {
        /// Which store failed (`primary` or `replica`).
        store: &'static str,
        /// The underlying error message.
        reason: String,
    },

    /// The resync finished but some steps failed.
    #[error("resync finished with {errors} failed step(s)")]
    ResyncIncomplete {
        /// Failed steps across all tables.
        errors: u64,
    },
}
