//! Error types for the data layer.
//!
//! Two levels of error exist:
//!
//! - [`DbError`] is what a single store reports. It wraps the underlying
//!   [`sqlx`] and [`serde_json`] errors with context about which store
//!   failed.
//! - [`StorageError`] is what a caller of the dual-store operations sees.
//!   A primary failure that the replica recovered from never reaches the
//!   caller; only "both stores failed" does, as one combined error.
//!
//! Background replay failures are not errors at all from the caller's
//! point of view; they surface as [`SyncFailure`](crate::write_sync::SyncFailure)
//! events on the write-sync channel.

/// Errors reported by one store.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A SQL operation failed.
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Applying migrations failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store cannot be reached at all.
    #[error("store {0} is unavailable")]
    Unavailable(String),

    /// A configuration error (bad URL, missing credentials).
    #[error("configuration error: {0}")]
    Config(String),

    /// A stored row could not be mapped back into its entity type.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl DbError {
    /// Wrap any displayable decoding problem as [`DbError::InvalidRecord`].
    pub(crate) fn invalid(what: &str, err: impl std::fmt::Display) -> Self {
        Self::InvalidRecord(format!("{what}: {err}"))
    }
}

/// Errors surfaced to callers of the storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Both stores failed for one operation. No default value is
    /// synthesized, so "no data" and "data lost" stay distinguishable.
    #[error("storage unavailable for {label}: primary: {primary}; replica: {replica}")]
    Unavailable {
        /// The operation label passed to the executor.
        label: String,
        /// The primary store's error message.
        primary: String,
        /// The replica store's error message.
        replica: String,
    },

    /// A single-store operation failed.
    #[error("{label} failed on {store}: {source}")]
    Store {
        /// The operation label.
        label: String,
        /// Which store was used.
        store: String,
        /// The underlying store error.
        #[source]
        source: DbError,
    },

    /// An operation referenced an entity that does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity.
        entity: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// The caller passed a value the storage layer refuses to persist.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    /// Whether this error means no store could serve the call.
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_error_names_label_and_both_causes() {
        let err = StorageError::Unavailable {
            label: "get_prefix".to_owned(),
            primary: DbError::Unavailable("primary".to_owned()).to_string(),
            replica: "connection refused".to_owned(),
        };
        let message = err.to_string();
        assert!(message.contains("get_prefix"));
        assert!(message.contains("store primary is unavailable"));
        assert!(message.contains("connection refused"));
        assert!(err.is_unavailable());
    }

    #[test]
    fn single_store_error_keeps_source() {
        let err = StorageError::Store {
            label: "update_track_stats".to_owned(),
            store: "replica".to_owned(),
            source: DbError::Config("bad url".to_owned()),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_unavailable());
    }
}
