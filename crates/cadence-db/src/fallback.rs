//! Primary-then-replica execution.
//!
//! Every dual-store operation goes through [`execute`]: the primary future
//! runs first; only if it fails is the replica future polled. Futures are
//! lazy, so a replica call that is never needed costs nothing and never
//! touches the network. Lookups may use [`execute_read_through`], which
//! also consults the replica when the primary has no row.

use std::future::Future;

use crate::error::{DbError, StorageError};

/// Run `primary`; on failure run `replica`; if both fail return one
/// combined [`StorageError::Unavailable`].
///
/// No default value is synthesized on total failure, so callers can tell
/// "no data" from "data lost".
///
/// # Errors
///
/// Returns [`StorageError::Unavailable`] carrying the label and both
/// underlying messages when neither store produced a result.
pub async fn execute<T, P, R>(primary: P, replica: R, label: &str) -> Result<T, StorageError>
where
    P: Future<Output = Result<T, DbError>>,
    R: Future<Output = Result<T, DbError>>,
{
    match primary.await {
        Ok(value) => Ok(value),
        Err(primary_err) => fall_back(primary_err, replica, label).await,
    }
}

/// Which store answered a read-through lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// The primary answered, with or without a row.
    Primary,
    /// The primary had no row and the replica supplied one. The primary
    /// is missing data the replica knows about.
    ReplicaAfterMiss,
    /// The primary failed and the replica answered in its place.
    ReplicaFallback,
}

/// Like [`execute`] for lookups, but a primary that answers "no row" is
/// also a miss: the replica is consulted before reporting `None`.
///
/// A freshly created primary (before the first resync) holds nothing the
/// replica already knows; treating its empty answer as final would hide
/// data. If the replica then fails, the primary's `None` stands. The
/// returned [`Served`] tells the caller whether the primary should be
/// backfilled.
///
/// # Errors
///
/// Returns [`StorageError::Unavailable`] only when the primary failed and
/// the replica failed too.
pub async fn execute_read_through<T, P, R>(
    primary: P,
    replica: R,
    label: &str,
) -> Result<(Option<T>, Served), StorageError>
where
    P: Future<Output = Result<Option<T>, DbError>>,
    R: Future<Output = Result<Option<T>, DbError>>,
{
    match primary.await {
        Ok(Some(value)) => Ok((Some(value), Served::Primary)),
        Ok(None) => match replica.await {
            Ok(Some(value)) => {
                tracing::debug!(label, "Primary miss served by replica");
                Ok((Some(value), Served::ReplicaAfterMiss))
            }
            Ok(None) => Ok((None, Served::Primary)),
            Err(e) => {
                tracing::warn!(label, error = %e, "Replica lookup after primary miss failed");
                Ok((None, Served::Primary))
            }
        },
        Err(primary_err) => fall_back(primary_err, replica, label)
            .await
            .map(|found| (found, Served::ReplicaFallback)),
    }
}

async fn fall_back<T, R>(primary_err: DbError, replica: R, label: &str) -> Result<T, StorageError>
where
    R: Future<Output = Result<T, DbError>>,
{
    tracing::warn!(
        label,
        error = %primary_err,
        "Primary store failed, falling back to replica"
    );

    match replica.await {
        Ok(value) => {
            tracing::info!(label, "Fallback to replica succeeded");
            Ok(value)
        }
        Err(replica_err) => {
            tracing::error!(
                label,
                primary_error = %primary_err,
                replica_error = %replica_err,
                "Both stores failed"
            );
            Err(StorageError::Unavailable {
                label: label.to_owned(),
                primary: primary_err.to_string(),
                replica: replica_err.to_string(),
            })
        }
    }
}

/// Run an operation against one store only, tagging a failure with the
/// operation label and the store name.
///
/// # Errors
///
/// Returns [`StorageError::Store`] wrapping the store's error.
pub async fn single<T, F>(store: &str, operation: F, label: &str) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, DbError>>,
{
    operation.await.map_err(|source| {
        tracing::warn!(label, store, error = %source, "Single-store operation failed");
        StorageError::Store {
            label: label.to_owned(),
            store: store.to_owned(),
            source,
        }
    })
}
