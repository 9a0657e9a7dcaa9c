//! Background replay of writes onto the replica.
//!
//! [`WriteSync::execute_write_with_sync`] answers the caller from whichever
//! store served the write (see [`fallback::execute`]) and then queues the
//! replica write once more on a detached worker. The caller never waits for
//! that replay. Replays run one at a time in scheduling order, so two writes
//! to the same row reach the replica in the order they were issued.
//!
//! A replay failure is not an error for the caller. It is counted in
//! [`SyncStats`], logged, and published on a broadcast channel of
//! [`SyncFailure`] events for anyone who wants to alert on it.
//!
//! When the synchronous call already fell back to the replica, the replay
//! applies the same write to the replica a second time. Every write routed
//! through here is therefore idempotent on the replica side.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{DbError, StorageError};
use crate::fallback;

/// Capacity of the failure broadcast channel. Slow subscribers lag and
/// miss old events rather than blocking the worker.
const FAILURE_CHANNEL_CAPACITY: usize = 256;

/// A queued replica write.
type ReplayTask = Pin<Box<dyn Future<Output = Result<(), DbError>> + Send>>;

enum Job {
    Replay { label: String, task: ReplayTask },
    Barrier(oneshot::Sender<()>),
}

/// A replay that failed on the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Label of the operation that was replayed.
    pub label: String,
    /// The replica's error message.
    pub error: String,
}

/// Counters of the write-sync worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Replays accepted onto the queue.
    pub scheduled: u64,
    /// Replays the replica applied.
    pub succeeded: u64,
    /// Replays the replica rejected.
    pub failed: u64,
    /// Replays dropped because the worker was already closed.
    pub dropped: u64,
}

impl SyncStats {
    /// Replays queued but not yet finished.
    pub const fn pending(&self) -> u64 {
        self.scheduled
            .saturating_sub(self.succeeded)
            .saturating_sub(self.failed)
    }
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Queue and worker for background replica writes.
pub struct WriteSync {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    failures: broadcast::Sender<SyncFailure>,
}

impl WriteSync {
    /// Create the queue and spawn its worker on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        let counters = Arc::new(Counters::default());

        let worker = tokio::spawn(run_worker(
            receiver,
            Arc::clone(&counters),
            failures.clone(),
        ));

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            counters,
            failures,
        }
    }

    /// Execute a write with fallback, then replay it on the replica in the
    /// background.
    ///
    /// `replica` is called twice at most: once to build the fallback future
    /// (polled only if the primary fails) and once for the replay. The
    /// replay is skipped when both stores failed, since there is no
    /// successful write to converge on.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if both stores failed.
    pub async fn execute_write_with_sync<T, P, F, R>(
        &self,
        primary: P,
        replica: F,
        label: &str,
    ) -> Result<T, StorageError>
    where
        P: Future<Output = Result<T, DbError>>,
        F: Fn() -> R + Send + 'static,
        R: Future<Output = Result<T, DbError>> + Send + 'static,
        T: Send + 'static,
    {
        let result = fallback::execute(primary, replica(), label).await;

        if result.is_ok() {
            self.schedule(label, async move { replica().await.map(drop) });
        } else {
            tracing::debug!(label, "Skipping replica replay after total failure");
        }

        result
    }

    /// Queue a replica write. Never blocks and never fails; a closed queue
    /// counts the task as dropped.
    pub fn schedule<F>(&self, label: &str, task: F)
    where
        F: Future<Output = Result<(), DbError>> + Send + 'static,
    {
        let job = Job::Replay {
            label: label.to_owned(),
            task: Box::pin(task),
        };

        let sent = self
            .sender
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|sender| sender.send(job).is_ok()))
            .unwrap_or(false);

        if sent {
            self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(label, "Write-sync queue closed, dropping replica replay");
        }
    }

    /// Wait until every replay scheduled before this call has finished.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        let sent = self
            .sender
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|sender| sender.send(Job::Barrier(done)).is_ok()))
            .unwrap_or(false);

        if sent && wait.await.is_err() {
            tracing::debug!("Write-sync worker stopped before flush completed");
        }
    }

    /// A snapshot of the worker's counters.
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Subscribe to replay failures.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncFailure> {
        self.failures.subscribe()
    }

    /// Stop accepting replays, let the worker drain what is queued, and
    /// wait for it to exit. Idempotent.
    pub async fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let worker = self.worker.lock().ok().and_then(|mut guard| guard.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Write-sync worker terminated abnormally");
            }
        }
    }
}

impl Default for WriteSync {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WriteSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSync")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<Job>,
    counters: Arc<Counters>,
    failures: broadcast::Sender<SyncFailure>,
) {
    tracing::debug!("Write-sync worker started");

    while let Some(job) = receiver.recv().await {
        let (label, task) = match job {
            Job::Replay { label, task } => (label, task),
            Job::Barrier(done) => {
                let _ = done.send(());
                continue;
            }
        };

        // Each replay runs on its own task so a panicking store call cannot
        // take the worker down; awaiting it keeps replays strictly ordered.
        let error = match tokio::spawn(task).await {
            Ok(Ok(())) => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(label = %label, "Replayed write on replica");
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };

        counters.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(label = %label, error = %error, "Replica replay failed");
        let _ = failures.send(SyncFailure { label, error });
    }

    tracing::debug!("Write-sync worker stopped");
}
