//! One-way full copy from the replica into the primary.
//!
//! Used at cold start or for recovery, never during live traffic: the
//! clear-then-insert sequence is not transactional against concurrent
//! writes, so callers run it before accepting commands. Continuous
//! convergence is the job of [`WriteSync`](crate::write_sync::WriteSync).
//!
//! Per table, in [`Table::ALL`] order (parents before children):
//!
//! 1. Read every replica row. A read failure counts one error and the
//!    table is left untouched.
//! 2. Skip the table if the replica has no rows.
//! 3. Delete every primary row of the table. A failure counts one error
//!    and skips the inserts, so rows are never doubled.
//! 4. Insert the replica rows in fixed-size batches. A failed batch counts
//!    one error; the remaining batches and tables still run.

use crate::store::{Store, Table};

/// Rows inserted per batch.
pub const RESYNC_BATCH_SIZE: usize = 100;

/// Outcome for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    /// The table.
    pub table: Table,
    /// Rows read from the replica.
    pub replica_rows: u64,
    /// Rows written to the primary.
    pub copied: u64,
    /// Failed steps (read, clear or batch insert).
    pub errors: u64,
    /// Whether the table was skipped because the replica held no rows.
    pub skipped: bool,
}

/// Outcome of a full resync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// `true` only if no error occurred anywhere.
    pub success: bool,
    /// Tables whose rows were copied.
    pub tables_synced: u64,
    /// Rows written to the primary across all tables.
    pub total_copied: u64,
    /// Failed steps across all tables.
    pub total_errors: u64,
    /// Per-table details in processing order.
    pub tables: Vec<TableReport>,
}

/// Full replica-to-primary copy job.
pub struct FullResync<'a, P, R> {
    primary: &'a P,
    replica: &'a R,
    batch_size: usize,
}

impl<'a, P: Store, R: Store> FullResync<'a, P, R> {
    /// Create a job with the default batch size.
    pub const fn new(primary: &'a P, replica: &'a R) -> Self {
        Self {
            primary,
            replica,
            batch_size: RESYNC_BATCH_SIZE,
        }
    }

    /// Override the batch size. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Copy every table from the replica into the primary.
    pub async fn sync(&self) -> ResyncReport {
        tracing::info!(
            primary = self.primary.name(),
            replica = self.replica.name(),
            batch_size = self.batch_size,
            "Starting full resync"
        );

        let mut report = ResyncReport::default();
        for table in Table::ALL {
            let table_report = self.sync_table(table).await;

            report.total_copied = report.total_copied.saturating_add(table_report.copied);
            report.total_errors = report.total_errors.saturating_add(table_report.errors);
            if !table_report.skipped && table_report.copied > 0 {
                report.tables_synced = report.tables_synced.saturating_add(1);
            }
            report.tables.push(table_report);
        }
        report.success = report.total_errors == 0;

        if report.success {
            tracing::info!(
                tables_synced = report.tables_synced,
                total_copied = report.total_copied,
                "Full resync completed"
            );
        } else {
            tracing::warn!(
                tables_synced = report.tables_synced,
                total_copied = report.total_copied,
                total_errors = report.total_errors,
                "Full resync completed with errors"
            );
        }

        report
    }

    async fn sync_table(&self, table: Table) -> TableReport {
        let mut report = TableReport {
            table,
            replica_rows: 0,
            copied: 0,
            errors: 0,
            skipped: false,
        };

        let records = match self.replica.read_table(table).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(table = %table, error = %e, "Failed to read replica table");
                report.errors = 1;
                return report;
            }
        };

        report.replica_rows = u64::try_from(records.len()).unwrap_or(u64::MAX);
        if records.is_empty() {
            tracing::debug!(table = %table, "Replica table empty, skipping");
            report.skipped = true;
            return report;
        }

        match self.primary.clear_table(table).await {
            Ok(cleared) => tracing::debug!(table = %table, cleared, "Cleared primary table"),
            Err(e) => {
                tracing::error!(table = %table, error = %e, "Failed to clear primary table");
                report.errors = 1;
                return report;
            }
        }

        for (index, batch) in records.chunks(self.batch_size).enumerate() {
            match self.primary.insert_records(batch).await {
                Ok(inserted) => report.copied = report.copied.saturating_add(inserted),
                Err(e) => {
                    report.errors = report.errors.saturating_add(1);
                    tracing::warn!(
                        table = %table,
                        batch = index,
                        rows = batch.len(),
                        error = %e,
                        "Resync batch failed"
                    );
                }
            }
        }

        tracing::info!(
            table = %table,
            replica_rows = report.replica_rows,
            copied = report.copied,
            errors = report.errors,
            "Resynced table"
        );
        report
    }
}
