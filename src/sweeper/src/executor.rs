//! Delete execution for one batch of rows.

use std::sync::Arc;

use tracing::{info, warn};

use tablestore::{BatchStatus, DeleteStatus, RowId, StoreError, TableStore};

use crate::error::{ErrorClass, classify};
use crate::metrics::SweepMetrics;

/// What happened to the rows of one batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Rows that are gone now, including `already_gone`
    pub succeeded: usize,
    pub already_gone: usize,
    /// Rows still present because their delete failed
    pub failed: usize,
    /// Last delete error seen in this batch
    pub error: Option<StoreError>,
}

impl BatchOutcome {
    fn gone(&mut self) {
        self.succeeded += 1;
        self.already_gone += 1;
    }
}

/// Issues deletes against one table and classifies their outcome.
pub struct DeleteExecutor {
    store: Arc<dyn TableStore>,
    account: String,
    table: String,
    metrics: SweepMetrics,
}

impl DeleteExecutor {
    pub fn new(
        store: Arc<dyn TableStore>,
        account: impl Into<String>,
        table: impl Into<String>,
        metrics: SweepMetrics,
    ) -> Self {
        Self {
            store,
            account: account.into(),
            table: table.into(),
            metrics,
        }
    }

    /// Delete a batch produced by the grouper.
    ///
    /// One-row batches use the single-row API. Larger batches go out as one
    /// atomic request; if the service rejects it because of one member, the
    /// rows are retried one by one so the healthy ones still go.
    ///
    /// Failed deletes never end the job. Their rows stay in the table and
    /// are selected again by the next page.
    pub async fn delete(&self, batch: &[RowId]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        match batch {
            [] => {}
            [row] => self.delete_one(row, &mut outcome).await,
            rows => self.delete_grouped(rows, &mut outcome).await,
        }

        self.metrics.record_rows_deleted(outcome.succeeded);
        self.metrics.record_rows_already_gone(outcome.already_gone);
        self.metrics.record_failed_deletes(outcome.failed);
        outcome
    }

    async fn delete_one(&self, row: &RowId, outcome: &mut BatchOutcome) {
        self.metrics.record_row_delete();

        let err = match self.store.delete_row(&self.table, row).await {
            Ok(DeleteStatus::Deleted) => {
                outcome.succeeded += 1;
                return;
            }
            Ok(DeleteStatus::NotFound) => {
                outcome.gone();
                return;
            }
            Err(e) => e,
        };

        if classify(&err) == ErrorClass::NotFound {
            outcome.gone();
            return;
        }

        warn!(
            account = %self.account,
            table = %self.table,
            partition_key = %row.partition_key,
            row_key = %row.row_key,
            error = %err,
            "Row delete failed"
        );
        outcome.failed += 1;
        outcome.error = Some(err);
    }

    async fn delete_grouped(&self, rows: &[RowId], outcome: &mut BatchOutcome) {
        self.metrics.record_batch_delete();
        let partition_key = &rows[0].partition_key;

        let err = match self.store.delete_batch(&self.table, rows).await {
            Ok(BatchStatus::Deleted) => {
                outcome.succeeded += rows.len();
                return;
            }
            Ok(BatchStatus::PartialFailure {
                failed_index,
                status,
                message,
            }) => {
                info!(
                    account = %self.account,
                    table = %self.table,
                    partition_key = %partition_key,
                    rows = rows.len(),
                    failed_index = ?failed_index,
                    status,
                    message = %message,
                    "Batch rejected, deleting rows individually"
                );
                self.delete_each(rows, outcome).await;
                return;
            }
            Err(e) => e,
        };

        if classify(&err) == ErrorClass::NotFound {
            self.delete_each(rows, outcome).await;
            return;
        }

        warn!(
            account = %self.account,
            table = %self.table,
            partition_key = %partition_key,
            rows = rows.len(),
            error = %err,
            "Batch delete failed"
        );
        outcome.failed += rows.len();
        outcome.error = Some(err);
    }

    async fn delete_each(&self, rows: &[RowId], outcome: &mut BatchOutcome) {
        for row in rows {
            self.delete_one(row, outcome).await;
        }
    }
}
