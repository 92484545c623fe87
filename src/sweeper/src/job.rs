//! The per-job delete loop.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::BatchingPolicy;
use tablestore::{TableQuery, TableStore};

use crate::executor::DeleteExecutor;
use crate::grouper::group_page;
use crate::metrics::SweepMetrics;
use crate::report::{JobReport, JobStatus};
use crate::scanner::{PagedScanner, RetryPolicy};

/// One unit of concurrent work: a table of an account, optionally
/// restricted to a time slot.
#[derive(Debug, Clone)]
pub struct CleanupJob {
    pub id: usize,
    pub account: String,
    pub table: String,
    pub batching: BatchingPolicy,
    /// Rendered time slot, range mode only
    pub slot: Option<String>,
    pub query: TableQuery,
}

impl CleanupJob {
    /// Run the job until its query drains, it stalls, fails or is cancelled.
    ///
    /// Each pass fetches one page, deletes it batch by batch and fetches
    /// again. Failed deletes leave their rows for the next page; a page in
    /// which nothing could be processed stalls the job. Only a query the
    /// service will never answer fails it.
    pub async fn run(
        self,
        store: Arc<dyn TableStore>,
        retry: RetryPolicy,
        cancel: CancellationToken,
        metrics: SweepMetrics,
    ) -> JobReport {
        let started = Instant::now();
        let slot = self.slot.as_deref().unwrap_or("-");
        let mut report = JobReport {
            job_id: self.id,
            account: self.account.clone(),
            table: self.table.clone(),
            slot: self.slot.clone(),
            query: self.query.filter_string(),
            deleted: 0,
            already_gone: 0,
            pages_fetched: 0,
            batches_issued: 0,
            failed_deletes: 0,
            status: JobStatus::Completed,
            error: None,
            duration: Default::default(),
        };

        info!(
            job_id = self.id,
            account = %self.account,
            table = %self.table,
            slot = %slot,
            batching = %self.batching,
            query = %report.query,
            "Starting cleanup job"
        );

        let scanner = PagedScanner::new(
            store.clone(),
            self.table.clone(),
            self.query,
            retry,
            cancel.clone(),
            metrics.clone(),
        );
        let executor = DeleteExecutor::new(store, self.account.clone(), self.table.clone(), metrics.clone());

        let status = 'pages: loop {
            if cancel.is_cancelled() {
                break JobStatus::Cancelled;
            }

            let page = match scanner.fetch_page().await {
                Ok(page) => page,
                Err(_) if cancel.is_cancelled() => break JobStatus::Cancelled,
                Err(e) => {
                    error!(
                        account = %self.account,
                        table = %self.table,
                        slot = %slot,
                        query = %report.query,
                        error = %e,
                        "Page query failed, giving up on job"
                    );
                    report.error = Some(e.to_string());
                    break JobStatus::Failed;
                }
            };
            report.pages_fetched += 1;

            if page.is_empty() {
                break JobStatus::Completed;
            }

            let mut processed = 0;
            let mut last_error = None;
            for batch in group_page(&page, self.batching) {
                if cancel.is_cancelled() {
                    break 'pages JobStatus::Cancelled;
                }

                let outcome = executor.delete(batch).await;
                report.batches_issued += 1;
                report.deleted += outcome.succeeded;
                report.already_gone += outcome.already_gone;
                report.failed_deletes += outcome.failed;
                processed += outcome.succeeded;
                if outcome.error.is_some() {
                    last_error = outcome.error;
                }

                if outcome.succeeded > 0 {
                    info!(
                        account = %self.account,
                        table = %self.table,
                        partition_key = %batch[0].partition_key,
                        rows = outcome.succeeded,
                        total = report.deleted,
                        "Deleted batch"
                    );
                }
            }

            if processed == 0 {
                warn!(
                    account = %self.account,
                    table = %self.table,
                    slot = %slot,
                    rows = page.len(),
                    "No row of the page could be deleted, stopping job"
                );
                report.error = last_error.map(|e| e.to_string());
                break JobStatus::Stalled;
            }
        };

        report.status = status;
        report.duration = started.elapsed();
        metrics.record_job(status);

        info!(
            job_id = report.job_id,
            account = %report.account,
            table = %report.table,
            slot = %slot,
            deleted = report.deleted,
            pages = report.pages_fetched,
            batches = report.batches_issued,
            failed = report.failed_deletes,
            status = %status,
            duration_ms = report.duration.as_millis() as u64,
            "Cleanup job finished"
        );

        report
    }
}
