//! Sweep Metrics
//!
//! Thread-safe counters shared by every job of a run.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use crate::report::JobStatus;

/// Thread-safe metrics for tracking sweep operations
#[derive(Debug, Clone, Default)]
pub struct SweepMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Rows removed, including rows that were already gone
    rows_deleted: AtomicUsize,
    /// Rows the store reported as missing
    rows_already_gone: AtomicUsize,
    pages_fetched: AtomicUsize,
    batch_deletes: AtomicUsize,
    row_deletes: AtomicUsize,
    /// Rows left behind after a failed delete
    failed_deletes: AtomicUsize,
    query_retries: AtomicUsize,
    jobs_completed: AtomicUsize,
    jobs_stalled: AtomicUsize,
    jobs_failed: AtomicUsize,
    jobs_cancelled: AtomicUsize,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rows_deleted(&self, count: usize) {
        self.inner.rows_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rows_already_gone(&self, count: usize) {
        self.inner
            .rows_already_gone
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_page_fetched(&self) {
        self.inner.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_delete(&self) {
        self.inner.batch_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_row_delete(&self) {
        self.inner.row_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_deletes(&self, count: usize) {
        self.inner.failed_deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_query_retry(&self) {
        self.inner.query_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a job ended
    pub fn record_job(&self, status: JobStatus) {
        let counter = match status {
            JobStatus::Completed => &self.inner.jobs_completed,
            JobStatus::Stalled => &self.inner.jobs_stalled,
            JobStatus::Failed => &self.inner.jobs_failed,
            JobStatus::Cancelled => &self.inner.jobs_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows_deleted(&self) -> usize {
        self.inner.rows_deleted.load(Ordering::Relaxed)
    }

    pub fn rows_already_gone(&self) -> usize {
        self.inner.rows_already_gone.load(Ordering::Relaxed)
    }

    pub fn pages_fetched(&self) -> usize {
        self.inner.pages_fetched.load(Ordering::Relaxed)
    }

    pub fn batch_deletes(&self) -> usize {
        self.inner.batch_deletes.load(Ordering::Relaxed)
    }

    pub fn row_deletes(&self) -> usize {
        self.inner.row_deletes.load(Ordering::Relaxed)
    }

    pub fn failed_deletes(&self) -> usize {
        self.inner.failed_deletes.load(Ordering::Relaxed)
    }

    pub fn query_retries(&self) -> usize {
        self.inner.query_retries.load(Ordering::Relaxed)
    }

    /// Get a summary of all metrics
    pub fn summary(&self) -> MetricsSummary {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        MetricsSummary {
            rows_deleted: self.rows_deleted(),
            rows_already_gone: self.rows_already_gone(),
            pages_fetched: self.pages_fetched(),
            batch_deletes: self.batch_deletes(),
            row_deletes: self.row_deletes(),
            failed_deletes: self.failed_deletes(),
            query_retries: self.query_retries(),
            jobs_completed: load(&self.inner.jobs_completed),
            jobs_stalled: load(&self.inner.jobs_stalled),
            jobs_failed: load(&self.inner.jobs_failed),
            jobs_cancelled: load(&self.inner.jobs_cancelled),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub rows_deleted: usize,
    pub rows_already_gone: usize,
    pub pages_fetched: usize,
    pub batch_deletes: usize,
    pub row_deletes: usize,
    pub failed_deletes: usize,
    pub query_retries: usize,
    pub jobs_completed: usize,
    pub jobs_stalled: usize,
    pub jobs_failed: usize,
    pub jobs_cancelled: usize,
}

impl MetricsSummary {
    pub fn jobs_total(&self) -> usize {
        self.jobs_completed + self.jobs_stalled + self.jobs_failed + self.jobs_cancelled
    }

    /// Log the metrics summary
    pub fn log(&self) {
        info!("=== Sweep Metrics Summary ===");
        info!(
            "Jobs: {} total, {} completed, {} stalled, {} failed, {} cancelled",
            self.jobs_total(),
            self.jobs_completed,
            self.jobs_stalled,
            self.jobs_failed,
            self.jobs_cancelled
        );
        info!(
            "Rows: {} deleted ({} already gone), {} failed",
            self.rows_deleted, self.rows_already_gone, self.failed_deletes
        );
        info!(
            "Requests: {} pages, {} batch deletes, {} row deletes, {} query retries",
            self.pages_fetched, self.batch_deletes, self.row_deletes, self.query_retries
        );
    }
}
