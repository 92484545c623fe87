//! Paged scanning of expired rows.
//!
//! The scanner holds no cursor: every fetch re-issues the same bounded query,
//! so once the previous page has been deleted the next fetch returns the new
//! leading edge of the table.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use common::SweepConfig;
use tablestore::{RowId, StoreError, TableQuery, TableStore};

use crate::error::{ErrorClass, classify};
use crate::metrics::SweepMetrics;

/// Exponential backoff for failed page queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            max_retries: config.max_query_retries,
            base_delay: config.retry_base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

pub struct PagedScanner {
    store: Arc<dyn TableStore>,
    table: String,
    query: TableQuery,
    retry: RetryPolicy,
    cancel: CancellationToken,
    metrics: SweepMetrics,
}

impl PagedScanner {
    pub fn new(
        store: Arc<dyn TableStore>,
        table: impl Into<String>,
        query: TableQuery,
        retry: RetryPolicy,
        cancel: CancellationToken,
        metrics: SweepMetrics,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            query,
            retry,
            cancel,
            metrics,
        }
    }

    pub fn query(&self) -> &TableQuery {
        &self.query
    }

    /// Fetch the current first page of matching rows.
    ///
    /// Transient failures are retried with backoff. Returns the last error
    /// once retries run out, on a non-transient error, or when cancelled
    /// while backing off.
    pub async fn fetch_page(&self) -> Result<Vec<RowId>, StoreError> {
        let mut attempt = 0;
        loop {
            let err = match self.store.query(&self.table, &self.query).await {
                Ok(page) => {
                    self.metrics.record_page_fetched();
                    debug!(
                        table = %self.table,
                        rows = page.len(),
                        "Fetched page"
                    );
                    return Ok(page);
                }
                Err(e) => e,
            };

            if classify(&err) != ErrorClass::Transient || attempt >= self.retry.max_retries {
                return Err(err);
            }

            attempt += 1;
            let delay = self.retry.delay(attempt);
            warn!(
                table = %self.table,
                query = %self.query.filter,
                attempt,
                max_retries = self.retry.max_retries,
                delay = ?delay,
                error = %err,
                "Page query failed, retrying"
            );
            self.metrics.record_query_retry();

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablestore::{Comparison, FaultKind, FaultOp, Filter, MemoryTableStore};

    async fn store_with_rows() -> MemoryTableStore {
        let store = MemoryTableStore::new();
        store
            .insert_rows(
                "Trace",
                (0..5).map(|i| RowId::new("2016-01-01 00:00:00", format!("{i}"))),
            )
            .await;
        store
    }

    fn scanner(store: &MemoryTableStore, retry: RetryPolicy) -> PagedScanner {
        let query = TableQuery::keys_only(
            Filter::partition_key(Comparison::Lt, "2016-02-01 00:00:00"),
            3,
        );
        PagedScanner::new(
            Arc::new(store.clone()),
            "Trace",
            query,
            retry,
            CancellationToken::new(),
            SweepMetrics::new(),
        )
    }

    fn quick_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(2), Duration::from_millis(200));
        assert_eq!(retry.delay(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_fetch_is_capped_and_repeatable() {
        let store = store_with_rows().await;
        let scanner = scanner(&store, quick_retry(0));

        let first = scanner.fetch_page().await.unwrap();
        assert_eq!(first.len(), 3);

        // Nothing was deleted, so the same query returns the same page
        let again = scanner.fetch_page().await.unwrap();
        assert_eq!(first, again);
        assert_eq!(scanner.metrics.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = store_with_rows().await;
        store
            .inject_fault(FaultOp::Query, Some("Trace"), FaultKind::Unavailable, 2)
            .await;
        let scanner = scanner(&store, quick_retry(3));

        let page = scanner.fetch_page().await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(scanner.metrics.query_retries(), 2);
        assert_eq!(store.stats("Trace").await.queries, 3);
    }

    #[tokio::test]
    async fn test_retries_run_out() {
        let store = store_with_rows().await;
        store
            .inject_fault(FaultOp::Query, None, FaultKind::Throttled, 10)
            .await;
        let scanner = scanner(&store, quick_retry(2));

        let err = scanner.fetch_page().await.unwrap_err();
        assert_eq!(err.status(), Some(429));
        assert_eq!(store.stats("Trace").await.queries, 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let store = store_with_rows().await;
        store
            .inject_fault(FaultOp::Query, None, FaultKind::Forbidden, 10)
            .await;
        let scanner = scanner(&store, quick_retry(5));

        assert!(scanner.fetch_page().await.is_err());
        assert_eq!(store.stats("Trace").await.queries, 1);
        assert_eq!(scanner.metrics.query_retries(), 0);
    }

    #[tokio::test]
    async fn test_missing_table() {
        let store = MemoryTableStore::new();
        let scanner = scanner(&store, quick_retry(3));

        let err = scanner.fetch_page().await.unwrap_err();
        assert!(matches!(err, StoreError::TableNotFound(_)));
    }
}
