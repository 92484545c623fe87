//! Remote table storage contract used by the sweeper.
//!
//! A table store exposes exactly the three operations the retention engine
//! needs: a bounded, projected query over the partition key, a single-row
//! delete and an atomic batch delete of rows sharing one partition key.
//!
//! Two backends are provided:
//!
//! - [`MemoryTableStore`]: ordered in-process tables with fault injection,
//!   used by tests and local experiments
//! - [`AzureTableStore`]: the Azure Table Storage REST API

pub mod azure;
pub mod error;
pub mod memory;
pub mod query;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use azure::{AzureTableStore, ConnectionString, ConnectionStringError};
pub use error::{StoreError, StoreResult};
pub use memory::{CallStats, FaultKind, FaultOp, MemoryTableStore};
pub use query::{Comparison, Filter, TableQuery};

/// Name of the partition key column.
pub const PARTITION_KEY: &str = "PartitionKey";

/// Name of the row key column.
pub const ROW_KEY: &str = "RowKey";

/// Maximum number of operations the remote service accepts in one batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Maximum number of rows the remote service returns per query page
/// when the caller asks for a capped result set.
pub use common::config::MAX_PAGE_SIZE;

/// Identifies one row within a table.
///
/// Ordering is partition key first, then row key, which matches the order in
/// which the remote service returns query results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId {
    #[serde(rename = "PartitionKey")]
    pub partition_key: String,
    #[serde(rename = "RowKey")]
    pub row_key: String,
}

impl RowId {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.partition_key, self.row_key)
    }
}

/// Outcome of a single-row delete that reached the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    Deleted,
    /// The row was already gone.
    NotFound,
}

/// Outcome of a batch delete that reached the service.
///
/// Batches are atomic: a partial failure means none of the rows were
/// deleted and `failed_index` names the member the service rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Deleted,
    PartialFailure {
        failed_index: Option<usize>,
        status: u16,
        message: String,
    },
}

/// Storage operations required for retention enforcement.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Run a bounded query and return the matching row identifiers in
    /// partition key order.
    async fn query(&self, table: &str, query: &TableQuery) -> StoreResult<Vec<RowId>>;

    /// Delete one row, ignoring its ETag.
    async fn delete_row(&self, table: &str, row: &RowId) -> StoreResult<DeleteStatus>;

    /// Delete up to [`MAX_BATCH_SIZE`] rows sharing one partition key in a
    /// single atomic request.
    async fn delete_batch(&self, table: &str, rows: &[RowId]) -> StoreResult<BatchStatus>;
}

/// Check the batch constraints shared by every backend.
pub fn validate_batch(rows: &[RowId]) -> StoreResult<()> {
    let Some(first) = rows.first() else {
        return Err(StoreError::InvalidBatch("batch is empty".to_string()));
    };

    if rows.len() > MAX_BATCH_SIZE {
        return Err(StoreError::InvalidBatch(format!(
            "batch holds {} rows, maximum is {MAX_BATCH_SIZE}",
            rows.len()
        )));
    }

    if let Some(other) = rows
        .iter()
        .find(|row| row.partition_key != first.partition_key)
    {
        return Err(StoreError::InvalidBatch(format!(
            "batch mixes partition keys '{}' and '{}'",
            first.partition_key, other.partition_key
        )));
    }

    Ok(())
}
