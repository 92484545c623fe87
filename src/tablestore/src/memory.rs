use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    BatchStatus, DeleteStatus, RowId, StoreError, StoreResult, TableQuery, TableStore,
    validate_batch,
};

/// Operation a fault is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Query,
    DeleteRow,
    DeleteBatch,
}

/// Kind of failure an injected fault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// 503 Server Busy.
    Unavailable,
    /// 429 Too Many Requests.
    Throttled,
    /// 403 authentication failure.
    Forbidden,
}

impl FaultKind {
    fn to_error(self) -> StoreError {
        let (status, code, message) = match self {
            FaultKind::Unavailable => (503, "ServerBusy", "The server is currently unable to receive requests"),
            FaultKind::Throttled => (429, "TooManyRequests", "Request rate too high"),
            FaultKind::Forbidden => (
                403,
                "AuthenticationFailed",
                "Server failed to authenticate the request",
            ),
        };
        StoreError::Service {
            status,
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug)]
struct Fault {
    op: FaultOp,
    table: Option<String>,
    kind: FaultKind,
    remaining: usize,
}

/// Calls observed by the in-memory store for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStats {
    pub queries: usize,
    pub row_deletes: usize,
    pub batch_deletes: usize,
    /// Size of every batch delete request, in call order.
    pub batch_sizes: Vec<usize>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, BTreeSet<RowId>>,
    faults: Vec<Fault>,
    stats: HashMap<String, CallStats>,
}

impl State {
    fn take_fault(&mut self, op: FaultOp, table: &str) -> Option<StoreError> {
        let fault = self.faults.iter_mut().find(|f| {
            f.op == op && f.remaining > 0 && f.table.as_deref().is_none_or(|t| t == table)
        })?;
        fault.remaining -= 1;
        let error = fault.kind.to_error();
        self.faults.retain(|f| f.remaining > 0);
        Some(error)
    }

    fn table_mut(&mut self, table: &str) -> StoreResult<&mut BTreeSet<RowId>> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }
}

/// In-memory table store with ordered rows and fault injection.
///
/// Rows are kept sorted by (partition key, row key), matching the order the
/// real service returns them in. Clones share the same underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableStore {
    state: Arc<Mutex<State>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table if it does not exist yet.
    pub async fn create_table(&self, table: &str) {
        let mut state = self.state.lock().await;
        state.tables.entry(table.to_string()).or_default();
    }

    /// Insert rows, creating the table when needed.
    pub async fn insert_rows(&self, table: &str, rows: impl IntoIterator<Item = RowId>) {
        let mut state = self.state.lock().await;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Number of rows currently stored in a table.
    pub async fn row_count(&self, table: &str) -> usize {
        let state = self.state.lock().await;
        state.tables.get(table).map_or(0, BTreeSet::len)
    }

    /// Snapshot of the rows in a table, in key order.
    pub async fn rows(&self, table: &str) -> Vec<RowId> {
        let state = self.state.lock().await;
        state
            .tables
            .get(table)
            .map(|rows| rows.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `times` calls of `op` fail with `kind`.
    ///
    /// With `table` set, only calls against that table are affected.
    pub async fn inject_fault(
        &self,
        op: FaultOp,
        table: Option<&str>,
        kind: FaultKind,
        times: usize,
    ) {
        let mut state = self.state.lock().await;
        state.faults.push(Fault {
            op,
            table: table.map(str::to_string),
            kind,
            remaining: times,
        });
    }

    /// Calls observed for a table.
    pub async fn stats(&self, table: &str) -> CallStats {
        let state = self.state.lock().await;
        state.stats.get(table).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn query(&self, table: &str, query: &TableQuery) -> StoreResult<Vec<RowId>> {
        let mut state = self.state.lock().await;
        state.stats.entry(table.to_string()).or_default().queries += 1;

        if let Some(error) = state.take_fault(FaultOp::Query, table) {
            return Err(error);
        }

        let rows = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        Ok(rows
            .iter()
            .filter(|row| query.filter.matches(row))
            .take(query.take)
            .cloned()
            .collect())
    }

    async fn delete_row(&self, table: &str, row: &RowId) -> StoreResult<DeleteStatus> {
        let mut state = self.state.lock().await;
        state.stats.entry(table.to_string()).or_default().row_deletes += 1;

        if let Some(error) = state.take_fault(FaultOp::DeleteRow, table) {
            return Err(error);
        }

        if state.table_mut(table)?.remove(row) {
            Ok(DeleteStatus::Deleted)
        } else {
            Ok(DeleteStatus::NotFound)
        }
    }

    async fn delete_batch(&self, table: &str, rows: &[RowId]) -> StoreResult<BatchStatus> {
        validate_batch(rows)?;

        let mut state = self.state.lock().await;
        let stats = state.stats.entry(table.to_string()).or_default();
        stats.batch_deletes += 1;
        stats.batch_sizes.push(rows.len());

        if let Some(error) = state.take_fault(FaultOp::DeleteBatch, table) {
            return Err(error);
        }

        let stored = state.table_mut(table)?;

        // The batch is atomic: one missing member rejects the whole change set.
        if let Some(index) = rows.iter().position(|row| !stored.contains(row)) {
            return Ok(BatchStatus::PartialFailure {
                failed_index: Some(index),
                status: 404,
                message: format!("{index}:The specified resource does not exist."),
            });
        }

        for row in rows {
            stored.remove(row);
        }

        Ok(BatchStatus::Deleted)
    }
}
