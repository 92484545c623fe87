//! Retention sweeper for partitioned telemetry tables.
//!
//! Deletes rows whose time-encoded partition key is older than a retention
//! cutoff (age mode) or falls inside an explicit window (range mode), across
//! every configured storage account and table.
//!
//! # Pipeline
//!
//! - [`planner`] splits a range into bounded time slots
//! - [`query`] builds keys-only queries over the partition key
//! - [`scanner`] re-issues a query page by page
//! - [`grouper`] cuts each page into single-partition batches
//! - [`executor`] deletes a batch and classifies the outcome
//! - [`job`] loops fetch, group and delete for one (account, table, slot)
//! - [`scheduler`] fans jobs out with bounded concurrency and cancellation
//! - [`report`] aggregates per-job results into a run summary

pub mod connector;
pub mod error;
pub mod executor;
pub mod grouper;
pub mod job;
pub mod metrics;
pub mod partition_key;
pub mod planner;
pub mod query;
pub mod report;
pub mod scanner;
pub mod scheduler;

pub use connector::{AzureConnector, MemoryConnector, StoreConnector};
pub use error::{ErrorClass, Result, SweepError, classify};
pub use executor::{BatchOutcome, DeleteExecutor};
pub use grouper::{PageBatches, group_page};
pub use job::CleanupJob;
pub use metrics::{MetricsSummary, SweepMetrics};
pub use partition_key::{DEFAULT_KEY_FORMAT, PartitionKeyCodec};
pub use planner::{MAX_SLOTS, TimeSlot, plan_slots};
pub use query::{cutoff_query, range_query, slot_query};
pub use report::{JobReport, JobStatus, RunReport, SweepMode};
pub use scanner::{PagedScanner, RetryPolicy};
pub use scheduler::Sweeper;
