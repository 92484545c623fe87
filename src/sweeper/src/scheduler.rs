//! Fan-out of cleanup jobs across accounts, tables and time slots.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::Configuration;
use tablestore::TableStore;

use crate::connector::StoreConnector;
use crate::error::{Result, SweepError};
use crate::job::CleanupJob;
use crate::metrics::SweepMetrics;
use crate::partition_key::PartitionKeyCodec;
use crate::planner::plan_slots;
use crate::query::{cutoff_query, slot_query};
use crate::report::{JobReport, JobStatus, RunReport, SweepMode};
use crate::scanner::RetryPolicy;

type ConnectResult = std::result::Result<Arc<dyn TableStore>, String>;

/// Plans and runs sweeps over every configured account and table.
///
/// Jobs run on their own tasks, at most `max_concurrent_jobs` at a time.
/// A job that fails, stalls or panics never affects the others.
pub struct Sweeper {
    config: Arc<Configuration>,
    connector: Arc<dyn StoreConnector>,
    codec: PartitionKeyCodec,
    metrics: SweepMetrics,
}

impl Sweeper {
    /// Validate the configuration and build a sweeper.
    pub fn new(config: Arc<Configuration>, connector: Arc<dyn StoreConnector>) -> Result<Self> {
        config.validate()?;
        let codec = PartitionKeyCodec::new(config.sweep.date_format.clone())?;

        Ok(Self {
            config,
            connector,
            codec,
            metrics: SweepMetrics::new(),
        })
    }

    pub fn with_metrics(mut self, metrics: SweepMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SweepMetrics {
        &self.metrics
    }

    pub fn codec(&self) -> &PartitionKeyCodec {
        &self.codec
    }

    /// Build the job list for `mode`, ordered by account, table, then slot.
    ///
    /// Age mode yields one job per (account, table) and range mode one per
    /// (account, table, slot). Job ids are indices into the returned list.
    pub fn plan(&self, mode: &SweepMode) -> Result<Vec<CleanupJob>> {
        let sweep = &self.config.sweep;
        if self.config.accounts.is_empty() {
            return Err(SweepError::NoAccounts);
        }

        // (slot label, query) per table, shared by every account
        let mut per_table = Vec::with_capacity(self.config.tables.len());
        for table in &self.config.tables {
            let queries = match *mode {
                SweepMode::Age { now } => {
                    let retention = self.config.retention_for(table);
                    let cutoff = TimeDelta::from_std(retention)
                        .ok()
                        .and_then(|age| now.checked_sub_signed(age))
                        .ok_or(SweepError::InvalidRetention(retention))?;
                    vec![(None, cutoff_query(&self.codec, cutoff, sweep.page_size)?)]
                }
                SweepMode::Range { start, end } => plan_slots(start, end, sweep.slot_span)?
                    .iter()
                    .map(|slot| {
                        let label = slot.label(self.codec.format());
                        slot_query(&self.codec, slot, sweep.page_size).map(|q| (Some(label), q))
                    })
                    .collect::<Result<Vec<_>>>()?,
            };
            per_table.push((table, queries));
        }

        let mut jobs = Vec::new();
        for account in &self.config.accounts {
            for (table, queries) in &per_table {
                for (slot, query) in queries {
                    jobs.push(CleanupJob {
                        id: jobs.len(),
                        account: account.name.clone(),
                        table: table.name.clone(),
                        batching: table.batching,
                        slot: slot.clone(),
                        query: query.clone(),
                    });
                }
            }
        }
        Ok(jobs)
    }

    /// Run a sweep and wait for every job.
    ///
    /// Planning errors abort before any job starts. Cancelling `cancel`, or
    /// reaching the configured run timeout, stops outstanding jobs at their
    /// next page or batch; the report still covers every job.
    pub async fn run(&self, mode: SweepMode, cancel: CancellationToken) -> Result<RunReport> {
        let jobs = self.plan(&mode)?;
        let started_at = Utc::now();
        let run_id = format!("sweep_{}", started_at.timestamp_millis());

        info!(
            run_id = %run_id,
            mode = %mode,
            accounts = self.config.accounts.len(),
            tables = self.config.tables.len(),
            jobs = jobs.len(),
            max_concurrent_jobs = self.config.sweep.max_concurrent_jobs,
            "Starting sweep"
        );

        let cancel = cancel.child_token();
        let deadline = self.config.sweep.run_timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout = ?timeout, "Run timeout reached, cancelling outstanding jobs");
                cancel.cancel();
            })
        });

        let stores = self.connect_accounts().await;
        let retry = RetryPolicy::from_config(&self.config.sweep);

        let mut slots: Vec<Option<JobReport>> = vec![None; jobs.len()];
        let mut work = Vec::with_capacity(jobs.len());
        for job in jobs {
            let store = stores
                .iter()
                .find(|(name, _)| *name == job.account)
                .map(|(_, store)| store.clone());
            match store {
                Some(Ok(store)) => work.push((job, store)),
                other => {
                    let reason = match other {
                        Some(Err(reason)) => reason,
                        _ => format!("account '{}' is not configured", job.account),
                    };
                    self.metrics.record_job(JobStatus::Failed);
                    slots[job.id] = Some(JobReport::failed_before_start(
                        job.id,
                        &job.account,
                        &job.table,
                        job.slot.clone(),
                        job.query.filter_string(),
                        reason,
                    ));
                }
            }
        }

        let mut results = stream::iter(work)
            .map(|(job, store)| {
                let cancel = cancel.clone();
                let metrics = self.metrics.clone();
                let fallback = JobReport::failed_before_start(
                    job.id,
                    &job.account,
                    &job.table,
                    job.slot.clone(),
                    job.query.filter_string(),
                    String::new(),
                );
                let handle = tokio::spawn(job.run(store, retry, cancel, metrics));
                async move { (fallback, handle.await) }
            })
            .buffer_unordered(self.config.sweep.max_concurrent_jobs);

        while let Some((fallback, joined)) = results.next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    error!(
                        job_id = fallback.job_id,
                        account = %fallback.account,
                        table = %fallback.table,
                        error = %e,
                        "Cleanup job panicked"
                    );
                    self.metrics.record_job(JobStatus::Failed);
                    JobReport {
                        error: Some(format!("job task failed: {e}")),
                        ..fallback
                    }
                }
            };
            let id = report.job_id;
            slots[id] = Some(report);
        }

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let report = RunReport {
            run_id,
            mode,
            started_at,
            completed_at: Utc::now(),
            date_format: self.codec.format().to_string(),
            jobs: slots.into_iter().flatten().collect(),
        };

        info!(
            run_id = %report.run_id,
            jobs = report.jobs.len(),
            total_deleted = report.total_deleted(),
            duration_ms = report.wall_time().as_millis() as u64,
            "Sweep completed"
        );

        Ok(report)
    }

    /// Open a store per account. A failure only affects that account's jobs.
    async fn connect_accounts(&self) -> Vec<(String, ConnectResult)> {
        let mut stores = Vec::with_capacity(self.config.accounts.len());
        for account in &self.config.accounts {
            let store = match self.connector.connect(account).await {
                Ok(store) => Ok(store),
                Err(e) => {
                    error!(
                        account = %account.name,
                        error = %e,
                        "Failed to connect to storage account"
                    );
                    Err(format!("failed to connect to account: {e}"))
                }
            };
            stores.push((account.name.clone(), store));
        }
        stores
    }
}
