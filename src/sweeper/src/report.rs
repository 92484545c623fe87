//! Per-job and per-run sweep results.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// How a cleanup job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// A page came back empty.
    Completed,
    /// A page yielded no successfully processed row; rows remain.
    Stalled,
    /// A fatal error or exhausted query retries ended the job.
    Failed,
    /// The run was cancelled before the job finished.
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Completed => "completed",
            JobStatus::Stalled => "stalled",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of one cleanup job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: usize,
    pub account: String,
    pub table: String,
    /// Rendered time slot, range mode only
    pub slot: Option<String>,
    /// The `$filter` expression the job issued
    pub query: String,
    /// Rows removed, including rows that were already gone
    pub deleted: usize,
    pub already_gone: usize,
    pub pages_fetched: usize,
    pub batches_issued: usize,
    pub failed_deletes: usize,
    pub status: JobStatus,
    pub error: Option<String>,
    pub duration: Duration,
}

impl JobReport {
    /// Report for a job that never got to query its table.
    pub fn failed_before_start(
        job_id: usize,
        account: &str,
        table: &str,
        slot: Option<String>,
        query: String,
        error: String,
    ) -> Self {
        Self {
            job_id,
            account: account.to_string(),
            table: table.to_string(),
            slot,
            query,
            deleted: 0,
            already_gone: 0,
            pages_fetched: 0,
            batches_issued: 0,
            failed_deletes: 0,
            status: JobStatus::Failed,
            error: Some(error),
            duration: Duration::ZERO,
        }
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.table)?;
        if let Some(slot) = &self.slot {
            write!(f, " {slot}")?;
        }
        write!(f, ": {} deleted [{}]", self.deleted, self.status)?;
        if self.failed_deletes > 0 {
            write!(f, ", {} failed", self.failed_deletes)?;
        }
        if let Some(error) = &self.error {
            write!(f, " ({error})")?;
        }
        write!(f, " -- {}", self.query)
    }
}

/// Which rows a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    /// Rows older than `now` minus each table's retention.
    Age { now: DateTime<Utc> },
    /// Rows with a partition key in `[start, end]`, split into slots.
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepMode::Age { .. } => f.write_str("age"),
            SweepMode::Range { .. } => f.write_str("range"),
        }
    }
}

/// Result of a complete sweep across all accounts and tables
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub mode: SweepMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// chrono format used to render timestamps
    pub date_format: String,
    /// One entry per job, ordered by job id
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn total_deleted(&self) -> usize {
        self.jobs.iter().map(|j| j.deleted).sum()
    }

    pub fn wall_time(&self) -> Duration {
        (self.completed_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Every job ran to an empty page.
    pub fn is_clean(&self) -> bool {
        self.jobs.iter().all(|j| j.status == JobStatus::Completed)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Drop sub-second noise from the rendered duration
        let wall = Duration::from_secs(self.wall_time().as_secs());

        writeln!(f, "Sweep {} ({} mode)", self.run_id, self.mode)?;
        writeln!(f, "Start time: {}", self.started_at.format(&self.date_format))?;
        writeln!(f, "End time:   {}", self.completed_at.format(&self.date_format))?;
        writeln!(f, "Time cost:  {}", humantime::format_duration(wall))?;
        writeln!(f, "Total deleted: {}", self.total_deleted())?;
        writeln!(
            f,
            "Jobs: {} completed, {} stalled, {} failed, {} cancelled",
            self.count(JobStatus::Completed),
            self.count(JobStatus::Stalled),
            self.count(JobStatus::Failed),
            self.count(JobStatus::Cancelled)
        )?;
        for job in &self.jobs {
            writeln!(f, "  {job}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job(id: usize, table: &str, deleted: usize, status: JobStatus) -> JobReport {
        JobReport {
            job_id: id,
            account: "eu".to_string(),
            table: table.to_string(),
            slot: None,
            query: "PartitionKey lt '2016-01-18 00:00:00'".to_string(),
            deleted,
            already_gone: 0,
            pages_fetched: 2,
            batches_issued: 3,
            failed_deletes: 0,
            status,
            error: None,
            duration: Duration::from_millis(5),
        }
    }

    fn report(jobs: Vec<JobReport>) -> RunReport {
        let started_at = Utc.with_ymd_and_hms(2016, 1, 18, 0, 0, 0).unwrap();
        RunReport {
            run_id: "sweep_1".to_string(),
            mode: SweepMode::Age { now: started_at },
            started_at,
            completed_at: started_at + chrono::Duration::seconds(62),
            date_format: "%Y-%m-%d %H:%M:%S".to_string(),
            jobs,
        }
    }

    #[test]
    fn test_totals() {
        let report = report(vec![
            job(0, "Error", 150, JobStatus::Completed),
            job(1, "Trace", 20, JobStatus::Stalled),
        ]);

        assert_eq!(report.total_deleted(), 170);
        assert_eq!(report.count(JobStatus::Stalled), 1);
        assert_eq!(report.wall_time(), Duration::from_secs(62));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_summary_rendering() {
        let mut failed = job(1, "Trace", 0, JobStatus::Failed);
        failed.slot = Some("[2016-01-08 .. 2016-01-11)".to_string());
        failed.error = Some("table 'Trace' not found".to_string());

        let text = report(vec![job(0, "Error", 150, JobStatus::Completed), failed]).to_string();

        assert!(text.contains("Start time: 2016-01-18 00:00:00"));
        assert!(text.contains("End time:   2016-01-18 00:01:02"));
        assert!(text.contains("Time cost:  1m 2s"));
        assert!(text.contains("Total deleted: 150"));
        assert!(text.contains("  eu/Error: 150 deleted [completed] -- PartitionKey lt"));
        assert!(text.contains(
            "  eu/Trace [2016-01-08 .. 2016-01-11): 0 deleted [failed] (table 'Trace' not found)"
        ));
    }
}
