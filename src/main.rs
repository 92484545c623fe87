//! tablesweep
//!
//! Deletes expired telemetry rows from every configured storage account.
//!
//! - `tablesweep`: delete rows older than the configured retention
//! - `tablesweep <start> <end>`: delete rows whose partition key lies in
//!   `[start, end]`, one job per time slot

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use common::cli::CommonArgs;
use common::cli::utils::{init_logging, load_config, validate_config};
use sweeper::{AzureConnector, SweepMode, Sweeper};

#[derive(Parser, Debug)]
#[command(author, version, about = "Delete expired rows from partitioned telemetry tables", long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Start of the range to delete (range mode)
    #[arg(value_parser = parse_timestamp, requires = "end")]
    start: Option<DateTime<Utc>>,

    /// End of the range to delete, inclusive
    #[arg(value_parser = parse_timestamp)]
    end: Option<DateTime<Utc>>,
}

impl Args {
    fn mode(&self, now: DateTime<Utc>) -> SweepMode {
        match (self.start, self.end) {
            (Some(start), Some(end)) => SweepMode::Range { start, end },
            _ => SweepMode::Age { now },
        }
    }
}

/// Parse a command line timestamp, interpreted as UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and
/// `YYYY-MM-DD`.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(t.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    Err(format!(
        "'{s}' is not a date; expected YYYY-MM-DD, YYYY-MM-DD HH:MM:SS or RFC 3339"
    ))
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.common);

    let config = load_config(args.common.config.as_ref())?;
    validate_config(&config)?;

    let mode = args.mode(Utc::now());
    let sweeper = Sweeper::new(Arc::new(config), Arc::new(AzureConnector::default()))
        .context("Invalid sweep configuration")?;

    let cancel = CancellationToken::new();
    let signals = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => {
                    info!("Shutdown requested, cancelling outstanding jobs");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "Shutdown signals unavailable"),
            }
        }
    });

    let report = sweeper.run(mode, cancel).await.context("Sweep aborted")?;
    signals.abort();

    println!("{report}");
    sweeper.metrics().summary().log();

    Ok(())
}
