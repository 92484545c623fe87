use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tablesweep.toml";

/// Prefix of environment overrides, e.g. `TABLESWEEP__SWEEP__PAGE_SIZE=50`.
pub const ENV_PREFIX: &str = "TABLESWEEP__";

/// Largest page and batch size the table service accepts.
pub const MAX_PAGE_SIZE: usize = 100;

/// How rows of a table are grouped for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchingPolicy {
    /// Rows rarely share a partition key: delete them one by one.
    #[default]
    Single,
    /// Rows cluster by partition key: delete them in grouped batches.
    Batch,
}

impl fmt::Display for BatchingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchingPolicy::Single => write!(f, "single"),
            BatchingPolicy::Batch => write!(f, "batch"),
        }
    }
}

/// Engine settings shared by every job of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Rows older than `now - retention` are deleted in age mode.
    ///
    /// Env: TABLESWEEP__SWEEP__RETENTION
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// Maximum rows fetched per query page.
    ///
    /// Env: TABLESWEEP__SWEEP__PAGE_SIZE
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Upper bound on jobs running at the same time.
    ///
    /// Env: TABLESWEEP__SWEEP__MAX_CONCURRENT_JOBS
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Width of a time slot in range mode.
    ///
    /// Env: TABLESWEEP__SWEEP__SLOT_SPAN
    #[serde(with = "humantime_serde", default = "default_slot_span")]
    pub slot_span: Duration,

    /// chrono format used both for partition keys and for display.
    ///
    /// Env: TABLESWEEP__SWEEP__DATE_FORMAT
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Consecutive failed page queries tolerated before a job gives up.
    ///
    /// Env: TABLESWEEP__SWEEP__MAX_QUERY_RETRIES
    #[serde(default = "default_max_query_retries")]
    pub max_query_retries: u32,

    /// Base delay of the exponential backoff between query retries.
    ///
    /// Env: TABLESWEEP__SWEEP__RETRY_BASE_DELAY
    #[serde(with = "humantime_serde", default = "default_retry_base_delay")]
    pub retry_base_delay: Duration,

    /// Deadline after which outstanding jobs are cancelled.
    ///
    /// Env: TABLESWEEP__SWEEP__RUN_TIMEOUT
    #[serde(
        with = "humantime_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub run_timeout: Option<Duration>,
}

fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}

fn default_max_concurrent_jobs() -> usize {
    16
}

fn default_slot_span() -> Duration {
    Duration::from_secs(3 * 24 * 3600)
}

fn default_date_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

fn default_max_query_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(200)
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(60 * 24 * 3600), // 60 days
            page_size: default_page_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            slot_span: default_slot_span(),
            date_format: default_date_format(),
            max_query_retries: default_max_query_retries(),
            retry_base_delay: default_retry_base_delay(),
            run_timeout: None,
        }
    }
}

/// A storage account to sweep.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Display name used in logs and the summary.
    pub name: String,
    /// Storage connection string (`DefaultEndpointsProtocol=…;AccountName=…;AccountKey=…`).
    pub connection_string: String,
}

impl AccountConfig {
    pub fn new(name: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection_string: connection_string.into(),
        }
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("name", &self.name)
            .field("connection_string", &"<redacted>")
            .finish()
    }
}

/// A table swept in every account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,

    #[serde(default)]
    pub batching: BatchingPolicy,

    /// Override of the global retention for this table.
    #[serde(
        with = "humantime_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub retention: Option<Duration>,
}

impl TableConfig {
    pub fn new(name: impl Into<String>, batching: BatchingPolicy) -> Self {
        Self {
            name: name.into(),
            batching,
            retention: None,
        }
    }
}

// Ascending instants that flip every calendar field at least once.
const KEY_FORMAT_PROBES: &[(i32, u32, u32, u32, u32, u32)] = &[
    (1999, 12, 31, 23, 59, 59),
    (2000, 1, 1, 0, 0, 0),
    (2000, 1, 1, 0, 0, 1),
    (2000, 1, 1, 0, 0, 10),
    (2000, 1, 1, 0, 1, 0),
    (2000, 1, 1, 0, 10, 0),
    (2000, 1, 1, 1, 0, 0),
    (2000, 1, 1, 10, 0, 0),
    (2000, 1, 1, 12, 0, 0),
    (2000, 1, 1, 13, 0, 0),
    (2000, 1, 2, 0, 0, 0),
    (2000, 1, 10, 0, 0, 0),
    (2000, 2, 1, 0, 0, 0),
    (2000, 10, 1, 0, 0, 0),
    (2001, 1, 1, 0, 0, 0),
    (2010, 1, 1, 0, 0, 0),
    (2099, 12, 31, 23, 59, 59),
];

/// Whether `format` renders timestamps as fixed-width strings whose
/// lexicographic order matches chronological order.
pub fn is_sortable_key_format(format: &str) -> bool {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return false;
    }

    let mut rendered = Vec::with_capacity(KEY_FORMAT_PROBES.len());
    for &(y, mo, d, h, mi, s) in KEY_FORMAT_PROBES {
        let Some(instant) =
            NaiveDate::from_ymd_opt(y, mo, d).and_then(|date| date.and_hms_opt(h, mi, s))
        else {
            return false;
        };
        rendered.push(render(format, instant));
    }

    let width = rendered[0].len();
    rendered.iter().all(|r| r.len() == width)
        && rendered.windows(2).all(|pair| pair[0] <= pair[1])
        && rendered.first() < rendered.last()
}

fn render(format: &str, instant: NaiveDateTime) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    // Specifiers that need a time zone fail to render on a naive instant.
    if write!(out, "{}", instant.format(format)).is_err() {
        out.clear();
    }
    out
}

/// The telemetry tables written by the instrumented services.
pub fn default_tables() -> Vec<TableConfig> {
    vec![
        TableConfig::new("Error", BatchingPolicy::Single),
        TableConfig::new("ApplicationError", BatchingPolicy::Single),
        TableConfig::new("UserError", BatchingPolicy::Single),
        TableConfig::new("Latency", BatchingPolicy::Single),
        // Many rows per partition key, so grouped deletes save round trips.
        TableConfig::new("Performance", BatchingPolicy::Batch),
        TableConfig::new("Trace", BatchingPolicy::Batch),
    ]
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Configuration {
    /// Engine settings
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Storage accounts to sweep
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Tables swept in every account
    #[serde(default = "default_tables")]
    pub tables: Vec<TableConfig>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            sweep: SweepConfig::default(),
            accounts: Vec::new(),
            tables: default_tables(),
        }
    }
}

impl Configuration {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    /// Load defaults, then `tablesweep.toml`, then `TABLESWEEP__*` variables.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(DEFAULT_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Load defaults, then the given file, then `TABLESWEEP__*` variables.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file_exact(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Effective retention of a table.
    pub fn retention_for(&self, table: &TableConfig) -> Duration {
        table.retention.unwrap_or(self.sweep.retention)
    }

    /// Validate the configuration.
    ///
    /// Checks:
    /// - Page size is within 1..=100
    /// - Concurrency, slot span and retention periods are positive
    /// - The date format is fixed width and sorts chronologically
    /// - Accounts and tables are named and unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = Duration::ZERO;
        let sweep = &self.sweep;

        if sweep.page_size == 0 || sweep.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::InvalidPageSize(sweep.page_size));
        }
        if sweep.max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if sweep.slot_span <= zero {
            return Err(ConfigError::InvalidSlotSpan(sweep.slot_span));
        }
        if sweep.retention <= zero {
            return Err(ConfigError::InvalidRetention(sweep.retention));
        }
        if !is_sortable_key_format(&sweep.date_format) {
            return Err(ConfigError::InvalidDateFormat(sweep.date_format.clone()));
        }

        let mut names = HashSet::new();
        for account in &self.accounts {
            if account.name.trim().is_empty() {
                return Err(ConfigError::UnnamedAccount);
            }
            if account.connection_string.trim().is_empty() {
                return Err(ConfigError::MissingConnectionString(account.name.clone()));
            }
            if !names.insert(account.name.as_str()) {
                return Err(ConfigError::DuplicateAccount(account.name.clone()));
            }
        }

        let mut names = HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(ConfigError::UnnamedTable);
            }
            if !names.insert(table.name.as_str()) {
                return Err(ConfigError::DuplicateTable(table.name.clone()));
            }
            if let Some(duration) = table.retention
                && duration <= zero
            {
                return Err(ConfigError::InvalidTableRetention {
                    table: table.name.clone(),
                    duration,
                });
            }
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid page size {0}: must be between 1 and {max}", max = MAX_PAGE_SIZE)]
    InvalidPageSize(usize),

    #[error("Invalid concurrency: max_concurrent_jobs must be positive")]
    InvalidConcurrency,

    #[error("Invalid slot span: {0:?} must be positive")]
    InvalidSlotSpan(Duration),

    #[error("Invalid retention period: {0:?} must be positive")]
    InvalidRetention(Duration),

    #[error("Invalid retention period for table '{table}': {duration:?} must be positive")]
    InvalidTableRetention { table: String, duration: Duration },

    #[error("Invalid date format '{0}': partition keys must be fixed width and sort chronologically")]
    InvalidDateFormat(String),

    #[error("Account without a name")]
    UnnamedAccount,

    #[error("Account '{0}' has no connection string")]
    MissingConnectionString(String),

    #[error("Account '{0}' is configured twice")]
    DuplicateAccount(String),

    #[error("Table without a name")]
    UnnamedTable,

    #[error("Table '{0}' is configured twice")]
    DuplicateTable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.sweep.retention, Duration::from_secs(60 * 86400));
        assert_eq!(config.sweep.page_size, 100);
        assert_eq!(config.tables.len(), 6);
        assert_eq!(
            config.table("Trace").unwrap().batching,
            BatchingPolicy::Batch
        );
        assert_eq!(
            config.table("Error").unwrap().batching,
            BatchingPolicy::Single
        );
    }

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert!(config.accounts.is_empty());
        assert_eq!(config.sweep.date_format, "%Y-%m-%d %H:%M:%S");
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [sweep]
                retention = "30days"
                page_size = 50
                run_timeout = "2h"

                [[accounts]]
                name = "telemetry-eu"
                connection_string = "UseDevelopmentStorage=true"

                [[tables]]
                name = "Trace"
                batching = "batch"
                retention = "7days"

                [[tables]]
                name = "Error"
                "#,
            )?;

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.sweep.retention, Duration::from_secs(30 * 86400));
            assert_eq!(config.sweep.page_size, 50);
            assert_eq!(config.sweep.run_timeout, Some(Duration::from_secs(7200)));
            // Untouched keys keep their defaults
            assert_eq!(config.sweep.max_concurrent_jobs, 16);

            assert_eq!(config.accounts.len(), 1);
            assert_eq!(config.accounts[0].name, "telemetry-eu");

            assert_eq!(config.tables.len(), 2);
            let trace = config.table("Trace").unwrap();
            assert_eq!(trace.batching, BatchingPolicy::Batch);
            assert_eq!(
                config.retention_for(trace),
                Duration::from_secs(7 * 86400)
            );
            let error = config.table("Error").unwrap();
            assert_eq!(error.batching, BatchingPolicy::Single);
            assert_eq!(config.retention_for(error), Duration::from_secs(30 * 86400));

            Ok(())
        });
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.set_env("TABLESWEEP__SWEEP__PAGE_SIZE", "25");
            jail.set_env("TABLESWEEP__SWEEP__SLOT_SPAN", "12h");

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.sweep.page_size, 25);
            assert_eq!(config.sweep.slot_span, Duration::from_secs(12 * 3600));

            Ok(())
        });
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        let result = Configuration::load_from_path(Path::new("/nonexistent/tablesweep.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_page_size() {
        let mut config = Configuration::default();
        config.sweep.page_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPageSize(0))
        ));

        config.sweep.page_size = 101;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPageSize(101))
        ));
    }

    #[test]
    fn test_invalid_date_format() {
        let mut config = Configuration::default();
        config.sweep.date_format = "%Y-%Q".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDateFormat(_))
        ));
    }

    #[test]
    fn test_unsortable_date_format() {
        assert!(is_sortable_key_format("%Y-%m-%d %H:%M:%S"));
        assert!(is_sortable_key_format("%Y%m%d%H%M"));
        assert!(is_sortable_key_format("%Y-%m-%d"));

        // Month-first keys sort December 1999 after January 2000
        assert!(!is_sortable_key_format("%m-%d-%Y %H:%M:%S"));
        // Unpadded fields change width
        assert!(!is_sortable_key_format("%Y-%-m-%-d"));
        // 12-hour clock wraps at noon
        assert!(!is_sortable_key_format("%Y-%m-%d %I:%M:%S"));

        let mut config = Configuration::default();
        config.sweep.date_format = "%m-%d-%Y %H:%M:%S".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut config = Configuration::default();
        config.tables.push(TableConfig::new("Trace", BatchingPolicy::Single));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateTable(name)) if name == "Trace"
        ));

        let mut config = Configuration::default();
        config.accounts = vec![
            AccountConfig::new("a", "UseDevelopmentStorage=true"),
            AccountConfig::new("a", "UseDevelopmentStorage=true"),
        ];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateAccount(_))
        ));
    }

    #[test]
    fn test_zero_table_retention_is_invalid() {
        let mut config = Configuration::default();
        config.tables[0].retention = Some(Duration::ZERO);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("for table 'Error'"));
    }

    #[test]
    fn test_account_debug_redacts_connection_string() {
        let account = AccountConfig::new("prod", "AccountName=x;AccountKey=secret");
        let debug = format!("{account:?}");
        assert!(!debug.contains("secret"));
    }
}
