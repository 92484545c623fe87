//! Test configuration builder for creating sweep setups quickly.

use std::time::Duration;

use crate::config::{AccountConfig, BatchingPolicy, Configuration, TableConfig};

/// Connection string of the local storage emulator.
pub const DEV_CONNECTION_STRING: &str = "UseDevelopmentStorage=true";

/// Builder for creating test configurations.
///
/// Starts from [`Configuration::default`] (the six telemetry tables, no
/// accounts) with a short retry delay so failing queries do not slow tests.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_account("eu")
///     .with_account("us")
///     .retention(Duration::from_secs(60 * 86400))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.sweep.retry_base_delay = Duration::from_millis(1);
        Self { config }
    }

    /// Add an account pointing at the local emulator.
    pub fn with_account(self, name: &str) -> Self {
        self.with_account_connection(name, DEV_CONNECTION_STRING)
    }

    pub fn with_account_connection(mut self, name: &str, connection_string: &str) -> Self {
        self.config
            .accounts
            .push(AccountConfig::new(name, connection_string));
        self
    }

    /// Drop the default table list.
    pub fn without_tables(mut self) -> Self {
        self.config.tables.clear();
        self
    }

    /// Add a table, replacing any existing table of the same name.
    pub fn with_table(mut self, name: &str, batching: BatchingPolicy) -> Self {
        self.config.tables.retain(|t| t.name != name);
        self.config.tables.push(TableConfig::new(name, batching));
        self
    }

    /// Override the retention of one table.
    pub fn with_table_retention(mut self, name: &str, retention: Duration) -> Self {
        if let Some(table) = self.config.tables.iter_mut().find(|t| t.name == name) {
            table.retention = Some(retention);
        }
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.sweep.retention = retention;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.sweep.page_size = page_size;
        self
    }

    pub fn max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.config.sweep.max_concurrent_jobs = jobs;
        self
    }

    pub fn slot_span(mut self, span: Duration) -> Self {
        self.config.sweep.slot_span = span;
        self
    }

    pub fn max_query_retries(mut self, retries: u32) -> Self {
        self.config.sweep.max_query_retries = retries;
        self
    }

    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.config.sweep.run_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = TestConfigBuilder::new().build();
        assert!(config.accounts.is_empty());
        assert_eq!(config.tables.len(), 6);
        assert_eq!(config.sweep.retry_base_delay, Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_accounts_and_tables() {
        let config = TestConfigBuilder::new()
            .with_account("eu")
            .with_account("us")
            .without_tables()
            .with_table("Trace", BatchingPolicy::Batch)
            .with_table_retention("Trace", Duration::from_secs(86400))
            .page_size(10)
            .build();

        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[1].connection_string, DEV_CONNECTION_STRING);
        assert_eq!(config.tables.len(), 1);
        assert_eq!(config.tables[0].retention, Some(Duration::from_secs(86400)));
        assert_eq!(config.sweep.page_size, 10);
    }

    #[test]
    fn test_with_table_replaces_existing() {
        let config = TestConfigBuilder::new()
            .with_table("Error", BatchingPolicy::Batch)
            .build();

        assert_eq!(config.tables.len(), 6);
        assert_eq!(
            config.table("Error").unwrap().batching,
            BatchingPolicy::Batch
        );
    }
}
