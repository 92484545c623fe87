//! Opens a table store for each configured account.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use common::AccountConfig;
use tablestore::{AzureTableStore, ConnectionString, MemoryTableStore, StoreError, StoreResult, TableStore};

#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, account: &AccountConfig) -> StoreResult<Arc<dyn TableStore>>;
}

/// Connects to Azure Table Storage, sharing one HTTP client across accounts.
#[derive(Debug, Clone, Default)]
pub struct AzureConnector {
    client: reqwest::Client,
}

impl AzureConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StoreConnector for AzureConnector {
    async fn connect(&self, account: &AccountConfig) -> StoreResult<Arc<dyn TableStore>> {
        let connection: ConnectionString = account.connection_string.parse()?;
        let store = AzureTableStore::with_client(&connection, self.client.clone())?;
        Ok(Arc::new(store))
    }
}

/// Hands out in-memory stores registered by account name.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    stores: HashMap<String, MemoryTableStore>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, account: &str, store: MemoryTableStore) -> Self {
        self.stores.insert(account.to_string(), store);
        self
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, account: &AccountConfig) -> StoreResult<Arc<dyn TableStore>> {
        let store = self.stores.get(&account.name).ok_or_else(|| {
            StoreError::InvalidRequest(format!("no store registered for account '{}'", account.name))
        })?;
        Ok(Arc::new(store.clone()))
    }
}
