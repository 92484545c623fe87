//! Azure Table Storage REST backend.
//!
//! Speaks the table service's OData JSON dialect directly over `reqwest`:
//! queries use `$filter`, `$select` and `$top` and follow continuation
//! tokens; deletes carry `If-Match: *`; batch deletes are sent as a single
//! multipart change set to `$batch`. Requests are authenticated with
//! SharedKeyLite.

pub mod auth;
pub mod batch;
pub mod connection;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

pub use auth::SharedKeyLite;
pub use connection::{ConnectionString, ConnectionStringError};

use crate::{
    BatchStatus, DeleteStatus, RowId, StoreError, StoreResult, TableQuery, TableStore,
    validate_batch,
};

const API_VERSION: &str = "2019-02-02";
const ACCEPT_NO_METADATA: &str = "application/json;odata=nometadata";
const DATA_SERVICE_VERSION: &str = "3.0;NetFx";
const NEXT_PARTITION_KEY_HEADER: &str = "x-ms-continuation-NextPartitionKey";
const NEXT_ROW_KEY_HEADER: &str = "x-ms-continuation-NextRowKey";

/// Where the service stopped a query segment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Continuation {
    next_partition_key: String,
    next_row_key: Option<String>,
}

impl Continuation {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Some(Self {
            next_partition_key: header(NEXT_PARTITION_KEY_HEADER)?,
            next_row_key: header(NEXT_ROW_KEY_HEADER),
        })
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    value: Vec<RowId>,
}

/// Table store backed by an Azure storage account.
#[derive(Debug, Clone)]
pub struct AzureTableStore {
    client: reqwest::Client,
    endpoint: Url,
    signer: SharedKeyLite,
}

impl AzureTableStore {
    pub fn new(connection: &ConnectionString) -> Result<Self, ConnectionStringError> {
        Self::with_client(connection, reqwest::Client::new())
    }

    pub fn with_client(
        connection: &ConnectionString,
        client: reqwest::Client,
    ) -> Result<Self, ConnectionStringError> {
        Ok(Self {
            client,
            endpoint: connection.table_endpoint.clone(),
            signer: SharedKeyLite::new(&connection.account_name, &connection.account_key)?,
        })
    }

    pub fn from_connection_string(connection: &str) -> Result<Self, ConnectionStringError> {
        Self::new(&connection.parse()?)
    }

    /// Endpoint with one extra path segment appended.
    fn resource_url(&self, segment: &str) -> StoreResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                StoreError::InvalidRequest(format!("endpoint '{}' cannot be a base", self.endpoint))
            })?
            .pop_if_empty()
            .push(segment);
        Ok(url)
    }

    fn entity_url(&self, table: &str, row: &RowId) -> StoreResult<Url> {
        self.resource_url(&format!(
            "{table}(PartitionKey='{}',RowKey='{}')",
            escape_key(&row.partition_key),
            escape_key(&row.row_key)
        ))
    }

    fn query_url(
        &self,
        table: &str,
        query: &TableQuery,
        top: usize,
        continuation: Option<&Continuation>,
    ) -> StoreResult<Url> {
        let mut url = self.resource_url(&format!("{table}()"))?;
        let mut params = format!(
            "$filter={}&$select={}&$top={top}",
            encode_query_value(&query.filter_string()),
            encode_query_value(&query.select.join(",")),
        );
        if let Some(next) = continuation {
            params.push_str("&NextPartitionKey=");
            params.push_str(&encode_query_value(&next.next_partition_key));
            if let Some(row_key) = &next.next_row_key {
                params.push_str("&NextRowKey=");
                params.push_str(&encode_query_value(row_key));
            }
        }
        url.set_query(Some(&params));
        Ok(url)
    }

    /// Fetch one query segment and the continuation the service handed back.
    async fn query_segment(
        &self,
        table: &str,
        url: &Url,
    ) -> StoreResult<(Vec<RowId>, Option<Continuation>)> {
        let response = self
            .request(Method::GET, url)?
            .header("Accept", ACCEPT_NO_METADATA)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(service_error(table, response).await);
        }

        let continuation = Continuation::from_headers(response.headers());
        let body = response.text().await?;
        let segment: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| StoreError::MalformedResponse(format!("query response: {e}")))?;
        Ok((segment.value, continuation))
    }

    fn request(&self, method: Method, url: &Url) -> StoreResult<RequestBuilder> {
        let date = SharedKeyLite::format_date(Utc::now());
        let authorization = self.signer.authorization(&date, url)?;

        Ok(self
            .client
            .request(method, url.clone())
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("DataServiceVersion", DATA_SERVICE_VERSION)
            .header("MaxDataServiceVersion", DATA_SERVICE_VERSION)
            .header("Authorization", authorization))
    }
}

#[async_trait]
impl TableStore for AzureTableStore {
    /// Collect up to `query.take` rows.
    ///
    /// The service may end a segment early, even with no rows at all, and
    /// hand back a continuation token. Segments are followed until the page
    /// is full or no token comes back.
    async fn query(&self, table: &str, query: &TableQuery) -> StoreResult<Vec<RowId>> {
        let mut rows = Vec::with_capacity(query.take);
        let mut continuation: Option<Continuation> = None;

        loop {
            let url = self.query_url(
                table,
                query,
                query.take - rows.len(),
                continuation.as_ref(),
            )?;
            let (segment, next) = self.query_segment(table, &url).await?;
            rows.extend(segment);

            match next {
                Some(next) if rows.len() < query.take => {
                    if continuation.as_ref() == Some(&next) {
                        return Err(StoreError::MalformedResponse(format!(
                            "continuation token '{}' repeated",
                            next.next_partition_key
                        )));
                    }
                    debug!(
                        table = %table,
                        rows = rows.len(),
                        next_partition_key = %next.next_partition_key,
                        "Following query continuation"
                    );
                    continuation = Some(next);
                }
                _ => {
                    rows.truncate(query.take);
                    return Ok(rows);
                }
            }
        }
    }

    async fn delete_row(&self, table: &str, row: &RowId) -> StoreResult<DeleteStatus> {
        let url = self.entity_url(table, row)?;
        let response = self
            .request(Method::DELETE, &url)?
            .header("Accept", ACCEPT_NO_METADATA)
            .header("If-Match", "*")
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(DeleteStatus::Deleted);
        }

        match service_error(table, response).await {
            StoreError::Service { status: 404, .. } => Ok(DeleteStatus::NotFound),
            other => Err(other),
        }
    }

    async fn delete_batch(&self, table: &str, rows: &[RowId]) -> StoreResult<BatchStatus> {
        validate_batch(rows)?;

        let entity_urls = rows
            .iter()
            .map(|row| self.entity_url(table, row))
            .collect::<StoreResult<Vec<_>>>()?;

        let batch_boundary = format!("batch_{}", uuid::Uuid::new_v4());
        let changeset_boundary = format!("changeset_{}", uuid::Uuid::new_v4());
        let body = batch::delete_body(&batch_boundary, &changeset_boundary, &entity_urls);

        let url = self.resource_url("$batch")?;
        let response = self
            .request(Method::POST, &url)?
            .header(
                "Content-Type",
                format!("multipart/mixed; boundary={batch_boundary}"),
            )
            .body(body)
            .send()
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(service_error(table, response).await);
        }

        batch::parse_response(&response.text().await?)
    }
}

/// Quote escaping for key literals inside an entity address.
fn escape_key(key: &str) -> String {
    key.replace('\'', "''")
}

/// Percent-encode a query parameter value, spaces as `%20`.
fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Turn a non-success response into a [`StoreError`].
async fn service_error(table: &str, response: Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    let (code, message) = serde_json::from_str::<Value>(&body)
        .ok()
        .map(|value| {
            let error = &value["odata.error"];
            (
                error["code"].as_str().unwrap_or_default().to_string(),
                error["message"]["value"]
                    .as_str()
                    .unwrap_or_default()
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            )
        })
        .unwrap_or_default();

    debug!(table = %table, status, code = %code, "Table service rejected request");

    if code == "TableNotFound" {
        return StoreError::TableNotFound(table.to_string());
    }

    StoreError::Service {
        status,
        code,
        message: if message.is_empty() { body } else { message },
    }
}
