//! Storage account connection strings.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_TABLE_ENDPOINT: &str = "http://127.0.0.1:10002/devstoreaccount1";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Errors raised while parsing a connection string.
#[derive(Debug, Error)]
pub enum ConnectionStringError {
    #[error("connection string segment '{0}' is not a key=value pair")]
    MalformedSegment(String),

    #[error("connection string is missing '{0}'")]
    MissingField(&'static str),

    #[error("invalid table endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },

    #[error("account key is not valid base64: {0}")]
    InvalidKey(#[from] base64::DecodeError),
}

/// Parsed storage account connection string.
///
/// Accepts the `DefaultEndpointsProtocol=…;AccountName=…;AccountKey=…` form
/// with optional `EndpointSuffix` and `TableEndpoint`, and the
/// `UseDevelopmentStorage=true` shorthand for the local emulator.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: String,
    pub account_key: String,
    pub table_endpoint: Url,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .field("table_endpoint", &self.table_endpoint.as_str())
            .finish()
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ConnectionStringError> {
    Url::parse(endpoint).map_err(|source| ConnectionStringError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        source,
    })
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut protocol = None;
        let mut account_name = None;
        let mut account_key = None;
        let mut endpoint_suffix = None;
        let mut table_endpoint = None;
        let mut development = false;

        for segment in s.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            // Account keys are base64 and may end in '=', so split once.
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::MalformedSegment(segment.to_string()))?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "defaultendpointsprotocol" => protocol = Some(value.to_string()),
                "accountname" => account_name = Some(value.to_string()),
                "accountkey" => account_key = Some(value.to_string()),
                "endpointsuffix" => endpoint_suffix = Some(value.to_string()),
                "tableendpoint" => table_endpoint = Some(value.to_string()),
                "usedevelopmentstorage" => development = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if development {
            return Ok(Self {
                account_name: DEV_ACCOUNT_NAME.to_string(),
                account_key: DEV_ACCOUNT_KEY.to_string(),
                table_endpoint: parse_endpoint(
                    table_endpoint.as_deref().unwrap_or(DEV_TABLE_ENDPOINT),
                )?,
            });
        }

        let account_name = account_name
            .filter(|name| !name.is_empty())
            .ok_or(ConnectionStringError::MissingField("AccountName"))?;
        let account_key = account_key
            .filter(|key| !key.is_empty())
            .ok_or(ConnectionStringError::MissingField("AccountKey"))?;

        let table_endpoint = match table_endpoint {
            Some(endpoint) => parse_endpoint(&endpoint)?,
            None => parse_endpoint(&format!(
                "{}://{}.table.{}",
                protocol.as_deref().unwrap_or("https"),
                account_name,
                endpoint_suffix.as_deref().unwrap_or(DEFAULT_ENDPOINT_SUFFIX)
            ))?,
        };

        Ok(Self {
            account_name,
            account_key,
            table_endpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standard_connection_string() {
        let conn: ConnectionString =
            "DefaultEndpointsProtocol=https;AccountName=telemetry;AccountKey=a2V5a2V5==;"
                .parse()
                .unwrap();

        assert_eq!(conn.account_name, "telemetry");
        assert_eq!(conn.account_key, "a2V5a2V5==");
        assert_eq!(
            conn.table_endpoint.as_str(),
            "https://telemetry.table.core.windows.net/"
        );
    }

    #[test]
    fn test_parse_explicit_endpoint_and_suffix() {
        let conn: ConnectionString =
            "AccountName=t;AccountKey=aw==;EndpointSuffix=core.chinacloudapi.cn"
                .parse()
                .unwrap();
        assert_eq!(
            conn.table_endpoint.as_str(),
            "https://t.table.core.chinacloudapi.cn/"
        );

        let conn: ConnectionString =
            "AccountName=t;AccountKey=aw==;TableEndpoint=http://localhost:8080/t"
                .parse()
                .unwrap();
        assert_eq!(conn.table_endpoint.as_str(), "http://localhost:8080/t");
    }

    #[test]
    fn test_parse_development_storage() {
        let conn: ConnectionString = "UseDevelopmentStorage=true".parse().unwrap();
        assert_eq!(conn.account_name, DEV_ACCOUNT_NAME);
        assert_eq!(conn.table_endpoint.as_str(), DEV_TABLE_ENDPOINT);
    }

    #[test]
    fn test_missing_fields() {
        let err = "DefaultEndpointsProtocol=https;AccountName=;AccountKey="
            .parse::<ConnectionString>()
            .unwrap_err();
        assert!(matches!(err, ConnectionStringError::MissingField("AccountName")));

        let err = "AccountName=t".parse::<ConnectionString>().unwrap_err();
        assert!(matches!(err, ConnectionStringError::MissingField("AccountKey")));

        let err = "AccountName".parse::<ConnectionString>().unwrap_err();
        assert!(matches!(err, ConnectionStringError::MalformedSegment(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let conn: ConnectionString = "AccountName=t;AccountKey=c2VjcmV0".parse().unwrap();
        let debug = format!("{conn:?}");
        assert!(!debug.contains("c2VjcmV0"));
        assert!(debug.contains("<redacted>"));
    }
}
