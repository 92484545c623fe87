use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use common::config::ConfigError;
use tablestore::StoreError;

/// Errors that stop a sweep before any job is dispatched.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("invalid range: end {end} is not after start {start}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("invalid slot span {0:?}: must be positive")]
    InvalidSlotSpan(Duration),

    #[error("range {start} .. {end} needs more than {max} slots of {span:?}")]
    TooManySlots {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        span: Duration,
        max: usize,
    },

    #[error("invalid retention period {0:?}")]
    InvalidRetention(Duration),

    #[error("invalid page size {0}: must be between 1 and {max}", max = tablestore::MAX_PAGE_SIZE)]
    InvalidPageSize(usize),

    #[error("partition key '{key}' does not match format '{format}'")]
    MalformedPartitionKey { key: String, format: String },

    #[error("partition key format '{0}' is not fixed width and chronologically sortable")]
    UnsortableKeyFormat(String),

    #[error("no storage accounts configured")]
    NoAccounts,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SweepError>;

/// How the job loop reacts to a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The row is already gone; counts as done.
    NotFound,
    /// Worth trying again: queries are retried with backoff, failed deletes
    /// are picked up again by the next page.
    Transient,
    /// Retrying cannot help. A query failing this way ends the job; a delete
    /// failing this way is still only logged.
    Fatal,
}

/// Classify a store error.
///
/// Rejected credentials, a missing table and requests the service would
/// never accept are fatal. Everything else, including malformed responses,
/// is transient.
pub fn classify(error: &StoreError) -> ErrorClass {
    match error {
        StoreError::Service { status: 404, .. } => ErrorClass::NotFound,
        StoreError::Service {
            status: 401 | 403, ..
        } => ErrorClass::Fatal,
        StoreError::Service { .. } => ErrorClass::Transient,
        StoreError::TableNotFound(_) => ErrorClass::Fatal,
        StoreError::Transport(e) => match e.status().map(|s| s.as_u16()) {
            Some(401 | 403) => ErrorClass::Fatal,
            _ => ErrorClass::Transient,
        },
        StoreError::MalformedResponse(_) => ErrorClass::Transient,
        StoreError::Connection(_)
        | StoreError::InvalidBatch(_)
        | StoreError::InvalidRequest(_) => ErrorClass::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(status: u16) -> StoreError {
        StoreError::Service {
            status,
            code: "Code".to_string(),
            message: "message".to_string(),
        }
    }

    #[test]
    fn test_classify_service_errors() {
        assert_eq!(classify(&service(404)), ErrorClass::NotFound);
        assert_eq!(classify(&service(403)), ErrorClass::Fatal);
        assert_eq!(classify(&service(401)), ErrorClass::Fatal);
        assert_eq!(classify(&service(503)), ErrorClass::Transient);
        assert_eq!(classify(&service(500)), ErrorClass::Transient);
        assert_eq!(classify(&service(429)), ErrorClass::Transient);
        assert_eq!(classify(&service(408)), ErrorClass::Transient);
        assert_eq!(classify(&service(412)), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_other_errors() {
        assert_eq!(
            classify(&StoreError::TableNotFound("Trace".to_string())),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&StoreError::MalformedResponse("truncated".to_string())),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&StoreError::InvalidBatch("empty".to_string())),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_invalid_range_message() {
        let start = DateTime::parse_from_rfc3339("2016-01-18T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let err = SweepError::InvalidRange { start, end: start };
        assert!(err.to_string().starts_with("invalid range"));
    }
}
