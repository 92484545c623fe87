use thiserror::Error;

use crate::azure::ConnectionStringError;

/// Errors reported by a [`crate::TableStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The service rejected the request with a non-success status.
    #[error("service returned {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    /// The table addressed by the request does not exist.
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// The request never produced a response (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response could not be interpreted.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The caller asked for a batch the service would refuse.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// The account could not be reached with the configured credentials.
    #[error("invalid connection string: {0}")]
    Connection(#[from] ConnectionStringError),

    /// The request could not be built or signed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl StoreError {
    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service { status, .. } => Some(*status),
            Self::TableNotFound(_) => Some(404),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
