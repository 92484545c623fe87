//! Timestamp <-> partition key encoding.
//!
//! Telemetry rows are partitioned by the time they were written, rendered
//! with a fixed chrono format. Retention queries compare partition keys as
//! strings, so the format must be fixed width and sort chronologically.

use chrono::format::{self, Parsed, StrftimeItems};
use chrono::{DateTime, Utc};

use common::config::is_sortable_key_format;

use crate::error::{Result, SweepError};

pub const DEFAULT_KEY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKeyCodec {
    format: String,
}

impl Default for PartitionKeyCodec {
    fn default() -> Self {
        Self {
            format: DEFAULT_KEY_FORMAT.to_string(),
        }
    }
}

impl PartitionKeyCodec {
    /// Create a codec, rejecting formats whose keys would not sort by time.
    pub fn new(format: impl Into<String>) -> Result<Self> {
        let format = format.into();
        if !is_sortable_key_format(&format) {
            return Err(SweepError::UnsortableKeyFormat(format));
        }
        Ok(Self { format })
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn encode(&self, time: DateTime<Utc>) -> String {
        time.format(&self.format).to_string()
    }

    /// Parse a partition key back into the instant it encodes.
    ///
    /// Time fields the format does not carry default to zero, so date-only
    /// keys decode to midnight and hour keys to the top of the hour.
    pub fn decode(&self, key: &str) -> Result<DateTime<Utc>> {
        let malformed = || SweepError::MalformedPartitionKey {
            key: key.to_string(),
            format: self.format.clone(),
        };

        let mut parsed = Parsed::new();
        format::parse(&mut parsed, key, StrftimeItems::new(&self.format))
            .map_err(|_| malformed())?;

        // Setters refuse to overwrite a field the key already set
        let _ = parsed.set_hour(0);
        let _ = parsed.set_minute(0);
        let _ = parsed.set_second(0);

        parsed
            .to_naive_datetime_with_offset(0)
            .map(|naive| naive.and_utc())
            .map_err(|_| malformed())
    }
}
