//! Row mapping helpers shared by the repository implementations.

use chrono::{DateTime, Utc};

use crate::domain::errors::DomainError;

/// Parse an RFC 3339 timestamp stored as TEXT.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("bad timestamp {s:?}: {e}")))
}

/// Parse an optional TEXT timestamp column.
pub fn parse_opt_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, DomainError> {
    s.map(parse_datetime).transpose()
}
