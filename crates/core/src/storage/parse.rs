//! Database value parsing utilities
//!
//! Provides error-safe parsing of stored values.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Error as SqlError;
use uuid::Uuid;

use crate::models::{Competence, EstimationType, VotingState};

fn conversion_error(column: usize, message: String) -> SqlError {
    SqlError::FromSqlConversionFailure(column, Type::Text, message.into())
}

/// Parse a UUID from a database string column
pub fn parse_uuid(s: &str) -> Result<Uuid, SqlError> {
    Uuid::parse_str(s).map_err(|e| SqlError::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Parse an optional UUID from a database string column
pub fn parse_uuid_opt(s: Option<String>) -> Result<Option<Uuid>, SqlError> {
    s.map(|s| parse_uuid(&s)).transpose()
}

/// Format a timestamp for storage
///
/// Fixed microsecond precision keeps textual order equal to time order.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SqlError::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Parse a competence tag
pub fn parse_competence(s: &str) -> Result<Competence, SqlError> {
    s.parse::<Competence>()
        .map_err(|e| conversion_error(0, e.to_string()))
}

/// Parse a stored voting state
pub fn parse_voting_state(s: &str) -> Result<VotingState, SqlError> {
    VotingState::parse(s).ok_or_else(|| conversion_error(0, format!("unknown voting state {s}")))
}

/// Parse a stored estimation type
pub fn parse_estimation_type(s: &str) -> Result<EstimationType, SqlError> {
    EstimationType::parse(s)
        .ok_or_else(|| conversion_error(0, format!("unknown estimation type {s}")))
}

/// Extension trait for converting rusqlite Results to Option
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
