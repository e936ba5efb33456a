//! Error types for Outlay

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::OccurrenceStatus;
use crate::recurrence::ValidationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid recurrence pattern: {}", join_errors(.0))]
    InvalidPattern(Vec<ValidationError>),

    /// The next computed date falls after the pattern's end date.
    /// Callers treat this as "no further occurrences".
    #[error("Next occurrence {date} is after the pattern end date {end_date}")]
    OutOfRange { date: NaiveDate, end_date: NaiveDate },

    #[error("Cannot change occurrence status from {from} to {to}")]
    InvalidTransition {
        from: OccurrenceStatus,
        to: OccurrenceStatus,
    },

    /// Another caller claimed the completion of this occurrence first.
    /// Recovered inside the lifecycle manager, never returned to callers.
    #[error("Occurrence {0} is already being completed")]
    DuplicateCompletion(i64),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// True for errors that mean "the pattern has no further occurrences"
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
