//! Domain models for Outlay

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::recurrence::{PatternFields, RecurrencePattern};

/// A recurring expense definition, owned by the expense CRUD layer
///
/// The pattern is kept in its stored (flat) form: a definition saved before a
/// validation rule existed may not validate, and generation must report that
/// for this expense alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringExpense {
    pub id: i64,
    pub item_name: String,
    pub category: Option<String>,
    pub total_amount: f64,
    pub pattern: PatternFields,
    pub created_at: DateTime<Utc>,
    /// Why the stored pattern could not be read, if it could not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_error: Option<String>,
}

impl RecurringExpense {
    /// The validated recurrence pattern
    pub fn recurrence(&self) -> Result<RecurrencePattern> {
        if let Some(reason) = &self.pattern_error {
            return Err(Error::InvalidData(format!(
                "Stored recurrence pattern is unreadable: {}",
                reason
            )));
        }
        crate::recurrence::validate(&self.pattern).map_err(Error::InvalidPattern)
    }
}

/// Input for creating a recurring expense
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecurringExpense {
    pub item_name: String,
    pub category: Option<String>,
    pub total_amount: f64,
    pub pattern: RecurrencePattern,
}

/// A concrete expense record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    pub item_name: String,
    pub category: Option<String>,
    pub total_amount: f64,
    pub expense_date: Option<NaiveDate>,
    pub is_recurring: bool,
    /// Set when the expense was created by completing an occurrence
    pub source_occurrence_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A payment recorded against an expense
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub expense_id: i64,
    pub amount: f64,
    pub payment_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Everything the expense service needs to record a completed occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseTemplate {
    pub item_name: String,
    pub category: Option<String>,
    pub total_amount: f64,
    pub expense_date: NaiveDate,
    /// Idempotency key: one expense per occurrence
    pub source_occurrence_id: i64,
}

impl ExpenseTemplate {
    /// Mirror a recurring expense for one occurrence date
    pub fn for_occurrence(parent: &RecurringExpense, occurrence: &Occurrence) -> Self {
        Self {
            item_name: parent.item_name.clone(),
            category: parent.category.clone(),
            total_amount: parent.total_amount,
            expense_date: occurrence.occurrence_date,
            source_occurrence_id: occurrence.id,
        }
    }
}

/// Occurrence tracking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccurrenceStatus {
    Pending,
    Completed,
    Skipped,
}

impl OccurrenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        }
    }

    /// Whether a direct transition to `to` is allowed
    ///
    /// Completed and skipped only move back to pending; switching between them
    /// requires a reset first.
    pub fn can_transition_to(&self, to: OccurrenceStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Skipped)
                | (Self::Completed, Self::Pending)
                | (Self::Skipped, Self::Pending)
        )
    }
}

impl std::str::FromStr for OccurrenceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Unknown occurrence status: {}", s)),
        }
    }
}

impl std::fmt::Display for OccurrenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One dated instance of a recurring expense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: i64,
    pub parent_expense_id: i64,
    pub occurrence_date: NaiveDate,
    pub status: OccurrenceStatus,
    /// Expense created when this occurrence was completed; never cleared
    pub linked_expense_id: Option<i64>,
    pub completed_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for materializing an occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOccurrence {
    pub parent_expense_id: i64,
    pub occurrence_date: NaiveDate,
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting an end before the start
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidData(format!(
                "Date range end {} is before start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// `start ..= start + days`, so `days + 1` dates
    pub fn starting_at(start: NaiveDate, days: u32) -> Result<Self> {
        let end = start
            .checked_add_days(chrono::Days::new(u64::from(days)))
            .ok_or_else(|| Error::InvalidData(format!("Range of {} days overflows", days)))?;
        Self::new(start, end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Optional filters for listing occurrences
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceFilter {
    pub status: Option<OccurrenceStatus>,
    pub parent_expense_id: Option<i64>,
}

/// Outcome of a status change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleResult {
    pub occurrence_id: i64,
    pub previous_status: OccurrenceStatus,
    pub status: OccurrenceStatus,
    pub linked_expense_id: Option<i64>,
    pub completed_date: Option<DateTime<Utc>>,
    /// True only when this call created the linked expense
    pub expense_created: bool,
    /// Human-readable summary for notifications
    pub summary: String,
}

/// A recurring expense whose generation failed during a batch run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationFailure {
    pub expense_id: i64,
    pub error: String,
}

/// Result of a batch generation run
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub window: DateRange,
    pub expenses_processed: usize,
    pub generated: Vec<Occurrence>,
    pub errors: Vec<GenerationFailure>,
}
