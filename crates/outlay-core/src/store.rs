//! Collaborator boundaries used by the engine
//!
//! The engine reads recurring expenses through [`ExpenseRepository`], records
//! completed occurrences through [`ExpenseService`] and persists occurrences
//! through [`OccurrenceStore`]. [`crate::db::Database`] implements all three.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::models::{
    DateRange, ExpenseTemplate, NewOccurrence, Occurrence, OccurrenceFilter, OccurrenceStatus,
    RecurringExpense,
};

/// Read access to recurring expense definitions
pub trait ExpenseRepository: Send + Sync {
    fn get_recurring_expense(&self, id: i64) -> Result<Option<RecurringExpense>>;

    fn list_recurring_expenses(&self) -> Result<Vec<RecurringExpense>>;
}

/// Creates concrete expense records
pub trait ExpenseService: Send + Sync {
    /// Create an expense with a single full payment dated `template.expense_date`
    ///
    /// Implementations must return the existing expense id when an expense for
    /// `template.source_occurrence_id` already exists.
    fn create_expense_with_payment(&self, template: &ExpenseTemplate) -> Result<i64>;
}

/// What an attempt to claim an occurrence for completion found
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the completion and must create the linked expense
    Claimed(Occurrence),
    /// A linked expense already exists; the occurrence is (now) completed
    AlreadyLinked(Occurrence),
    /// The occurrence is in a state that cannot be claimed
    Unavailable(Occurrence),
}

/// Persistence for occurrence records
pub trait OccurrenceStore: Send + Sync {
    fn get(&self, id: i64) -> Result<Option<Occurrence>>;

    fn find(&self, parent_expense_id: i64, occurrence_date: NaiveDate)
        -> Result<Option<Occurrence>>;

    /// Insert a pending occurrence; `None` when one already exists for the key
    fn insert(&self, occurrence: NewOccurrence) -> Result<Option<Occurrence>>;

    /// Compare-and-set status change; returns false when the current status
    /// is not `expected`
    fn update_status(
        &self,
        id: i64,
        expected: OccurrenceStatus,
        status: OccurrenceStatus,
        completed_date: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    fn list_by_date_range(
        &self,
        window: DateRange,
        filter: OccurrenceFilter,
    ) -> Result<Vec<Occurrence>>;

    /// Atomically move a pending, unlinked occurrence to completed
    fn claim_completion(&self, id: i64, completed_at: DateTime<Utc>) -> Result<ClaimOutcome>;

    /// Set the linked expense if none is set yet; returns the stored occurrence
    fn attach_linked_expense(&self, id: i64, expense_id: i64) -> Result<Occurrence>;

    /// Undo a claim whose expense could not be created
    fn release_claim(&self, id: i64) -> Result<()>;
}
