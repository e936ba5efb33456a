//! The recurrence engine facade used by the CLI, the REST API and the scheduler

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::calculator::upcoming;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::generator::OccurrenceGenerator;
use crate::lifecycle::OccurrenceLifecycleManager;
use crate::models::{
    DateRange, GenerationFailure, GenerationReport, LifecycleResult, Occurrence, OccurrenceFilter,
    OccurrenceStatus, RecurringExpense,
};
use crate::recurrence::{validate, PatternFields, RecurrencePattern};
use crate::store::{ExpenseRepository, ExpenseService, OccurrenceStore};

/// Stateless entry point over the expense and occurrence stores
#[derive(Clone)]
pub struct RecurrenceEngine {
    expenses: Arc<dyn ExpenseRepository>,
    occurrences: Arc<dyn OccurrenceStore>,
    lifecycle: Arc<OccurrenceLifecycleManager>,
    db: Option<Database>,
}

impl RecurrenceEngine {
    /// Engine backed entirely by one database
    pub fn new(db: Database) -> Self {
        let shared = Arc::new(db.clone());
        let mut engine = Self::with_backends(shared.clone(), shared.clone(), shared);
        engine.db = Some(db);
        engine
    }

    /// Engine over arbitrary collaborators
    pub fn with_backends(
        expenses: Arc<dyn ExpenseRepository>,
        occurrences: Arc<dyn OccurrenceStore>,
        ledger: Arc<dyn ExpenseService>,
    ) -> Self {
        let lifecycle = Arc::new(OccurrenceLifecycleManager::new(
            occurrences.clone(),
            expenses.clone(),
            ledger,
        ));
        Self {
            expenses,
            occurrences,
            lifecycle,
            db: None,
        }
    }

    /// Materialize pending occurrences for every recurring expense in `window`
    ///
    /// Each expense is processed on its own: an invalid pattern or a store
    /// failure is recorded in the report and the batch continues.
    pub fn generate_occurrences(&self, window: DateRange) -> Result<GenerationReport> {
        let expenses = self.expenses.list_recurring_expenses()?;
        let generator = OccurrenceGenerator::new(self.occurrences.as_ref());

        let mut report = GenerationReport {
            window,
            expenses_processed: expenses.len(),
            generated: Vec::new(),
            errors: Vec::new(),
        };

        for expense in &expenses {
            match generate_one(&generator, expense, window) {
                Ok(created) => report.generated.extend(created),
                Err(e) => {
                    warn!(expense_id = expense.id, error = %e, "Occurrence generation failed");
                    report.errors.push(GenerationFailure {
                        expense_id: expense.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            window = %window,
            expenses = report.expenses_processed,
            generated = report.generated.len(),
            failed = report.errors.len(),
            "Occurrence generation complete"
        );

        Ok(report)
    }

    /// Generate occurrences for a single recurring expense
    pub fn generate_for_expense(&self, expense_id: i64, window: DateRange) -> Result<Vec<Occurrence>> {
        let expense = self.recurring_expense(expense_id)?;
        let generator = OccurrenceGenerator::new(self.occurrences.as_ref());
        generate_one(&generator, &expense, window)
    }

    /// Complete, skip or reset an occurrence
    pub fn set_occurrence_status(
        &self,
        occurrence_id: i64,
        status: OccurrenceStatus,
    ) -> Result<LifecycleResult> {
        self.lifecycle.update_status(occurrence_id, status)
    }

    pub fn list_occurrences(
        &self,
        window: DateRange,
        filter: OccurrenceFilter,
    ) -> Result<Vec<Occurrence>> {
        self.occurrences.list_by_date_range(window, filter)
    }

    pub fn get_occurrence(&self, occurrence_id: i64) -> Result<Occurrence> {
        self.occurrences
            .get(occurrence_id)?
            .ok_or_else(|| Error::NotFound(format!("Occurrence {}", occurrence_id)))
    }

    pub fn recurring_expense(&self, expense_id: i64) -> Result<RecurringExpense> {
        self.expenses
            .get_recurring_expense(expense_id)?
            .ok_or_else(|| Error::NotFound(format!("Recurring expense {}", expense_id)))
    }

    /// Next `count` dates a pattern produces after `after`
    pub fn preview(
        &self,
        fields: &PatternFields,
        after: NaiveDate,
        count: usize,
    ) -> Result<Vec<NaiveDate>> {
        let pattern = validate(fields).map_err(Error::InvalidPattern)?;
        upcoming(&pattern, after, count)
    }

    /// Validate and persist a new pattern for a recurring expense
    ///
    /// Only available on a database-backed engine.
    pub fn save_pattern(&self, expense_id: i64, fields: &PatternFields) -> Result<RecurrencePattern> {
        let pattern = validate(fields).map_err(Error::InvalidPattern)?;
        let db = self.db.as_ref().ok_or_else(|| {
            Error::InvalidData("Saving patterns requires a database-backed engine".to_string())
        })?;
        db.set_recurrence_pattern(expense_id, &pattern)?;
        info!(expense_id, pattern = %pattern.describe(), "Recurrence pattern saved");
        Ok(pattern)
    }
}

fn generate_one(
    generator: &OccurrenceGenerator<'_>,
    expense: &RecurringExpense,
    window: DateRange,
) -> Result<Vec<Occurrence>> {
    let pattern = expense.recurrence()?;
    generator.generate(expense, &pattern, window)
}
