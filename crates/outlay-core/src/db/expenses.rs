//! Expense operations: recurring definitions, concrete expenses and payments

use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use super::{parse_date_column, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Expense, ExpenseTemplate, NewRecurringExpense, Payment, RecurringExpense};
use crate::recurrence::{PatternFields, RecurrencePattern};
use crate::store::{ExpenseRepository, ExpenseService};

const RECURRING_COLUMNS: &str =
    "id, item_name, category, total_amount, recurrence_pattern, created_at";

const EXPENSE_COLUMNS: &str = "id, item_name, category, total_amount, expense_date, is_recurring, source_occurrence_id, created_at";

fn recurring_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecurringExpense> {
    let pattern_json: Option<String> = row.get(4)?;
    let created_at_str: String = row.get(5)?;

    let id: i64 = row.get(0)?;

    // An unreadable pattern loads as empty fields; the parse error goes with it
    let (pattern, pattern_error) = match pattern_json.as_deref() {
        Some(json) => match serde_json::from_str::<PatternFields>(json) {
            Ok(fields) => (fields, None),
            Err(e) => {
                warn!(expense_id = id, error = %e, "Stored recurrence pattern is not valid JSON");
                (PatternFields::default(), Some(e.to_string()))
            }
        },
        None => (PatternFields::default(), None),
    };

    Ok(RecurringExpense {
        id,
        item_name: row.get(1)?,
        category: row.get(2)?,
        total_amount: row.get(3)?,
        pattern,
        created_at: parse_datetime(&created_at_str),
        pattern_error,
    })
}

fn expense_from_row(row: &rusqlite::Row) -> rusqlite::Result<Expense> {
    let expense_date_str: Option<String> = row.get(4)?;
    let created_at_str: String = row.get(7)?;

    Ok(Expense {
        id: row.get(0)?,
        item_name: row.get(1)?,
        category: row.get(2)?,
        total_amount: row.get(3)?,
        expense_date: expense_date_str
            .map(|s| parse_date_column(4, &s))
            .transpose()?,
        is_recurring: row.get(5)?,
        source_occurrence_id: row.get(6)?,
        created_at: parse_datetime(&created_at_str),
    })
}

impl Database {
    /// Create a recurring expense definition
    pub fn create_recurring_expense(&self, expense: &NewRecurringExpense) -> Result<i64> {
        if expense.item_name.trim().is_empty() {
            return Err(Error::InvalidData("Item name is required".to_string()));
        }
        if !expense.total_amount.is_finite() || expense.total_amount < 0.0 {
            return Err(Error::InvalidData(format!(
                "Invalid amount: {}",
                expense.total_amount
            )));
        }
        expense.pattern.validate().map_err(Error::InvalidPattern)?;

        let conn = self.conn()?;
        let pattern_json = serde_json::to_string(&expense.pattern.to_fields())?;

        conn.execute(
            r#"
            INSERT INTO expenses (item_name, category, total_amount, is_recurring, frequency, recurrence_pattern)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
            params![
                expense.item_name.trim(),
                expense.category,
                expense.total_amount,
                expense.pattern.frequency().as_str(),
                pattern_json,
            ],
        )?;

        let id = conn.last_insert_rowid();
        info!(expense_id = id, item = %expense.item_name, "Created recurring expense");
        Ok(id)
    }

    /// Replace the pattern of a recurring expense
    ///
    /// Existing occurrences are left alone; the next generation run fills in
    /// dates produced by the new pattern.
    pub fn set_recurrence_pattern(&self, expense_id: i64, pattern: &RecurrencePattern) -> Result<()> {
        pattern.validate().map_err(Error::InvalidPattern)?;

        let conn = self.conn()?;
        let pattern_json = serde_json::to_string(&pattern.to_fields())?;

        let updated = conn.execute(
            r#"
            UPDATE expenses SET frequency = ?, recurrence_pattern = ?
            WHERE id = ? AND is_recurring = 1
            "#,
            params![pattern.frequency().as_str(), pattern_json, expense_id],
        )?;

        if updated == 0 {
            return Err(Error::NotFound(format!("Recurring expense {}", expense_id)));
        }
        Ok(())
    }

    /// Get a concrete or recurring expense row
    pub fn get_expense(&self, id: i64) -> Result<Option<Expense>> {
        let conn = self.conn()?;

        let expense = conn
            .query_row(
                &format!("SELECT {} FROM expenses WHERE id = ?", EXPENSE_COLUMNS),
                params![id],
                expense_from_row,
            )
            .optional()?;

        Ok(expense)
    }

    /// The expense created by completing an occurrence, if any
    pub fn get_expense_for_occurrence(&self, occurrence_id: i64) -> Result<Option<Expense>> {
        let conn = self.conn()?;

        let expense = conn
            .query_row(
                &format!(
                    "SELECT {} FROM expenses WHERE source_occurrence_id = ?",
                    EXPENSE_COLUMNS
                ),
                params![occurrence_id],
                expense_from_row,
            )
            .optional()?;

        Ok(expense)
    }

    /// Number of expenses created from an occurrence (0 or 1)
    pub fn count_expenses_for_occurrence(&self, occurrence_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM expenses WHERE source_occurrence_id = ?",
            params![occurrence_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Payments recorded against an expense, oldest first
    pub fn list_payments(&self, expense_id: i64) -> Result<Vec<Payment>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, expense_id, amount, payment_date, created_at
            FROM payments
            WHERE expense_id = ?
            ORDER BY payment_date, id
            "#,
        )?;

        let payments = stmt
            .query_map(params![expense_id], |row| {
                let payment_date_str: String = row.get(3)?;
                let created_at_str: String = row.get(4)?;
                Ok(Payment {
                    id: row.get(0)?,
                    expense_id: row.get(1)?,
                    amount: row.get(2)?,
                    payment_date: parse_date_column(3, &payment_date_str)?,
                    created_at: parse_datetime(&created_at_str),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(payments)
    }
}

impl ExpenseRepository for Database {
    fn get_recurring_expense(&self, id: i64) -> Result<Option<RecurringExpense>> {
        let conn = self.conn()?;

        let expense = conn
            .query_row(
                &format!(
                    "SELECT {} FROM expenses WHERE id = ? AND is_recurring = 1",
                    RECURRING_COLUMNS
                ),
                params![id],
                recurring_from_row,
            )
            .optional()?;

        Ok(expense)
    }

    fn list_recurring_expenses(&self) -> Result<Vec<RecurringExpense>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM expenses WHERE is_recurring = 1 ORDER BY id",
            RECURRING_COLUMNS
        ))?;

        let expenses = stmt
            .query_map([], recurring_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(expenses)
    }
}

impl ExpenseService for Database {
    fn create_expense_with_payment(&self, template: &ExpenseTemplate) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM expenses WHERE source_occurrence_id = ?",
                params![template.source_occurrence_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            debug!(
                occurrence_id = template.source_occurrence_id,
                expense_id = id,
                "Expense already recorded for occurrence"
            );
            return Ok(id);
        }

        tx.execute(
            r#"
            INSERT INTO expenses (item_name, category, total_amount, expense_date, is_recurring, source_occurrence_id)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
            params![
                template.item_name,
                template.category,
                template.total_amount,
                template.expense_date.to_string(),
                template.source_occurrence_id,
            ],
        )?;
        let expense_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO payments (expense_id, amount, payment_date) VALUES (?, ?, ?)",
            params![
                expense_id,
                template.total_amount,
                template.expense_date.to_string()
            ],
        )?;

        tx.commit()?;
        Ok(expense_id)
    }
}
