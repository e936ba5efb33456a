//! Outlay Core Library
//!
//! Recurring-expense occurrence engine:
//! - Recurrence patterns and their validation
//! - Next-occurrence calculation
//! - Occurrence generation over date windows
//! - Occurrence lifecycle (complete, skip, reset) with linked expenses
//! - SQLite persistence with migrations and an audit log

pub mod calculator;
pub mod db;
pub mod engine;
pub mod error;
pub mod generator;
pub mod lifecycle;
pub mod models;
pub mod recurrence;
pub mod store;

pub use calculator::{compute_next, upcoming};
pub use db::{AuditEntry, Database};
pub use engine::RecurrenceEngine;
pub use error::{Error, Result};
pub use generator::OccurrenceGenerator;
pub use lifecycle::OccurrenceLifecycleManager;
pub use models::{
    DateRange, Expense, GenerationFailure, GenerationReport, LifecycleResult, NewRecurringExpense,
    Occurrence, OccurrenceFilter, OccurrenceStatus, Payment, RecurringExpense,
};
pub use recurrence::{
    Frequency, MonthlyRecurrenceType, PatternFields, RecurrencePattern, Schedule, ValidationError,
    WeekOfMonth,
};
pub use store::{ClaimOutcome, ExpenseRepository, ExpenseService, OccurrenceStore};
