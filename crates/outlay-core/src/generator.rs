//! Occurrence materialization over a date window

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::calculator::compute_next;
use crate::error::{Error, Result};
use crate::models::{DateRange, NewOccurrence, Occurrence, RecurringExpense};
use crate::recurrence::RecurrencePattern;
use crate::store::OccurrenceStore;

/// Upper bound on dates walked for one expense in one run
pub const MAX_OCCURRENCES_PER_RUN: usize = 3660;

/// Creates the pending occurrences a recurring expense owes within a window
pub struct OccurrenceGenerator<'a> {
    store: &'a dyn OccurrenceStore,
    max_per_run: usize,
}

impl<'a> OccurrenceGenerator<'a> {
    pub fn new(store: &'a dyn OccurrenceStore) -> Self {
        Self {
            store,
            max_per_run: MAX_OCCURRENCES_PER_RUN,
        }
    }

    pub fn with_max_per_run(mut self, max_per_run: usize) -> Self {
        self.max_per_run = max_per_run;
        self
    }

    /// Dates the pattern produces within the window, in order
    ///
    /// The first candidate is the first occurrence on or after
    /// `max(start_date, window.start)`; the walk stops past
    /// `min(window.end, end_date)`.
    pub fn due_dates(&self, pattern: &RecurrencePattern, window: DateRange) -> Result<Vec<NaiveDate>> {
        pattern.validate().map_err(Error::InvalidPattern)?;

        let lower = pattern.start_date.max(window.start);
        let limit = match pattern.end_date {
            Some(end_date) => end_date.min(window.end),
            None => window.end,
        };

        let mut dates = Vec::new();
        if lower > limit {
            return Ok(dates);
        }

        let mut cursor = match lower.pred_opt() {
            Some(day_before) => day_before,
            None => return Ok(dates),
        };

        loop {
            let next = match compute_next(pattern, cursor) {
                Ok(next) => next,
                Err(e) if e.is_out_of_range() => break,
                Err(e) => return Err(e),
            };
            if next > limit {
                break;
            }
            if dates.len() >= self.max_per_run {
                warn!(
                    window = %window,
                    cap = self.max_per_run,
                    "Occurrence cap reached; remaining dates left for a later run"
                );
                break;
            }
            dates.push(next);
            cursor = next;
        }

        Ok(dates)
    }

    /// Create missing pending occurrences for one expense
    ///
    /// Existing occurrences are left untouched, whatever their status, so the
    /// same or overlapping windows can be generated any number of times.
    /// Returns only the occurrences created by this call.
    pub fn generate(
        &self,
        expense: &RecurringExpense,
        pattern: &RecurrencePattern,
        window: DateRange,
    ) -> Result<Vec<Occurrence>> {
        let mut created = Vec::new();

        for date in self.due_dates(pattern, window)? {
            if self.store.find(expense.id, date)?.is_some() {
                continue;
            }

            // A concurrent run may insert between find and insert; the store
            // reports that as None
            let new = NewOccurrence {
                parent_expense_id: expense.id,
                occurrence_date: date,
            };
            if let Some(occurrence) = self.store.insert(new)? {
                debug!(
                    expense_id = expense.id,
                    occurrence_id = occurrence.id,
                    date = %date,
                    "Created pending occurrence"
                );
                created.push(occurrence);
            }
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::NewRecurringExpense;
    use crate::recurrence::Schedule;
    use crate::store::ExpenseRepository;
    use chrono::Weekday;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weekly_friday() -> RecurrencePattern {
        RecurrencePattern::new(
            date(2024, 1, 5),
            Schedule::Weekly {
                day_of_week: Weekday::Fri,
            },
        )
    }

    #[test]
    fn test_due_dates_includes_start_date() {
        let db = Database::in_memory().unwrap();
        let generator = OccurrenceGenerator::new(&db);
        let window = DateRange::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();

        let dates = generator.due_dates(&weekly_friday(), window).unwrap();
        assert_eq!(
            dates,
            vec![
                date(2024, 1, 5),
                date(2024, 1, 12),
                date(2024, 1, 19),
                date(2024, 1, 26)
            ]
        );
        assert!(dates.windows(2).all(|w| (w[1] - w[0]).num_days() == 7));
    }

    #[test]
    fn test_due_dates_window_before_start_is_empty() {
        let db = Database::in_memory().unwrap();
        let generator = OccurrenceGenerator::new(&db);
        let window = DateRange::new(date(2023, 12, 1), date(2023, 12, 31)).unwrap();

        assert!(generator.due_dates(&weekly_friday(), window).unwrap().is_empty());
    }

    #[test]
    fn test_due_dates_respects_cap() {
        let db = Database::in_memory().unwrap();
        let generator = OccurrenceGenerator::new(&db).with_max_per_run(3);
        let daily = RecurrencePattern::new(date(2024, 1, 1), Schedule::Daily { time_of_day: None });
        let window = DateRange::new(date(2024, 1, 1), date(2024, 12, 31)).unwrap();

        assert_eq!(generator.due_dates(&daily, window).unwrap().len(), 3);
    }

    #[test]
    fn test_generate_skips_existing() {
        let db = Database::in_memory().unwrap();
        let id = db
            .create_recurring_expense(&NewRecurringExpense {
                item_name: "Cleaner".to_string(),
                category: None,
                total_amount: 80.0,
                pattern: weekly_friday(),
            })
            .unwrap();
        let expense = db.get_recurring_expense(id).unwrap().unwrap();
        let generator = OccurrenceGenerator::new(&db);

        let january = DateRange::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        let created = generator.generate(&expense, &weekly_friday(), january).unwrap();
        assert_eq!(created.len(), 4);

        let again = generator.generate(&expense, &weekly_friday(), january).unwrap();
        assert!(again.is_empty());
    }
}
