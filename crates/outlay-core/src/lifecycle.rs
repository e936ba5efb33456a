//! Occurrence status transitions
//!
//! ```text
//!         complete
//! pending ────────► completed
//!    ▲  ▲              │
//!    │  └──── reset ───┘
//!    │ skip / reset
//!    ▼
//! skipped
//! ```
//!
//! Completing an occurrence records a real expense with one full payment and
//! links it back. The link is written at most once: completing again, resetting
//! and completing, or racing another caller all return the existing link.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{ExpenseTemplate, LifecycleResult, Occurrence, OccurrenceStatus};
use crate::store::{ClaimOutcome, ExpenseRepository, ExpenseService, OccurrenceStore};

/// How long a caller that lost a completion race waits for the winner's link
///
/// Covers the store's busy timeout plus the winner's expense creation.
pub const DEFAULT_CLAIM_WAIT: Duration = Duration::from_secs(15);
const CLAIM_WAIT_INTERVAL: Duration = Duration::from_millis(25);

/// Per-occurrence mutexes so callers in this process never interleave on one id
#[derive(Default)]
struct OccurrenceLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl OccurrenceLocks {
    fn lock_for(&self, id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Drop the entry once nobody else holds it
    fn release(&self, id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get(&id) {
            // Only the map holds it
            if Arc::strong_count(lock) == 1 {
                locks.remove(&id);
            }
        }
    }
}

/// Applies status transitions to occurrences
pub struct OccurrenceLifecycleManager {
    store: Arc<dyn OccurrenceStore>,
    expenses: Arc<dyn ExpenseRepository>,
    ledger: Arc<dyn ExpenseService>,
    locks: OccurrenceLocks,
    claim_wait: Duration,
}

impl OccurrenceLifecycleManager {
    pub fn new(
        store: Arc<dyn OccurrenceStore>,
        expenses: Arc<dyn ExpenseRepository>,
        ledger: Arc<dyn ExpenseService>,
    ) -> Self {
        Self {
            store,
            expenses,
            ledger,
            locks: OccurrenceLocks::default(),
            claim_wait: DEFAULT_CLAIM_WAIT,
        }
    }

    /// Bound how long a losing completer waits for the winner's link
    pub fn with_claim_wait(mut self, claim_wait: Duration) -> Self {
        self.claim_wait = claim_wait;
        self
    }

    /// Move an occurrence to `new_status`
    pub fn update_status(
        &self,
        occurrence_id: i64,
        new_status: OccurrenceStatus,
    ) -> Result<LifecycleResult> {
        let lock = self.locks.lock_for(occurrence_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            self.apply(occurrence_id, new_status)
        };
        drop(lock);
        self.locks.release(occurrence_id);
        result
    }

    fn apply(&self, occurrence_id: i64, new_status: OccurrenceStatus) -> Result<LifecycleResult> {
        let occurrence = self
            .store
            .get(occurrence_id)?
            .ok_or_else(|| Error::NotFound(format!("Occurrence {}", occurrence_id)))?;

        match new_status {
            OccurrenceStatus::Completed => self.complete(occurrence),
            OccurrenceStatus::Skipped => self.transition(occurrence, OccurrenceStatus::Skipped),
            OccurrenceStatus::Pending => self.transition(occurrence, OccurrenceStatus::Pending),
        }
    }

    /// Skip or reset: a status-only change; `linked_expense_id` is kept
    fn transition(&self, occurrence: Occurrence, to: OccurrenceStatus) -> Result<LifecycleResult> {
        let from = occurrence.status;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }

        if !self.store.update_status(occurrence.id, from, to, None)? {
            // Changed underneath us by another process
            let current = self.reload(occurrence.id)?;
            return Err(Error::InvalidTransition {
                from: current.status,
                to,
            });
        }

        let summary = match to {
            OccurrenceStatus::Skipped => format!(
                "Skipped occurrence on {}",
                occurrence.occurrence_date
            ),
            _ => format!(
                "Reset occurrence on {} to pending",
                occurrence.occurrence_date
            ),
        };
        info!(occurrence_id = occurrence.id, from = %from, to = %to, "Occurrence status changed");

        Ok(LifecycleResult {
            occurrence_id: occurrence.id,
            previous_status: from,
            status: to,
            linked_expense_id: occurrence.linked_expense_id,
            completed_date: None,
            expense_created: false,
            summary,
        })
    }

    fn complete(&self, occurrence: Occurrence) -> Result<LifecycleResult> {
        let previous_status = occurrence.status;

        // A repeated completion is only a no-op when the first one produced a link
        let repeat = previous_status == OccurrenceStatus::Completed;
        if !repeat && !previous_status.can_transition_to(OccurrenceStatus::Completed) {
            return Err(Error::InvalidTransition {
                from: previous_status,
                to: OccurrenceStatus::Completed,
            });
        }

        // Resolve the parent before claiming so a missing parent leaves no trace
        let parent = self
            .expenses
            .get_recurring_expense(occurrence.parent_expense_id)?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Recurring expense {}",
                    occurrence.parent_expense_id
                ))
            })?;

        let claimed = loop {
            match self.store.claim_completion(occurrence.id, Utc::now())? {
                ClaimOutcome::Claimed(claimed) => break claimed,
                ClaimOutcome::AlreadyLinked(linked) => {
                    return Ok(self.already_linked(previous_status, &linked, &parent.item_name));
                }
                ClaimOutcome::Unavailable(current) => {
                    if current.status != OccurrenceStatus::Completed {
                        return Err(Error::InvalidTransition {
                            from: current.status,
                            to: OccurrenceStatus::Completed,
                        });
                    }
                    match self.wait_for_link(current.id) {
                        // The winner failed and released its claim; try again
                        Ok(None) => continue,
                        Ok(Some(linked)) => {
                            return Ok(self.already_linked(
                                previous_status,
                                &linked,
                                &parent.item_name,
                            ));
                        }
                        Err(Error::DuplicateCompletion(id)) => {
                            warn!(
                                occurrence_id = id,
                                "Completion still in progress elsewhere, reporting it as completed"
                            );
                            let current = self.reload(id)?;
                            return Ok(self.already_linked(
                                previous_status,
                                &current,
                                &parent.item_name,
                            ));
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        let template = ExpenseTemplate::for_occurrence(&parent, &claimed);
        let expense_id = match self.ledger.create_expense_with_payment(&template) {
            Ok(id) => id,
            Err(e) => {
                if let Err(release_err) = self.store.release_claim(claimed.id) {
                    warn!(
                        occurrence_id = claimed.id,
                        error = %release_err,
                        "Failed to release completion claim"
                    );
                }
                return Err(e);
            }
        };

        let stored = self.store.attach_linked_expense(claimed.id, expense_id)?;
        let linked_expense_id = stored.linked_expense_id.or(Some(expense_id));

        info!(
            occurrence_id = stored.id,
            expense_id = ?linked_expense_id,
            amount = template.total_amount,
            "Occurrence completed"
        );

        Ok(LifecycleResult {
            occurrence_id: stored.id,
            previous_status,
            status: OccurrenceStatus::Completed,
            linked_expense_id,
            completed_date: stored.completed_date,
            expense_created: true,
            summary: format!(
                "Recorded {}{} for ${:.2} on {} as expense #{}",
                template.item_name,
                template
                    .category
                    .as_deref()
                    .map(|c| format!(" ({})", c))
                    .unwrap_or_default(),
                template.total_amount,
                template.expense_date,
                linked_expense_id.unwrap_or(expense_id)
            ),
        })
    }

    fn already_linked(
        &self,
        previous_status: OccurrenceStatus,
        occurrence: &Occurrence,
        item_name: &str,
    ) -> LifecycleResult {
        let linked = occurrence.linked_expense_id;
        let summary = match linked {
            Some(id) => format!(
                "{} on {} is already recorded as expense #{}",
                item_name, occurrence.occurrence_date, id
            ),
            None => format!(
                "{} on {} is being recorded by another request",
                item_name, occurrence.occurrence_date
            ),
        };
        LifecycleResult {
            occurrence_id: occurrence.id,
            previous_status,
            status: OccurrenceStatus::Completed,
            linked_expense_id: linked,
            completed_date: occurrence.completed_date,
            expense_created: false,
            summary,
        }
    }

    /// Wait for another completer to attach its link
    ///
    /// `Ok(None)` means the occurrence is pending again and should be claimed
    /// anew. Running out of time is `DuplicateCompletion`.
    fn wait_for_link(&self, id: i64) -> Result<Option<Occurrence>> {
        let deadline = Instant::now() + self.claim_wait;
        loop {
            let current = self.reload(id)?;
            match current.status {
                OccurrenceStatus::Completed if current.linked_expense_id.is_some() => {
                    return Ok(Some(current));
                }
                OccurrenceStatus::Completed => {}
                OccurrenceStatus::Pending => return Ok(None),
                OccurrenceStatus::Skipped => {
                    return Err(Error::InvalidTransition {
                        from: current.status,
                        to: OccurrenceStatus::Completed,
                    })
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::DuplicateCompletion(id));
            }
            std::thread::sleep(CLAIM_WAIT_INTERVAL);
        }
    }

    fn reload(&self, id: i64) -> Result<Occurrence> {
        self.store
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("Occurrence {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{NewOccurrence, NewRecurringExpense};
    use crate::recurrence::{RecurrencePattern, Schedule};
    use chrono::NaiveDate;

    struct Fixture {
        db: Arc<Database>,
        manager: OccurrenceLifecycleManager,
        occurrence_id: i64,
    }

    fn setup() -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let expense_id = db
            .create_recurring_expense(&NewRecurringExpense {
                item_name: "Office rent".to_string(),
                category: Some("Facilities".to_string()),
                total_amount: 1200.0,
                pattern: RecurrencePattern::new(start, Schedule::MonthlyByDay { day_of_month: 1 }),
            })
            .unwrap();
        let occurrence = db
            .insert(NewOccurrence {
                parent_expense_id: expense_id,
                occurrence_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            })
            .unwrap()
            .unwrap();
        let manager = OccurrenceLifecycleManager::new(db.clone(), db.clone(), db.clone());
        Fixture {
            db,
            manager,
            occurrence_id: occurrence.id,
        }
    }

    /// Expense service that always fails
    struct FailingLedger;

    impl ExpenseService for FailingLedger {
        fn create_expense_with_payment(&self, _template: &ExpenseTemplate) -> Result<i64> {
            Err(Error::InvalidData("ledger unavailable".to_string()))
        }
    }

    /// Expense service that takes a while before recording
    struct SlowLedger {
        inner: Arc<Database>,
        delay: Duration,
    }

    impl ExpenseService for SlowLedger {
        fn create_expense_with_payment(&self, template: &ExpenseTemplate) -> Result<i64> {
            std::thread::sleep(self.delay);
            self.inner.create_expense_with_payment(template)
        }
    }

    /// A second manager over the same database, as another process would have
    fn slow_manager(db: &Arc<Database>, delay: Duration) -> OccurrenceLifecycleManager {
        let ledger = Arc::new(SlowLedger {
            inner: db.clone(),
            delay,
        });
        OccurrenceLifecycleManager::new(db.clone(), db.clone(), ledger)
    }

    #[test]
    fn test_transition_table() {
        use OccurrenceStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Skipped));
        assert!(Completed.can_transition_to(Pending));
        assert!(Skipped.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Skipped));
        assert!(!Skipped.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Completed));
        assert!(!Skipped.can_transition_to(Skipped));
    }

    #[test]
    fn test_complete_creates_linked_expense() {
        let f = setup();
        let result = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Completed)
            .unwrap();

        assert_eq!(result.status, OccurrenceStatus::Completed);
        assert_eq!(result.previous_status, OccurrenceStatus::Pending);
        assert!(result.expense_created);
        assert!(result.completed_date.is_some());
        assert!(result.summary.contains("Office rent (Facilities)"));
        assert!(result.summary.contains("$1200.00"));

        let expense_id = result.linked_expense_id.unwrap();
        let expense = f.db.get_expense(expense_id).unwrap().unwrap();
        assert_eq!(expense.item_name, "Office rent");
        assert_eq!(expense.total_amount, 1200.0);
        assert_eq!(expense.source_occurrence_id, Some(f.occurrence_id));

        let payments = f.db.list_payments(expense_id).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount, 1200.0);
        assert_eq!(
            payments[0].payment_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn test_complete_twice_returns_same_link() {
        let f = setup();
        let first = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Completed)
            .unwrap();
        let second = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Completed)
            .unwrap();

        assert!(!second.expense_created);
        assert_eq!(second.linked_expense_id, first.linked_expense_id);
        assert_eq!(f.db.count_expenses_for_occurrence(f.occurrence_id).unwrap(), 1);
    }

    #[test]
    fn test_reset_keeps_link_and_clears_completed_date() {
        let f = setup();
        let completed = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Completed)
            .unwrap();
        let reset = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Pending)
            .unwrap();

        assert_eq!(reset.status, OccurrenceStatus::Pending);
        assert_eq!(reset.linked_expense_id, completed.linked_expense_id);

        let stored = f.db.get(f.occurrence_id).unwrap().unwrap();
        assert_eq!(stored.status, OccurrenceStatus::Pending);
        assert!(stored.completed_date.is_none());
        assert_eq!(stored.linked_expense_id, completed.linked_expense_id);

        // Completing again reuses the link
        let again = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Completed)
            .unwrap();
        assert!(!again.expense_created);
        assert_eq!(again.status, OccurrenceStatus::Completed);
        assert_eq!(again.linked_expense_id, completed.linked_expense_id);
        assert!(again.completed_date.is_some());
        assert_eq!(f.db.count_expenses_for_occurrence(f.occurrence_id).unwrap(), 1);
    }

    #[test]
    fn test_skip_then_complete_is_rejected() {
        let f = setup();
        f.manager
            .update_status(f.occurrence_id, OccurrenceStatus::Skipped)
            .unwrap();

        let err = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Completed)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: OccurrenceStatus::Skipped,
                to: OccurrenceStatus::Completed
            }
        ));

        let stored = f.db.get(f.occurrence_id).unwrap().unwrap();
        assert_eq!(stored.status, OccurrenceStatus::Skipped);
        assert!(stored.linked_expense_id.is_none());
    }

    #[test]
    fn test_completed_to_skipped_is_rejected() {
        let f = setup();
        f.manager
            .update_status(f.occurrence_id, OccurrenceStatus::Completed)
            .unwrap();
        let err = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Skipped)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_same_status_is_rejected() {
        let f = setup();
        let err = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        f.manager
            .update_status(f.occurrence_id, OccurrenceStatus::Skipped)
            .unwrap();
        let err = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Skipped)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_unknown_occurrence_is_not_found() {
        let f = setup();
        let err = f
            .manager
            .update_status(9999, OccurrenceStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_failed_expense_creation_releases_claim() {
        let f = setup();
        let manager =
            OccurrenceLifecycleManager::new(f.db.clone(), f.db.clone(), Arc::new(FailingLedger));

        assert!(manager
            .update_status(f.occurrence_id, OccurrenceStatus::Completed)
            .is_err());

        let stored = f.db.get(f.occurrence_id).unwrap().unwrap();
        assert_eq!(stored.status, OccurrenceStatus::Pending);
        assert!(stored.completed_date.is_none());
        assert!(stored.linked_expense_id.is_none());

        // A working ledger can complete it afterwards
        let result = f
            .manager
            .update_status(f.occurrence_id, OccurrenceStatus::Completed)
            .unwrap();
        assert!(result.expense_created);
    }

    #[test]
    fn test_concurrent_completions_create_one_expense() {
        let f = setup();
        let manager = Arc::new(f.manager);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let id = f.occurrence_id;
                std::thread::spawn(move || manager.update_status(id, OccurrenceStatus::Completed))
            })
            .collect();

        let results: Vec<LifecycleResult> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        let created = results.iter().filter(|r| r.expense_created).count();
        assert_eq!(created, 1);

        let link = results[0].linked_expense_id;
        assert!(link.is_some());
        assert!(results.iter().all(|r| r.linked_expense_id == link));
        assert_eq!(f.db.count_expenses_for_occurrence(f.occurrence_id).unwrap(), 1);
    }

    #[test]
    fn test_loser_waits_out_a_slow_completion() {
        let f = setup();
        let slow = slow_manager(&f.db, Duration::from_millis(1500));
        let id = f.occurrence_id;

        let winner = std::thread::spawn(move || slow.update_status(id, OccurrenceStatus::Completed));
        std::thread::sleep(Duration::from_millis(200));
        let second = f.manager.update_status(id, OccurrenceStatus::Completed).unwrap();
        let first = winner.join().unwrap().unwrap();

        assert!(first.expense_created);
        assert!(!second.expense_created);
        assert_eq!(second.status, OccurrenceStatus::Completed);
        assert_eq!(second.linked_expense_id, first.linked_expense_id);
        assert_eq!(f.db.count_expenses_for_occurrence(id).unwrap(), 1);
    }

    #[test]
    fn test_wait_timeout_reports_completed_without_error() {
        let f = setup();
        let slow = slow_manager(&f.db, Duration::from_millis(600));
        let impatient = OccurrenceLifecycleManager::new(f.db.clone(), f.db.clone(), f.db.clone())
            .with_claim_wait(Duration::from_millis(50));
        let id = f.occurrence_id;

        let winner = std::thread::spawn(move || slow.update_status(id, OccurrenceStatus::Completed));
        std::thread::sleep(Duration::from_millis(150));
        let second = impatient
            .update_status(id, OccurrenceStatus::Completed)
            .unwrap();

        assert_eq!(second.status, OccurrenceStatus::Completed);
        assert!(!second.expense_created);
        assert!(second.linked_expense_id.is_none());

        let first = winner.join().unwrap().unwrap();
        assert!(first.expense_created);
        assert_eq!(f.db.count_expenses_for_occurrence(id).unwrap(), 1);

        // Once the link exists every caller sees it
        let third = impatient
            .update_status(id, OccurrenceStatus::Completed)
            .unwrap();
        assert_eq!(third.linked_expense_id, first.linked_expense_id);
    }
}
