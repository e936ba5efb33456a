//! Background task scheduler for occurrence generation
//!
//! Provides optional scheduled generation that can be enabled via environment
//! variables:
//!
//! - `OUTLAY_GENERATION_SCHEDULE`: Interval in hours (e.g., "24" for daily)
//! - `OUTLAY_GENERATION_HORIZON_DAYS`: How far ahead each run materializes
//!   occurrences (default: 30)
//!
//! Each run generates the window `today ..= today + horizon`. Runs overlap with
//! manual generation freely; existing occurrences are never duplicated.

use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{error, info, warn};

use outlay_core::models::{DateRange, GenerationReport};
use outlay_core::{Database, RecurrenceEngine};

/// Default generation horizon in days
pub const DEFAULT_HORIZON_DAYS: u32 = 30;

/// Longest accepted interval between runs (one year)
pub const MAX_INTERVAL_HOURS: u64 = 24 * 366;

/// Configuration for scheduled generation
#[derive(Debug, Clone)]
pub struct GenerationScheduleConfig {
    /// Interval between runs in hours
    pub interval_hours: u64,
    /// Days ahead of today to generate
    pub horizon_days: u32,
}

impl GenerationScheduleConfig {
    /// Parse configuration from environment variables
    ///
    /// Returns None if scheduling is not configured (OUTLAY_GENERATION_SCHEDULE not set)
    pub fn from_env() -> Option<Self> {
        let interval_hours: u64 = std::env::var("OUTLAY_GENERATION_SCHEDULE")
            .ok()
            .and_then(|s| s.parse().ok())?;

        if interval_hours == 0 {
            warn!("OUTLAY_GENERATION_SCHEDULE is 0, scheduled generation disabled");
            return None;
        }
        if interval_hours > MAX_INTERVAL_HOURS {
            warn!(
                "OUTLAY_GENERATION_SCHEDULE is {} hours (max {}), scheduled generation disabled",
                interval_hours, MAX_INTERVAL_HOURS
            );
            return None;
        }

        let horizon_days = std::env::var("OUTLAY_GENERATION_HORIZON_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HORIZON_DAYS);

        Some(Self {
            interval_hours,
            horizon_days,
        })
    }
}

/// Start the generation scheduler as a background task
///
/// Runs once immediately, then at the configured interval. Generation is
/// synchronous database work, so each run goes through `spawn_blocking`.
pub fn start_generation_scheduler(
    engine: RecurrenceEngine,
    db: Database,
    config: GenerationScheduleConfig,
) {
    info!(
        "Starting generation scheduler: every {} hours, {} days ahead",
        config.interval_hours, config.horizon_days
    );

    tokio::spawn(async move {
        let period = Duration::from_secs(config.interval_hours.saturating_mul(3600));
        let mut ticker = interval(period);

        loop {
            // The first tick completes immediately
            ticker.tick().await;

            info!("Running scheduled occurrence generation...");

            let engine = engine.clone();
            let db = db.clone();
            let horizon_days = config.horizon_days;
            let outcome = tokio::task::spawn_blocking(move || {
                run_scheduled_generation(&engine, &db, horizon_days)
            })
            .await;

            match outcome {
                Ok(Ok(report)) => {
                    info!(
                        "Scheduled generation completed: {} created, {} failed",
                        report.generated.len(),
                        report.errors.len()
                    );
                }
                Ok(Err(e)) => {
                    error!("Scheduled generation failed: {}", e);
                }
                Err(e) => {
                    error!("Scheduled generation task panicked: {}", e);
                }
            }
        }
    });
}

/// Run a single scheduled generation
pub(crate) fn run_scheduled_generation(
    engine: &RecurrenceEngine,
    db: &Database,
    horizon_days: u32,
) -> Result<GenerationReport, String> {
    let today = Utc::now().date_naive();
    let window = DateRange::starting_at(today, horizon_days)
        .map_err(|e| format!("Invalid generation window: {}", e))?;

    let report = engine
        .generate_occurrences(window)
        .map_err(|e| format!("Failed to generate occurrences: {}", e))?;

    for failure in &report.errors {
        warn!(
            expense_id = failure.expense_id,
            "Skipped recurring expense during scheduled generation: {}", failure.error
        );
    }

    // Log to audit (as "scheduler" user)
    if let Err(e) = db.log_audit(
        "scheduler",
        "generate_scheduled",
        Some("occurrence"),
        None,
        Some(&format!(
            "window={}, generated={}, errors={}",
            window,
            report.generated.len(),
            report.errors.len()
        )),
    ) {
        warn!("Failed to log scheduled generation to audit: {}", e);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use outlay_core::models::NewRecurringExpense;
    use outlay_core::recurrence::{RecurrencePattern, Schedule};

    #[test]
    fn test_config_from_env() {
        // Env vars are process-wide; keep every case in one test
        std::env::remove_var("OUTLAY_GENERATION_SCHEDULE");
        assert!(GenerationScheduleConfig::from_env().is_none());

        std::env::set_var("OUTLAY_GENERATION_SCHEDULE", "0");
        assert!(GenerationScheduleConfig::from_env().is_none());

        std::env::set_var("OUTLAY_GENERATION_SCHEDULE", "18446744073709551615");
        assert!(GenerationScheduleConfig::from_env().is_none());

        std::env::set_var(
            "OUTLAY_GENERATION_SCHEDULE",
            (MAX_INTERVAL_HOURS + 1).to_string(),
        );
        assert!(GenerationScheduleConfig::from_env().is_none());

        std::env::set_var("OUTLAY_GENERATION_SCHEDULE", MAX_INTERVAL_HOURS.to_string());
        assert_eq!(
            GenerationScheduleConfig::from_env().unwrap().interval_hours,
            MAX_INTERVAL_HOURS
        );

        std::env::set_var("OUTLAY_GENERATION_SCHEDULE", "12");
        std::env::remove_var("OUTLAY_GENERATION_HORIZON_DAYS");
        let config = GenerationScheduleConfig::from_env().unwrap();
        assert_eq!(config.interval_hours, 12);
        assert_eq!(config.horizon_days, DEFAULT_HORIZON_DAYS);

        std::env::set_var("OUTLAY_GENERATION_HORIZON_DAYS", "90");
        let config = GenerationScheduleConfig::from_env().unwrap();
        assert_eq!(config.horizon_days, 90);

        std::env::remove_var("OUTLAY_GENERATION_SCHEDULE");
        std::env::remove_var("OUTLAY_GENERATION_HORIZON_DAYS");
    }

    #[test]
    fn test_scheduled_run_generates_and_audits() {
        let db = Database::in_memory().unwrap();
        let today = Utc::now().date_naive();
        db.create_recurring_expense(&NewRecurringExpense {
            item_name: "Coffee".to_string(),
            category: None,
            total_amount: 4.5,
            pattern: RecurrencePattern::new(today, Schedule::Daily { time_of_day: None }),
        })
        .unwrap();
        let engine = RecurrenceEngine::new(db.clone());

        let report = run_scheduled_generation(&engine, &db, 6).unwrap();
        // today through today + 6
        assert_eq!(report.generated.len(), 7);

        // A second run finds nothing new
        let again = run_scheduled_generation(&engine, &db, 6).unwrap();
        assert!(again.generated.is_empty());

        let audit = db.list_audit_log(10).unwrap();
        assert_eq!(audit.len(), 2);
        assert!(audit.iter().all(|e| e.user_email == "scheduler"));
    }
}
