//! Pattern commands

use anyhow::{Context, Result};
use chrono::{Days, Utc};
use outlay_core::db::Database;
use outlay_core::recurrence::validate;
use outlay_core::{Error, RecurrenceEngine};

use super::expenses::report_invalid;
use super::{parse_date, pattern_fields, CLI_USER};
use crate::cli::PatternArgs;

pub fn cmd_pattern_set(db: &Database, id: i64, pattern: &PatternArgs) -> Result<()> {
    let fields = pattern_fields(pattern)?;
    let engine = RecurrenceEngine::new(db.clone());

    let saved = match engine.save_pattern(id, &fields) {
        Ok(saved) => saved,
        Err(Error::InvalidPattern(errors)) => return Err(report_invalid(&errors)),
        Err(e) => return Err(e).context(format!("Failed to update pattern of expense {}", id)),
    };

    db.log_audit(
        CLI_USER,
        "update_pattern",
        Some("expense"),
        Some(id),
        Some(&saved.describe()),
    )?;

    println!("✅ Updated pattern of expense #{}", id);
    println!("   🔁 {}", saved.describe());
    println!("   Existing occurrences are unchanged; new ones follow this pattern.");

    Ok(())
}

pub fn cmd_pattern_preview(
    db: &Database,
    pattern: &PatternArgs,
    after: Option<&str>,
    count: usize,
) -> Result<()> {
    let fields = pattern_fields(pattern)?;
    let validated = validate(&fields).map_err(|errors| report_invalid(&errors))?;

    let after = match after {
        Some(after) => parse_date(after)?,
        None => Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(1))
            .context("Date out of range")?,
    };

    let engine = RecurrenceEngine::new(db.clone());
    let dates = engine.preview(&fields, after, count.max(1))?;

    println!("🔁 {}", validated.describe());
    if dates.is_empty() {
        println!("   No dates after {}", after);
        return Ok(());
    }
    for date in dates {
        println!("   📅 {} ({})", date, date.format("%A"));
    }

    Ok(())
}
