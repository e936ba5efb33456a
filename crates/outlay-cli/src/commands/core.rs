//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `parse_date`, `pattern_fields` - Argument conversion
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use outlay_core::db::Database;
use outlay_core::recurrence::PatternFields;
use tracing::debug;

use crate::cli::PatternArgs;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    debug!(path = path_str, encrypted = !no_encrypt, "Opening database");
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Parse a YYYY-MM-DD argument
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

/// Convert pattern arguments into the flat pattern form
///
/// Only syntax is checked here; the engine's validator reports the rest.
pub fn pattern_fields(args: &PatternArgs) -> Result<PatternFields> {
    Ok(PatternFields {
        frequency: Some(args.frequency.parse().map_err(|e: String| anyhow!(e))?),
        start_date: Some(parse_date(&args.start)?),
        end_date: args.end.as_deref().map(parse_date).transpose()?,
        time_of_day: args
            .time
            .as_deref()
            .map(|t| {
                NaiveTime::parse_from_str(t, "%H:%M")
                    .with_context(|| format!("Invalid time '{}', expected HH:MM", t))
            })
            .transpose()?,
        day_of_week: args.day_of_week,
        day_of_month: args.day_of_month,
        week_of_month: args.week_of_month,
        month_of_year: args.month_of_year,
        monthly_recurrence_type: args
            .monthly_type
            .as_deref()
            .map(|t| t.parse().map_err(|e: String| anyhow!(e)))
            .transpose()?,
        reminder_days: args.reminder_days,
    })
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    println!("   📁 Path: {}", db.path());
    if db.is_encrypted() {
        println!("   🔒 Encryption: ENABLED");
    } else {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Add an expense: outlay expenses add --name Rent --amount 1500 \\");
    println!("       --frequency monthly --monthly-type day_of_month --day-of-month 1 --start 2024-01-01");
    println!("  2. Generate occurrences: outlay occurrences generate --days 30");
    println!("  3. Start web API: outlay serve");

    Ok(())
}
