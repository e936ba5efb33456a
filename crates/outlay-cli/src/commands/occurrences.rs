//! Occurrence commands

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use outlay_core::db::Database;
use outlay_core::models::{DateRange, Occurrence, OccurrenceFilter, OccurrenceStatus};
use outlay_core::{ExpenseRepository, RecurrenceEngine};

use super::{parse_date, truncate, CLI_USER};
use crate::cli::WindowArgs;

/// Resolve --from/--to/--days into a date window
pub fn resolve_window(args: &WindowArgs) -> Result<DateRange> {
    let start = match &args.from {
        Some(from) => parse_date(from)?,
        None => Utc::now().date_naive(),
    };
    let window = match &args.to {
        Some(to) => DateRange::new(start, parse_date(to)?)?,
        None => DateRange::starting_at(start, args.days)?,
    };
    Ok(window)
}

pub fn cmd_occurrences_generate(
    db: &Database,
    window: &WindowArgs,
    expense: Option<i64>,
) -> Result<()> {
    let window = resolve_window(window)?;
    let engine = RecurrenceEngine::new(db.clone());

    println!("🔄 Generating occurrences for {}...", window);

    let (created, failures) = match expense {
        Some(expense_id) => {
            let created = engine
                .generate_for_expense(expense_id, window)
                .with_context(|| format!("Failed to generate occurrences for expense {}", expense_id))?;
            (created, Vec::new())
        }
        None => {
            let report = engine.generate_occurrences(window)?;
            (report.generated, report.errors)
        }
    };

    db.log_audit(
        CLI_USER,
        "generate",
        Some("occurrence"),
        expense,
        Some(&format!(
            "window={}, generated={}, errors={}",
            window,
            created.len(),
            failures.len()
        )),
    )?;

    println!("✅ Created {} occurrences", created.len());
    for failure in &failures {
        println!("   ⚠️  Expense #{}: {}", failure.expense_id, failure.error);
    }

    Ok(())
}

pub fn cmd_occurrences_list(
    db: &Database,
    window: &WindowArgs,
    status: Option<&str>,
    expense: Option<i64>,
) -> Result<()> {
    let window = resolve_window(window)?;
    let status = status
        .map(|s| s.parse::<OccurrenceStatus>().map_err(|e| anyhow!(e)))
        .transpose()?;

    let engine = RecurrenceEngine::new(db.clone());
    let occurrences = engine.list_occurrences(
        window,
        OccurrenceFilter {
            status,
            parent_expense_id: expense,
        },
    )?;

    if occurrences.is_empty() {
        println!("No occurrences in {}.", window);
        println!("Run `outlay occurrences generate` to create them.");
        return Ok(());
    }

    println!(
        "{:>5} {:<12} {:<10} {:<24} {:>10} Linked",
        "ID", "Date", "Status", "Item", "Amount"
    );
    println!("{}", "-".repeat(80));

    for occurrence in &occurrences {
        print_occurrence(db, occurrence)?;
    }

    println!();
    println!("{} occurrences in {}", occurrences.len(), window);

    Ok(())
}

fn print_occurrence(db: &Database, occurrence: &Occurrence) -> Result<()> {
    let parent = db.get_recurring_expense(occurrence.parent_expense_id)?;
    let (item, amount) = match &parent {
        Some(parent) => (parent.item_name.as_str(), format!("{:.2}", parent.total_amount)),
        None => ("?", "-".to_string()),
    };
    let icon = match occurrence.status {
        OccurrenceStatus::Pending => "⏳",
        OccurrenceStatus::Completed => "✅",
        OccurrenceStatus::Skipped => "⏭️ ",
    };
    let linked = occurrence
        .linked_expense_id
        .map(|id| format!("#{}", id))
        .unwrap_or_default();

    println!(
        "{:>5} {:<12} {} {:<7} {:<24} {:>10} {}",
        occurrence.id,
        occurrence.occurrence_date,
        icon,
        occurrence.status.as_str(),
        truncate(item, 24),
        amount,
        linked
    );
    Ok(())
}

pub fn cmd_occurrences_set_status(db: &Database, id: i64, status: OccurrenceStatus) -> Result<()> {
    let engine = RecurrenceEngine::new(db.clone());
    let result = engine.set_occurrence_status(id, status)?;

    let action = match status {
        OccurrenceStatus::Completed => "complete",
        OccurrenceStatus::Skipped => "skip",
        OccurrenceStatus::Pending => "reset",
    };
    db.log_audit(
        CLI_USER,
        action,
        Some("occurrence"),
        Some(id),
        Some(&result.summary),
    )?;

    let icon = match result.status {
        OccurrenceStatus::Completed => "✅",
        OccurrenceStatus::Skipped => "⏭️ ",
        OccurrenceStatus::Pending => "↩️ ",
    };
    println!(
        "{} Occurrence #{}: {} → {}",
        icon, result.occurrence_id, result.previous_status, result.status
    );
    println!("   {}", result.summary);
    if let Some(expense_id) = result.linked_expense_id {
        if result.expense_created {
            println!("   🔗 New expense #{}", expense_id);
        } else {
            println!("   🔗 Linked to expense #{}", expense_id);
        }
    }

    Ok(())
}
