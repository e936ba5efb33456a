//! Recurring expense commands

use anyhow::{bail, Context, Result};
use outlay_core::db::Database;
use outlay_core::models::NewRecurringExpense;
use outlay_core::recurrence::validate;
use outlay_core::{ExpenseRepository, ValidationError};

use super::{pattern_fields, truncate, CLI_USER};
use crate::cli::PatternArgs;

/// Print every validation problem, then fail
pub(crate) fn report_invalid(errors: &[ValidationError]) -> anyhow::Error {
    println!("❌ Invalid recurrence pattern:");
    for error in errors {
        println!("   • {}", error);
    }
    anyhow::anyhow!("Invalid recurrence pattern ({} problems)", errors.len())
}

pub fn cmd_expenses_add(
    db: &Database,
    name: &str,
    amount: f64,
    category: Option<&str>,
    pattern: &PatternArgs,
) -> Result<()> {
    let fields = pattern_fields(pattern)?;
    let pattern = validate(&fields).map_err(|errors| report_invalid(&errors))?;

    let id = db
        .create_recurring_expense(&NewRecurringExpense {
            item_name: name.to_string(),
            category: category.map(|c| c.to_string()),
            total_amount: amount,
            pattern,
        })
        .context("Failed to create recurring expense")?;

    db.log_audit(
        CLI_USER,
        "create",
        Some("expense"),
        Some(id),
        Some(&format!("{} ${:.2} {}", name, amount, pattern.describe())),
    )?;

    println!("✅ Added recurring expense #{}: {}", id, name);
    println!("   💵 ${:.2}", amount);
    println!("   🔁 {}", pattern.describe());
    if let Some(category) = category {
        println!("   🏷️  {}", category);
    }

    Ok(())
}

pub fn cmd_expenses_list(db: &Database) -> Result<()> {
    let expenses = db.list_recurring_expenses()?;

    if expenses.is_empty() {
        println!("No recurring expenses yet. Add one with `outlay expenses add`.");
        return Ok(());
    }

    println!(
        "{:>5} {:<24} {:>10} {:<14} Pattern",
        "ID", "Item", "Amount", "Category"
    );
    println!("{}", "-".repeat(90));

    for expense in &expenses {
        let description = match expense.recurrence() {
            Ok(pattern) => pattern.describe(),
            Err(_) => "⚠️  invalid pattern".to_string(),
        };
        println!(
            "{:>5} {:<24} {:>10.2} {:<14} {}",
            expense.id,
            truncate(&expense.item_name, 24),
            expense.total_amount,
            truncate(expense.category.as_deref().unwrap_or("-"), 14),
            description
        );
    }

    println!();
    println!("{} recurring expenses", expenses.len());

    Ok(())
}

pub fn cmd_expenses_show(db: &Database, id: i64) -> Result<()> {
    let Some(expense) = db.get_expense(id)? else {
        bail!("Expense {} not found", id);
    };

    println!("📄 Expense #{}: {}", expense.id, expense.item_name);
    println!("   💵 ${:.2}", expense.total_amount);
    if let Some(category) = &expense.category {
        println!("   🏷️  {}", category);
    }
    if let Some(date) = expense.expense_date {
        println!("   📅 {}", date);
    }
    if let Some(occurrence_id) = expense.source_occurrence_id {
        println!("   🔗 Recorded from occurrence #{}", occurrence_id);
    }

    if expense.is_recurring {
        match db.get_recurring_expense(id)?.map(|r| r.recurrence()) {
            Some(Ok(pattern)) => println!("   🔁 {}", pattern.describe()),
            Some(Err(e)) => println!("   ⚠️  {}", e),
            None => {}
        }
    }

    let payments = db.list_payments(id)?;
    if !payments.is_empty() {
        println!();
        println!("Payments:");
        for payment in payments {
            println!("   {} ${:.2}", payment.payment_date, payment.amount);
        }
    }

    Ok(())
}
