//! Audit log command

use anyhow::Result;
use outlay_core::db::Database;

use super::truncate;

pub fn cmd_audit(db: &Database, limit: i64) -> Result<()> {
    let entries = db.list_audit_log(limit.max(1))?;

    if entries.is_empty() {
        println!("No audit entries yet.");
        return Ok(());
    }

    println!(
        "{:<20} {:<20} {:<16} {:<20} Details",
        "Time", "User", "Action", "Entity"
    );
    println!("{}", "-".repeat(90));

    for entry in entries {
        let entity = match (&entry.entity_type, entry.entity_id) {
            (Some(kind), Some(id)) => format!("{} #{}", kind, id),
            (Some(kind), None) => kind.clone(),
            _ => String::new(),
        };
        println!(
            "{:<20} {:<20} {:<16} {:<20} {}",
            entry.timestamp,
            truncate(&entry.user_email, 20),
            entry.action,
            entity,
            truncate(entry.details.as_deref().unwrap_or(""), 40)
        );
    }

    Ok(())
}
