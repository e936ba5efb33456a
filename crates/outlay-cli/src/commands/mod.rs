//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (open_db, date and pattern parsing)
//! - `expenses` - Recurring expense commands (add, list, show)
//! - `pattern` - Pattern commands (set, preview)
//! - `occurrences` - Occurrence commands (generate, list, complete, skip, reset)
//! - `audit` - Audit log
//! - `serve` - Web server command

pub mod audit;
pub mod core;
pub mod expenses;
pub mod occurrences;
pub mod pattern;
pub mod serve;

// Re-export command functions for main.rs
pub use audit::*;
pub use core::*;
pub use expenses::*;
pub use occurrences::*;
pub use pattern::*;
pub use serve::*;

/// Audit log identity for commands run from the terminal
pub const CLI_USER: &str = "cli";

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
