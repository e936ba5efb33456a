//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Outlay - Track recurring expenses and the bills they produce
#[derive(Parser)]
#[command(name = "outlay")]
#[command(about = "Recurring expense tracker", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "outlay.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set OUTLAY_DB_KEY environment variable with your passphrase.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Manage recurring expenses
    Expenses {
        #[command(subcommand)]
        action: Option<ExpensesAction>,
    },

    /// Change or try out recurrence patterns
    Pattern {
        #[command(subcommand)]
        action: PatternAction,
    },

    /// Generate and manage occurrences
    Occurrences {
        #[command(subcommand)]
        action: Option<OccurrencesAction>,
    },

    /// Show the audit log
    Audit {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, the server requires a bearer key from OUTLAY_API_KEYS.
        #[arg(long)]
        no_auth: bool,
    },
}

/// Recurrence pattern fields, shared by every command that takes a pattern
#[derive(Args, Debug, Clone, Default)]
pub struct PatternArgs {
    /// Frequency: daily, weekly, monthly, quarterly, yearly
    #[arg(short, long)]
    pub frequency: String,

    /// First date the expense can occur (YYYY-MM-DD)
    #[arg(long)]
    pub start: String,

    /// Last date the expense can occur (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<String>,

    /// Weekday, 0 = Sunday .. 6 = Saturday (weekly, monthly by weekday)
    #[arg(long)]
    pub day_of_week: Option<i64>,

    /// Day of the month, 1-31 (monthly by day, quarterly, yearly)
    #[arg(long)]
    pub day_of_month: Option<i64>,

    /// Week of the month, 1-4 or 5 for the last (monthly by weekday)
    #[arg(long)]
    pub week_of_month: Option<i64>,

    /// Month, 1-12 (yearly)
    #[arg(long)]
    pub month_of_year: Option<i64>,

    /// Monthly rule: day_of_month or day_of_week
    #[arg(long)]
    pub monthly_type: Option<String>,

    /// Time of day for daily patterns (HH:MM)
    #[arg(long)]
    pub time: Option<String>,

    /// Days of advance notice before each occurrence
    #[arg(long)]
    pub reminder_days: Option<i64>,
}

#[derive(Subcommand)]
pub enum ExpensesAction {
    /// Add a recurring expense
    Add {
        /// What the expense is for
        #[arg(short, long)]
        name: String,

        /// Amount charged each time
        #[arg(short, long)]
        amount: f64,

        /// Category
        #[arg(short, long)]
        category: Option<String>,

        #[command(flatten)]
        pattern: PatternArgs,
    },

    /// List recurring expenses
    List,

    /// Show an expense and its payments
    Show {
        /// Expense ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum PatternAction {
    /// Replace the pattern of a recurring expense
    Set {
        /// Recurring expense ID
        id: i64,

        #[command(flatten)]
        pattern: PatternArgs,
    },

    /// Show the next dates a pattern would produce
    Preview {
        #[command(flatten)]
        pattern: PatternArgs,

        /// Show dates after this one (default: yesterday)
        #[arg(long)]
        after: Option<String>,

        /// Number of dates to show
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}

/// Window selection shared by generate and list
#[derive(Args, Debug, Clone)]
pub struct WindowArgs {
    /// Window start (YYYY-MM-DD, default: today)
    #[arg(long)]
    pub from: Option<String>,

    /// Window end (YYYY-MM-DD, default: start + days)
    #[arg(long)]
    pub to: Option<String>,

    /// Days after the start to cover when --to is omitted (both ends included)
    #[arg(long, default_value = "30")]
    pub days: u32,
}

impl Default for WindowArgs {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            days: 30,
        }
    }
}

#[derive(Subcommand)]
pub enum OccurrencesAction {
    /// Create pending occurrences for a window
    Generate {
        #[command(flatten)]
        window: WindowArgs,

        /// Only this recurring expense
        #[arg(short, long)]
        expense: Option<i64>,
    },

    /// List occurrences in a window
    List {
        #[command(flatten)]
        window: WindowArgs,

        /// Filter by status: pending, completed, skipped
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by recurring expense ID
        #[arg(short, long)]
        expense: Option<i64>,
    },

    /// Mark an occurrence paid, recording the expense
    Complete {
        /// Occurrence ID
        id: i64,
    },

    /// Skip an occurrence
    Skip {
        /// Occurrence ID
        id: i64,
    },

    /// Return an occurrence to pending
    Reset {
        /// Occurrence ID
        id: i64,
    },
}
