//! Outlay CLI - Recurring expense tracker
//!
//! Usage:
//!   outlay init                              Initialize database
//!   outlay expenses add --name Rent ...      Add a recurring expense
//!   outlay occurrences generate --days 30    Materialize upcoming occurrences
//!   outlay occurrences complete 12           Record a paid occurrence
//!   outlay serve --port 3000                 Start web server

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use outlay_core::models::OccurrenceStatus;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Expenses { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(ExpensesAction::List) => commands::cmd_expenses_list(&db),
                Some(ExpensesAction::Add {
                    name,
                    amount,
                    category,
                    pattern,
                }) => commands::cmd_expenses_add(&db, &name, amount, category.as_deref(), &pattern),
                Some(ExpensesAction::Show { id }) => commands::cmd_expenses_show(&db, id),
            }
        }
        Commands::Pattern { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                PatternAction::Set { id, pattern } => commands::cmd_pattern_set(&db, id, &pattern),
                PatternAction::Preview {
                    pattern,
                    after,
                    count,
                } => commands::cmd_pattern_preview(&db, &pattern, after.as_deref(), count),
            }
        }
        Commands::Occurrences { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => commands::cmd_occurrences_list(&db, &WindowArgs::default(), None, None),
                Some(OccurrencesAction::Generate { window, expense }) => {
                    commands::cmd_occurrences_generate(&db, &window, expense)
                }
                Some(OccurrencesAction::List {
                    window,
                    status,
                    expense,
                }) => commands::cmd_occurrences_list(&db, &window, status.as_deref(), expense),
                Some(OccurrencesAction::Complete { id }) => {
                    commands::cmd_occurrences_set_status(&db, id, OccurrenceStatus::Completed)
                }
                Some(OccurrencesAction::Skip { id }) => {
                    commands::cmd_occurrences_set_status(&db, id, OccurrenceStatus::Skipped)
                }
                Some(OccurrencesAction::Reset { id }) => {
                    commands::cmd_occurrences_set_status(&db, id, OccurrenceStatus::Pending)
                }
            }
        }
        Commands::Audit { limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_audit(&db, limit)
        }
        Commands::Serve {
            port,
            host,
            no_auth,
        } => commands::cmd_serve(&cli.db, &host, port, no_auth, cli.no_encrypt).await,
    }
}
