//! fieldsync CLI
//!
//! Operator tools for a fieldsync data directory.
//!
//! # Commands
//!
//! - `enqueue` - Record an action in the store
//! - `pending` - List queued actions
//! - `conflicts` / `resolve-conflict` - Review and decide conflicts
//! - `dead-letters` / `resolve` / `requeue` - Work the dead-letter sink
//! - `inspect` - Show counts and journal sizes
//! - `dump-journal` - Dump raw journal records for debugging
//! - `compact` - Rewrite journals with live entries only
//! - `check-options` - Validate a sync options file

mod commands;

use clap::{Parser, Subcommand};
use commands::dump_journal::JournalName;
use commands::queue::Resolution;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// fieldsync command-line tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an action in the store
    Enqueue {
        /// Action kind, e.g. tm_ticket.update
        #[arg(short, long)]
        kind: String,

        /// Action payload as JSON
        #[arg(long)]
        payload: String,

        /// Server version the change was made against
        #[arg(short, long, default_value = "0")]
        base_version: u64,
    },

    /// List queued actions
    Pending {
        /// Include in-flight and conflicted actions
        #[arg(short, long)]
        all: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List conflicts awaiting a decision
    Conflicts {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Apply a decision to a conflicted action
    ResolveConflict {
        /// Action id
        id: String,

        /// What to do with the local change
        #[arg(short, long, value_enum)]
        resolution: Resolution,
    },

    /// List dead-letter entries
    DeadLetters {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove a dead-letter entry handled elsewhere
    Resolve {
        /// Action id
        id: String,
    },

    /// Move a dead-letter entry back into the store
    Requeue {
        /// Action id
        id: String,
    },

    /// Show counts per status and journal sizes
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump journal records for debugging
    DumpJournal {
        /// Which journal to read
        #[arg(value_enum)]
        journal: JournalName,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite both journals with live entries only
    Compact {
        /// Dry run - show sizes without rewriting
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Validate a sync options file
    CheckOptions {
        /// JSON options file
        file: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Enqueue {
            kind,
            payload,
            base_version,
        } => {
            let path = cli.path.ok_or("Data directory required for enqueue")?;
            commands::queue::enqueue(&path, &kind, &payload, base_version)?;
        }
        Commands::Pending { all, format } => {
            let path = cli.path.ok_or("Data directory required for pending")?;
            commands::queue::pending(&path, all, &format)?;
        }
        Commands::Conflicts { format } => {
            let path = cli.path.ok_or("Data directory required for conflicts")?;
            commands::queue::conflicts(&path, &format)?;
        }
        Commands::ResolveConflict { id, resolution } => {
            let path = cli.path.ok_or("Data directory required for resolve-conflict")?;
            commands::queue::resolve_conflict(&path, &id, resolution)?;
        }
        Commands::DeadLetters { format } => {
            let path = cli.path.ok_or("Data directory required for dead-letters")?;
            commands::dead_letters::list(&path, &format)?;
        }
        Commands::Resolve { id } => {
            let path = cli.path.ok_or("Data directory required for resolve")?;
            commands::dead_letters::resolve(&path, &id)?;
        }
        Commands::Requeue { id } => {
            let path = cli.path.ok_or("Data directory required for requeue")?;
            commands::dead_letters::requeue(&path, &id)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Data directory required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::DumpJournal {
            journal,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Data directory required for dump-journal")?;
            commands::dump_journal::run(&path, journal, limit, &format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Data directory required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::CheckOptions { file } => {
            commands::options::run(&file)?;
        }
        Commands::Version => {
            println!("fieldsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
