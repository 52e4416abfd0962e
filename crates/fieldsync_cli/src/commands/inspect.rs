//! Inspect command implementation.

use super::{open_context, CommandResult};
use fieldsync_core::StatusCounts;
use serde::Serialize;
use std::path::Path;

/// Data directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory path.
    pub path: String,
    /// Stored actions per status.
    pub actions: StatusCounts,
    /// Number of dead-letter entries.
    pub dead_letters: usize,
    /// Action journal size in bytes.
    pub actions_journal_size: u64,
    /// Dead-letter journal size in bytes.
    pub dead_letter_journal_size: u64,
    /// Total size in bytes.
    pub total_size: u64,
}

/// Collects the inspection result for `path`.
pub fn inspect(path: &Path) -> CommandResult<InspectResult> {
    let context = open_context(path)?;
    let actions_journal_size = context.store().journal_size()?;
    let dead_letter_journal_size = context.sink().journal_size()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        actions: context.store().status_counts(),
        dead_letters: context.sink().len(),
        actions_journal_size,
        dead_letter_journal_size,
        total_size: actions_journal_size + dead_letter_journal_size,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult<()> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("fieldsync data directory: {}", result.path);
    println!();
    println!("Actions:");
    println!("  Pending:     {}", result.actions.pending);
    println!("  In flight:   {}", result.actions.in_flight);
    println!("  Conflicted:  {}", result.actions.conflicted);
    println!("Dead letters:  {}", result.dead_letters);
    println!();
    println!("Journals:");
    println!("  Actions:      {} bytes", result.actions_journal_size);
    println!("  Dead letters: {} bytes", result.dead_letter_journal_size);
    println!("  Total:        {} bytes", result.total_size);
}
