//! Dead-letter commands: list, resolve, requeue.

use super::{open_context, parse_id, short_id, CommandResult};
use fieldsync_core::DeadLetterEntry;
use std::path::Path;

/// Runs the dead-letters command.
pub fn list(path: &Path, format: &str) -> CommandResult<()> {
    let context = open_context(path)?;
    let entries = context.dead_letter_entries();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }
    Ok(())
}

/// Runs the resolve command.
pub fn resolve(path: &Path, id: &str) -> CommandResult<()> {
    let context = open_context(path)?;
    let id = parse_id(id)?;
    context.sink().resolve(&id)?;
    println!("Resolved {id}");
    Ok(())
}

/// Runs the requeue command.
pub fn requeue(path: &Path, id: &str) -> CommandResult<()> {
    let context = open_context(path)?;
    let id = parse_id(id)?;
    let new_id = context.requeue_dead_letter(&id)?;
    println!("Requeued {id} as {new_id}");
    Ok(())
}

fn print_text_output(entries: &[DeadLetterEntry]) {
    println!("Dead letters ({} total)", entries.len());
    println!("================");
    println!();

    for entry in entries {
        println!(
            "{} {:24} attempts={} at={} reason={}",
            short_id(&entry.action.id),
            entry.action.kind,
            entry.action.attempt_count,
            entry.dead_lettered_at.to_rfc3339(),
            entry.reason
        );
        if let Some(ref error) = entry.action.last_error {
            println!("  last error: {error}");
        }
        if let Some(ref conflict) = entry.conflict {
            println!(
                "  conflict: base={} server={}",
                conflict.base_version, conflict.server_version
            );
        }
    }
}
