//! Store commands: enqueue, pending, conflicts, resolve-conflict.

use super::{open_context, parse_id, short_id, CommandResult};
use clap::ValueEnum;
use fieldsync_core::{ActionStatus, ConflictRecord, ConflictResolution, NewAction, PendingAction};
use std::path::Path;
use tracing::info;

/// Conflict decision as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resolution {
    /// Rebase onto the server version and send again
    KeepLocal,
    /// Drop the local change
    AcceptRemote,
    /// Park the action in the dead-letter sink
    DeadLetter,
}

impl From<Resolution> for ConflictResolution {
    fn from(r: Resolution) -> Self {
        match r {
            Resolution::KeepLocal => ConflictResolution::KeepLocal,
            Resolution::AcceptRemote => ConflictResolution::AcceptRemote,
            Resolution::DeadLetter => ConflictResolution::DeadLetter,
        }
    }
}

/// Runs the enqueue command.
pub fn enqueue(path: &Path, kind: &str, payload: &str, base_version: u64) -> CommandResult<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| format!("Payload is not valid JSON: {e}"))?;
    if kind.trim().is_empty() {
        return Err("Action kind must not be empty".into());
    }

    std::fs::create_dir_all(path)?;
    let context = open_context(path)?;
    let id = context.enqueue(NewAction::new(kind, payload, base_version))?;
    info!(%id, kind, "action enqueued");
    println!("{id}");
    Ok(())
}

/// Runs the pending command.
pub fn pending(path: &Path, all: bool, format: &str) -> CommandResult<()> {
    let context = open_context(path)?;
    let actions: Vec<PendingAction> = if all {
        context.store().list()
    } else {
        context.store().list_pending()
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&actions)?);
        }
        _ => {
            print_actions(&actions);
        }
    }
    Ok(())
}

/// Runs the conflicts command.
pub fn conflicts(path: &Path, format: &str) -> CommandResult<()> {
    let context = open_context(path)?;
    let conflicts = context.conflicts();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&conflicts)?);
        }
        _ => {
            print_conflicts(&conflicts);
        }
    }
    Ok(())
}

/// Runs the resolve-conflict command.
pub fn resolve_conflict(path: &Path, id: &str, resolution: Resolution) -> CommandResult<()> {
    let context = open_context(path)?;
    let id = parse_id(id)?;
    context.resolve_conflict(&id, resolution.into())?;
    println!("Resolved {id} ({resolution:?})");
    Ok(())
}

fn print_actions(actions: &[PendingAction]) {
    println!("Actions ({} total)", actions.len());
    println!("================");
    println!();

    for action in actions {
        print!(
            "[{:06}] {} {:13} {:24} base={}",
            action.sequence,
            short_id(&action.id),
            action.status.as_str(),
            action.kind,
            action.base_version
        );
        if action.attempt_count > 0 {
            print!(" attempts={}", action.attempt_count);
        }
        if let Some(at) = action.next_attempt_at {
            if action.status == ActionStatus::Pending {
                print!(" retry_at={}", at.to_rfc3339());
            }
        }
        if let Some(ref error) = action.last_error {
            print!(" error={error:?}");
        }
        println!();
    }
}

fn print_conflicts(conflicts: &[ConflictRecord]) {
    println!("Conflicts ({} total)", conflicts.len());
    println!("================");
    println!();

    for conflict in conflicts {
        println!(
            "{} base={} server={} detected={}",
            conflict.action_id,
            conflict.base_version,
            conflict.server_version,
            conflict.detected_at.to_rfc3339()
        );
        println!("  local:  {}", conflict.local_value);
        if let Some(ref server) = conflict.server_value {
            println!("  server: {server}");
        }
    }
}
