//! Compact command implementation.

use super::{open_context, CommandResult};
use std::path::Path;
use tracing::info;

/// Journal sizes before and after a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactReport {
    /// Combined size before compaction.
    pub before: u64,
    /// Combined size after compaction, or `before` on a dry run.
    pub after: u64,
}

/// Compacts both journals under `path`.
pub fn compact(path: &Path, dry_run: bool) -> CommandResult<CompactReport> {
    let context = open_context(path)?;
    let before = context.store().journal_size()? + context.sink().journal_size()?;

    if dry_run {
        return Ok(CompactReport {
            before,
            after: before,
        });
    }

    context.compact()?;
    let after = context.store().journal_size()? + context.sink().journal_size()?;
    info!(before, after, "journals compacted");
    Ok(CompactReport { before, after })
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> CommandResult<()> {
    let context = open_context(path)?;
    let live_actions = context.store().len();
    let live_dead_letters = context.sink().len();
    drop(context);

    let report = compact(path, dry_run)?;

    println!("Compacting journals in {:?}", path);
    println!("  Live actions:      {live_actions}");
    println!("  Live dead letters: {live_dead_letters}");
    println!("  Size before:       {} bytes", report.before);

    if dry_run {
        println!();
        println!("Dry run: nothing rewritten");
    } else {
        println!("  Size after:        {} bytes", report.after);
        println!(
            "  Reclaimed:         {} bytes",
            report.before.saturating_sub(report.after)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{ActionStatus, NewAction, SyncContext};
    use serde_json::json;

    fn churn(dir: &Path) {
        let context = SyncContext::open_dir(dir).unwrap();
        for stop in 0..5 {
            let id = context
                .enqueue(NewAction::new("route.stop_complete", json!({"stop": stop}), 0))
                .unwrap();
            context
                .store()
                .mark_status(&id, ActionStatus::InFlight)
                .unwrap();
            context
                .store()
                .mark_status(&id, ActionStatus::Applied)
                .unwrap();
            context.store().remove(&id).unwrap();
        }
        context
            .enqueue(NewAction::new("route.stop_complete", json!({"stop": 99}), 0))
            .unwrap();
    }

    #[test]
    fn compaction_shrinks_and_keeps_live_actions() {
        let dir = tempfile::tempdir().unwrap();
        churn(dir.path());

        let report = compact(dir.path(), false).unwrap();
        assert!(report.after < report.before);

        let context = SyncContext::open_dir(dir.path()).unwrap();
        assert_eq!(context.pending_count(), 1);
    }

    #[test]
    fn dry_run_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        churn(dir.path());

        let report = compact(dir.path(), true).unwrap();
        assert_eq!(report.before, report.after);

        let again = compact(dir.path(), true).unwrap();
        assert_eq!(again.before, report.before);
    }
}
