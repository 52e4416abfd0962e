//! CLI command implementations.

pub mod compact;
pub mod dead_letters;
pub mod dump_journal;
pub mod inspect;
pub mod options;
pub mod queue;

use fieldsync_core::{ActionId, SyncContext};
use std::path::Path;

/// Result type shared by the commands.
pub type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens the context under `path`, which must already exist.
pub fn open_context(path: &Path) -> CommandResult<SyncContext> {
    if !path.is_dir() {
        return Err(format!("No data directory at {:?}", path).into());
    }
    Ok(SyncContext::open_dir(path)?)
}

/// Parses an action id argument.
pub fn parse_id(id: &str) -> CommandResult<ActionId> {
    id.parse::<ActionId>()
        .map_err(|e| format!("Invalid action id {id:?}: {e}").into())
}

/// Shortens an id for text tables.
pub fn short_id(id: &ActionId) -> String {
    id.to_string().chars().take(8).collect()
}
