//! Error types for the action store and dead-letter sink.

use crate::action::{ActionId, ActionStatus};
use fieldsync_journal::JournalError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Integrity errors raised by the store, the sink and the sync context.
///
/// These indicate a logic bug or a damaged journal and are never retried.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No entry with this id exists.
    #[error("action not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: ActionId,
    },

    /// The requested status change is not part of the action lifecycle.
    #[error("invalid transition for action {id}: {from} -> {to}")]
    InvalidTransition {
        /// The action.
        id: ActionId,
        /// Current status.
        from: ActionStatus,
        /// Requested status.
        to: ActionStatus,
    },

    /// An entry with this id already exists.
    #[error("duplicate action id: {id}")]
    Duplicate {
        /// The colliding id.
        id: ActionId,
    },

    /// Another process holds the data directory.
    #[error("data directory {} is locked by another process", path.display())]
    DirectoryLocked {
        /// The locked directory.
        path: PathBuf,
    },

    /// The underlying journal failed.
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
}

impl QueueError {
    /// Returns true for [`QueueError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound { .. })
    }
}
