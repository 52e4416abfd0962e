//! Error types for the sync engine.

use crate::mutex::{HolderId, MutexError};
use fieldsync_core::QueueError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced to callers of the engine.
///
/// Transport failures are not here: they are handled inside a cycle and
/// show up as counts in the cycle result or as dead-letter entries.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Store or sink integrity error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The caller already holds the sync lock.
    #[error("sync lock already held by {holder}")]
    Reentrancy {
        /// The logical caller that tried to lock twice.
        holder: HolderId,
    },

    /// The sync lock went away while waiting.
    #[error("sync lock closed while waiting")]
    LockClosed,

    /// Configuration is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Options could not be read or parsed.
    #[error("could not load options: {0}")]
    Options(String),

    /// The engine was shut down.
    #[error("sync engine shut down")]
    ShutDown,
}

impl From<MutexError> for SyncError {
    fn from(err: MutexError) -> Self {
        match err {
            MutexError::Reentrancy { holder } => SyncError::Reentrancy { holder },
            MutexError::Closed => SyncError::LockClosed,
        }
    }
}

impl SyncError {
    /// Returns true if the error points at a bug in the caller or a
    /// damaged journal rather than a runtime condition.
    pub fn is_integrity(&self) -> bool {
        matches!(self, SyncError::Queue(_) | SyncError::Reentrancy { .. })
    }
}
