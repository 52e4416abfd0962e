//! # fieldsync core
//!
//! The durable half of the fieldsync outbox.
//!
//! This crate provides:
//! - [`PendingAction`] and its status lifecycle
//! - [`ActionStore`]: FIFO, journal-backed store of unsynced actions
//! - [`ConflictDetector`]: base version vs. server version classification
//! - [`DeadLetterSink`]: terminal storage for actions needing a human
//! - [`SyncContext`]: store + sink with exclusive moves between them
//!
//! ## Key Invariants
//!
//! - `list_pending()` returns actions in enqueue order
//! - `attempt_count` never decreases
//! - an action id lives in exactly one of the store and the sink
//! - every mutation is journaled before it becomes visible
//! - conflicts are never merged automatically

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod conflict;
mod context;
mod dead_letter;
mod error;
mod store;

pub use action::{ActionId, ActionStatus, NewAction, PendingAction, Version};
pub use conflict::{
    ConflictCheck, ConflictDetector, ConflictPolicy, ConflictRecord, ConflictResolution,
};
pub use context::{SyncContext, ACTIONS_JOURNAL, DEAD_LETTER_JOURNAL, LOCK_FILE};
pub use dead_letter::{DeadLetterEntry, DeadLetterReason, DeadLetterSink};
pub use error::{QueueError, QueueResult};
pub use store::{ActionStore, StatusCounts};
