//! # fieldsync engine
//!
//! Drains the fieldsync outbox through a transport.
//!
//! This crate provides:
//! - [`SyncEngine`]: one cycle at a time over a [`SyncContext`]
//! - [`SyncMutex`]: FIFO async lock with re-entrancy detection
//! - Retry with capped exponential backoff and a single retry timer
//! - Conflict detection against the server's version
//! - [`SyncTransport`] abstraction with a scripted [`MockTransport`]
//!
//! ## Cycle
//!
//! A cycle snapshots the pending actions in enqueue order and sends each
//! due one:
//! 1. Success at the base version: applied and removed
//! 2. Success at another version: conflicted, kept for a manual decision
//! 3. Transient failure: retried behind a backoff gate, dead-lettered
//!    once the attempts run out
//! 4. Permanent failure: dead-lettered
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time
//! - Actions are sent in enqueue order
//! - One action's failure never ends the cycle
//! - Conflicts are never retried automatically
//!
//! [`SyncContext`]: fieldsync_core::SyncContext

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod engine;
mod error;
mod mutex;
mod scheduler;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use config::{RetryConfig, SyncConfig, SyncOptions};
pub use engine::{
    ActionFailure, SyncCycleResult, SyncEngine, SyncState, SyncStats, TriggerOutcome,
    TriggerSource,
};
pub use error::{SyncError, SyncResult};
pub use mutex::{HolderId, MutexError, SyncGuard, SyncMutex, Ticket};
pub use scheduler::RetryScheduler;
pub use transport::{Fallback, MockTransport, SendOutcome, SendReceipt, SyncTransport};
