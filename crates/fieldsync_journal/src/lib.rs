//! # fieldsync journal
//!
//! Durable, append-only record journal for the fieldsync outbox.
//!
//! Two layers live here:
//!
//! - [`JournalBackend`]: an opaque byte store ([`FileBackend`] for devices,
//!   [`InMemoryBackend`] for tests and ephemeral queues)
//! - [`Journal`]: CBOR records wrapped in checksummed frames, replayed on
//!   open to rebuild the owner's state
//!
//! The journal knows nothing about pending actions or dead letters; the
//! store and sink in `fieldsync_core` define their own record types.
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_journal::{InMemoryBackend, Journal};
//!
//! let journal = Journal::new(Box::new(InMemoryBackend::new()));
//! journal.append(&("check-in", 42u64)).unwrap();
//! let records: Vec<(String, u64)> = journal.recover().unwrap();
//! assert_eq!(records, vec![("check-in".to_string(), 42)]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
pub mod frame;
mod journal;
mod memory;

pub use backend::JournalBackend;
pub use error::{JournalError, JournalResult};
pub use file::FileBackend;
pub use frame::{Frame, FrameKind};
pub use journal::{decode_record, Journal};
pub use memory::InMemoryBackend;
