//! Terminal storage for actions that cannot be applied automatically.

use crate::action::{ActionId, ActionStatus, PendingAction};
use crate::conflict::ConflictRecord;
use crate::error::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use fieldsync_journal::{FileBackend, InMemoryBackend, Journal};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Why an action was dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum DeadLetterReason {
    /// Transient failures used up every attempt.
    MaxRetriesExceeded,
    /// The server rejected the action outright.
    PermanentFailure(String),
    /// A version conflict was routed here instead of being resolved.
    UnresolvedConflict,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::MaxRetriesExceeded => f.write_str("max retries exceeded"),
            DeadLetterReason::PermanentFailure(detail) => {
                write!(f, "permanent failure: {detail}")
            }
            DeadLetterReason::UnresolvedConflict => f.write_str("unresolved conflict"),
        }
    }
}

/// An action parked for manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The action, with status [`ActionStatus::DeadLettered`].
    pub action: PendingAction,
    /// Why it landed here.
    pub reason: DeadLetterReason,
    /// When it landed here.
    pub dead_lettered_at: DateTime<Utc>,
    /// The conflict that sent it here, if any.
    pub conflict: Option<ConflictRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SinkRecord {
    Added(DeadLetterEntry),
    Resolved { id: ActionId },
}

/// The dead-letter sink.
///
/// Entries only leave through an explicit [`DeadLetterSink::resolve`] or
/// [`DeadLetterSink::take`]; nothing here is retried.
pub struct DeadLetterSink {
    journal: Journal,
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl DeadLetterSink {
    /// Opens a sink over `journal`, replaying its contents.
    ///
    /// # Errors
    ///
    /// Fails if the journal is corrupted.
    pub fn open(journal: Journal) -> QueueResult<Self> {
        let records: Vec<SinkRecord> = journal.recover()?;
        let mut entries: Vec<DeadLetterEntry> = Vec::new();
        for record in records {
            match record {
                SinkRecord::Added(entry) => {
                    entries.retain(|e| e.action.id != entry.action.id);
                    entries.push(entry);
                }
                SinkRecord::Resolved { id } => entries.retain(|e| e.action.id != id),
            }
        }

        debug!(entries = entries.len(), "dead-letter sink opened");
        Ok(Self {
            journal,
            entries: RwLock::new(entries),
        })
    }

    /// Opens or creates a file-backed sink at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or its journal is corrupted.
    pub fn open_path(path: &Path) -> QueueResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(Journal::new(Box::new(backend)))
    }

    /// Creates an empty, non-durable sink.
    pub fn in_memory() -> Self {
        Self {
            journal: Journal::new(Box::new(InMemoryBackend::new())),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Stores `action` with `reason`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Duplicate`] if the id is already parked, or a
    /// journal error.
    pub fn add(&self, action: PendingAction, reason: DeadLetterReason) -> QueueResult<()> {
        self.add_with_conflict(action, reason, None)
    }

    /// Stores `action` with `reason` and the conflict that caused it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Duplicate`] if the id is already parked, or a
    /// journal error.
    pub fn add_with_conflict(
        &self,
        mut action: PendingAction,
        reason: DeadLetterReason,
        conflict: Option<ConflictRecord>,
    ) -> QueueResult<()> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.action.id == action.id) {
            return Err(QueueError::Duplicate { id: action.id });
        }

        action.status = ActionStatus::DeadLettered;
        let entry = DeadLetterEntry {
            action,
            reason,
            dead_lettered_at: Utc::now(),
            conflict,
        };
        self.journal.append(&SinkRecord::Added(entry.clone()))?;
        info!(id = %entry.action.id, reason = %entry.reason, "action dead-lettered");
        entries.push(entry);
        Ok(())
    }

    /// Returns every entry in the order it was added.
    pub fn list(&self) -> Vec<DeadLetterEntry> {
        self.entries.read().clone()
    }

    /// Returns the entry for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if absent.
    pub fn get(&self, id: &ActionId) -> QueueResult<DeadLetterEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.action.id == *id)
            .cloned()
            .ok_or(QueueError::NotFound { id: *id })
    }

    /// Returns true if `id` is parked here.
    pub fn contains(&self, id: &ActionId) -> bool {
        self.entries.read().iter().any(|e| e.action.id == *id)
    }

    /// Number of parked entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes an entry after it was handled outside the engine.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if absent.
    pub fn resolve(&self, id: &ActionId) -> QueueResult<()> {
        self.take(id).map(|_| ())
    }

    /// Removes an entry and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if absent.
    pub fn take(&self, id: &ActionId) -> QueueResult<DeadLetterEntry> {
        let mut entries = self.entries.write();
        let pos = entries
            .iter()
            .position(|e| e.action.id == *id)
            .ok_or(QueueError::NotFound { id: *id })?;

        self.journal.append(&SinkRecord::Resolved { id: *id })?;
        debug!(%id, "dead-letter entry resolved");
        Ok(entries.remove(pos))
    }

    /// Rewrites the journal so it holds only parked entries.
    ///
    /// # Errors
    ///
    /// Fails if the journal rewrite fails.
    pub fn compact(&self) -> QueueResult<()> {
        let entries = self.entries.read();
        let records: Vec<SinkRecord> = entries.iter().cloned().map(SinkRecord::Added).collect();
        self.journal.rewrite(&records)?;
        Ok(())
    }

    /// Size of the backing journal in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot report its size.
    pub fn journal_size(&self) -> QueueResult<u64> {
        Ok(self.journal.size()?)
    }
}

impl std::fmt::Debug for DeadLetterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterSink")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
