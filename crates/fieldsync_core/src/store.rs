//! Durable FIFO store of pending actions.

use crate::action::{ActionId, ActionStatus, NewAction, PendingAction, Version};
use crate::conflict::ConflictRecord;
use crate::error::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use fieldsync_journal::{FileBackend, InMemoryBackend, Journal};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// One journal record per store mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum StoreRecord {
    Enqueued(PendingAction),
    StatusChanged {
        id: ActionId,
        status: ActionStatus,
    },
    Failed {
        id: ActionId,
        attempt_count: u32,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    },
    Conflicted {
        id: ActionId,
        conflict: ConflictRecord,
    },
    Rebased {
        id: ActionId,
        base_version: Version,
    },
    Removed {
        id: ActionId,
    },
}

#[derive(Debug, Default)]
struct StoreState {
    /// Entries keyed by enqueue sequence, so iteration is FIFO.
    entries: BTreeMap<u64, PendingAction>,
    index: HashMap<ActionId, u64>,
    conflicts: HashMap<ActionId, ConflictRecord>,
    next_sequence: u64,
}

impl StoreState {
    fn get(&self, id: &ActionId) -> Option<&PendingAction> {
        self.index.get(id).and_then(|seq| self.entries.get(seq))
    }

    fn get_mut(&mut self, id: &ActionId) -> Option<&mut PendingAction> {
        let seq = *self.index.get(id)?;
        self.entries.get_mut(&seq)
    }

    fn require(&self, id: &ActionId) -> QueueResult<&PendingAction> {
        self.get(id).ok_or(QueueError::NotFound { id: *id })
    }

    fn check_transition(&self, id: &ActionId, to: ActionStatus) -> QueueResult<ActionStatus> {
        let from = self.require(id)?.status;
        if from.can_transition_to(to) {
            Ok(from)
        } else {
            Err(QueueError::InvalidTransition { id: *id, from, to })
        }
    }

    /// Applies a validated or replayed record. Records naming unknown ids
    /// are skipped, which only happens with a hand-edited journal.
    fn apply(&mut self, record: StoreRecord) {
        match record {
            StoreRecord::Enqueued(action) => {
                self.next_sequence = self.next_sequence.max(action.sequence + 1);
                self.index.insert(action.id, action.sequence);
                self.entries.insert(action.sequence, action);
            }
            StoreRecord::StatusChanged { id, status } => {
                if let Some(action) = self.get_mut(&id) {
                    let left_conflict = action.status == ActionStatus::Conflicted
                        && status != ActionStatus::Conflicted;
                    action.status = status;
                    if left_conflict {
                        self.conflicts.remove(&id);
                    }
                } else {
                    warn!(%id, "status change for unknown action");
                }
            }
            StoreRecord::Failed {
                id,
                attempt_count,
                error,
                retry_at,
            } => {
                if let Some(action) = self.get_mut(&id) {
                    action.attempt_count = action.attempt_count.max(attempt_count);
                    action.last_error = Some(error);
                    if retry_at.is_some() {
                        action.status = ActionStatus::Pending;
                        action.next_attempt_at = retry_at;
                    }
                } else {
                    warn!(%id, "failure recorded for unknown action");
                }
            }
            StoreRecord::Conflicted { id, conflict } => {
                if let Some(action) = self.get_mut(&id) {
                    action.status = ActionStatus::Conflicted;
                    self.conflicts.insert(id, conflict);
                } else {
                    warn!(%id, "conflict recorded for unknown action");
                }
            }
            StoreRecord::Rebased { id, base_version } => {
                if let Some(action) = self.get_mut(&id) {
                    action.base_version = base_version;
                    action.status = ActionStatus::Pending;
                    action.next_attempt_at = None;
                    self.conflicts.remove(&id);
                } else {
                    warn!(%id, "rebase for unknown action");
                }
            }
            StoreRecord::Removed { id } => {
                if let Some(seq) = self.index.remove(&id) {
                    self.entries.remove(&seq);
                }
                self.conflicts.remove(&id);
            }
        }
    }
}

/// Counts of stored actions per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Waiting to be sent.
    pub pending: usize,
    /// Being sent.
    pub in_flight: usize,
    /// Awaiting manual conflict resolution.
    pub conflicted: usize,
}

/// The action record store.
///
/// Owns every action while it is pending, in flight or conflicted. Each
/// mutation is validated, appended to the journal and flushed before the
/// in-memory view changes, so a crash never exposes a state that was not
/// persisted.
///
/// # Recovery
///
/// Opening a store replays its journal. Actions left in flight by a crash
/// return to pending with their attempt count untouched, and actions that
/// were marked applied but not yet removed are dropped.
pub struct ActionStore {
    journal: Journal,
    state: RwLock<StoreState>,
}

impl ActionStore {
    /// Opens a store over `journal`, replaying and recovering its contents.
    ///
    /// # Errors
    ///
    /// Fails if the journal is corrupted or cannot be written.
    pub fn open(journal: Journal) -> QueueResult<Self> {
        let records: Vec<StoreRecord> = journal.recover()?;
        let mut state = StoreState::default();
        let replayed = records.len();
        for record in records {
            state.apply(record);
        }

        let store = Self {
            journal,
            state: RwLock::new(state),
        };
        store.recover_interrupted()?;

        debug!(
            records = replayed,
            entries = store.len(),
            "action store opened"
        );
        Ok(store)
    }

    /// Opens or creates a file-backed store at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or its journal is corrupted.
    pub fn open_path(path: &Path) -> QueueResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(Journal::new(Box::new(backend)))
    }

    /// Creates an empty, non-durable store.
    pub fn in_memory() -> Self {
        Self {
            journal: Journal::new(Box::new(InMemoryBackend::new())),
            state: RwLock::new(StoreState::default()),
        }
    }

    fn recover_interrupted(&self) -> QueueResult<()> {
        let mut state = self.state.write();
        let stale: Vec<(ActionId, ActionStatus)> = state
            .entries
            .values()
            .filter(|a| matches!(a.status, ActionStatus::InFlight | ActionStatus::Applied))
            .map(|a| (a.id, a.status))
            .collect();

        for (id, status) in stale {
            let record = if status == ActionStatus::InFlight {
                warn!(%id, "action was in flight at shutdown, returning it to pending");
                StoreRecord::StatusChanged {
                    id,
                    status: ActionStatus::Pending,
                }
            } else {
                StoreRecord::Removed { id }
            };
            self.journal.append(&record)?;
            state.apply(record);
        }
        Ok(())
    }

    fn commit(&self, state: &mut StoreState, record: StoreRecord) -> QueueResult<()> {
        self.journal.append(&record)?;
        state.apply(record);
        Ok(())
    }

    /// Appends a new action in arrival order and returns its id.
    ///
    /// The action is durable when this returns.
    ///
    /// # Errors
    ///
    /// Fails if the journal write fails.
    pub fn enqueue(&self, new: NewAction) -> QueueResult<ActionId> {
        let mut state = self.state.write();
        let id = ActionId::new();
        let action = PendingAction::from_new(id, state.next_sequence, new, Utc::now());
        debug!(%id, kind = %action.kind, sequence = action.sequence, "enqueued action");
        self.commit(&mut state, StoreRecord::Enqueued(action))?;
        Ok(id)
    }

    /// Inserts an already-built action, keeping its id.
    ///
    /// The action is given the next sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Duplicate`] if the id is already stored.
    pub fn insert(&self, mut action: PendingAction) -> QueueResult<()> {
        let mut state = self.state.write();
        if state.index.contains_key(&action.id) {
            return Err(QueueError::Duplicate { id: action.id });
        }
        action.sequence = state.next_sequence;
        self.commit(&mut state, StoreRecord::Enqueued(action))
    }

    /// Returns pending actions in enqueue order.
    pub fn list_pending(&self) -> Vec<PendingAction> {
        self.state
            .read()
            .entries
            .values()
            .filter(|a| a.status == ActionStatus::Pending)
            .cloned()
            .collect()
    }

    /// Returns every stored action in enqueue order.
    pub fn list(&self) -> Vec<PendingAction> {
        self.state.read().entries.values().cloned().collect()
    }

    /// Returns the action with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if absent.
    pub fn get(&self, id: &ActionId) -> QueueResult<PendingAction> {
        self.state.read().require(id).cloned()
    }

    /// Returns true if an action with `id` is stored.
    pub fn contains(&self, id: &ActionId) -> bool {
        self.state.read().index.contains_key(id)
    }

    /// Number of stored actions, any status.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of actions waiting to be sent.
    pub fn pending_count(&self) -> usize {
        self.state
            .read()
            .entries
            .values()
            .filter(|a| a.status == ActionStatus::Pending)
            .count()
    }

    /// Counts of stored actions per status.
    pub fn status_counts(&self) -> StatusCounts {
        let state = self.state.read();
        let mut counts = StatusCounts::default();
        for action in state.entries.values() {
            match action.status {
                ActionStatus::Pending => counts.pending += 1,
                ActionStatus::InFlight => counts.in_flight += 1,
                ActionStatus::Conflicted => counts.conflicted += 1,
                ActionStatus::Applied | ActionStatus::DeadLettered => {}
            }
        }
        counts
    }

    /// Deletes the action with `id` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if absent.
    pub fn remove(&self, id: &ActionId) -> QueueResult<PendingAction> {
        let mut state = self.state.write();
        let action = state.require(id)?.clone();
        self.commit(&mut state, StoreRecord::Removed { id: *id })?;
        Ok(action)
    }

    /// Moves the action to `status`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if absent or
    /// [`QueueError::InvalidTransition`] if the lifecycle forbids the move.
    pub fn mark_status(&self, id: &ActionId, status: ActionStatus) -> QueueResult<()> {
        let mut state = self.state.write();
        let from = state.check_transition(id, status)?;
        debug!(%id, %from, to = %status, "action status changed");
        self.commit(&mut state, StoreRecord::StatusChanged { id: *id, status })
    }

    /// Records a failed send of an in-flight action.
    ///
    /// Increments the attempt count and keeps `error`. With `retry_at` the
    /// action returns to pending behind that backoff gate; without it the
    /// action stays in flight for the caller to dead-letter.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if absent or
    /// [`QueueError::InvalidTransition`] if the action is not in flight.
    pub fn record_failure(
        &self,
        id: &ActionId,
        error: impl Into<String>,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<PendingAction> {
        let mut state = self.state.write();
        let current = state.require(id)?;
        if current.status != ActionStatus::InFlight {
            return Err(QueueError::InvalidTransition {
                id: *id,
                from: current.status,
                to: ActionStatus::Pending,
            });
        }

        let attempt_count = current.attempt_count.saturating_add(1);
        self.commit(
            &mut state,
            StoreRecord::Failed {
                id: *id,
                attempt_count,
                error: error.into(),
                retry_at,
            },
        )?;
        state.require(id).cloned()
    }

    /// Marks an in-flight action conflicted and keeps the conflict record.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] or [`QueueError::InvalidTransition`].
    pub fn mark_conflicted(&self, id: &ActionId, conflict: ConflictRecord) -> QueueResult<()> {
        let mut state = self.state.write();
        state.check_transition(id, ActionStatus::Conflicted)?;
        self.commit(&mut state, StoreRecord::Conflicted { id: *id, conflict })
    }

    /// Returns a conflicted action to pending against a new base version.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] or [`QueueError::InvalidTransition`]
    /// if the action is not conflicted.
    pub fn rebase(&self, id: &ActionId, base_version: Version) -> QueueResult<()> {
        let mut state = self.state.write();
        let from = state.require(id)?.status;
        if from != ActionStatus::Conflicted {
            return Err(QueueError::InvalidTransition {
                id: *id,
                from,
                to: ActionStatus::Pending,
            });
        }
        self.commit(&mut state, StoreRecord::Rebased { id: *id, base_version })
    }

    /// Returns the conflict record kept for `id`, if any.
    pub fn conflict(&self, id: &ActionId) -> Option<ConflictRecord> {
        self.state.read().conflicts.get(id).cloned()
    }

    /// Returns every kept conflict record in enqueue order.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        let state = self.state.read();
        state
            .entries
            .values()
            .filter_map(|a| state.conflicts.get(&a.id).cloned())
            .collect()
    }

    /// Rewrites the journal so it holds only live entries.
    ///
    /// # Errors
    ///
    /// Fails if the journal rewrite fails.
    pub fn compact(&self) -> QueueResult<()> {
        let state = self.state.read();
        let mut records = Vec::with_capacity(state.entries.len());
        for action in state.entries.values() {
            records.push(StoreRecord::Enqueued(action.clone()));
            if let Some(conflict) = state.conflicts.get(&action.id) {
                records.push(StoreRecord::Conflicted {
                    id: action.id,
                    conflict: conflict.clone(),
                });
            }
        }
        self.journal.rewrite(&records)?;
        debug!(entries = state.entries.len(), "action journal compacted");
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

impl std::fmt::Debug for ActionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionStore")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
