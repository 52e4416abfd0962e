//! The store and sink a sync engine works over.

use crate::action::{ActionId, ActionStatus, NewAction, PendingAction};
use crate::conflict::{ConflictRecord, ConflictResolution};
use crate::dead_letter::{DeadLetterEntry, DeadLetterReason, DeadLetterSink};
use crate::error::{QueueError, QueueResult};
use crate::store::ActionStore;
use chrono::Utc;
use fieldsync_journal::JournalError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the action journal inside a data directory.
pub const ACTIONS_JOURNAL: &str = "actions.journal";

/// File name of the dead-letter journal inside a data directory.
pub const DEAD_LETTER_JOURNAL: &str = "dead_letters.journal";

/// File name of the advisory single-opener lock inside a data directory.
pub const LOCK_FILE: &str = "LOCK";

/// The mutable shared state of one sync domain.
///
/// Passed to the engine explicitly, so tests and independent domains each
/// get their own. Moves between store and sink go through here to keep
/// exactly one owner per action id.
///
/// A context opened with [`SyncContext::open_dir`] holds an exclusive lock
/// on the directory until it is dropped.
#[derive(Debug)]
pub struct SyncContext {
    store: ActionStore,
    sink: DeadLetterSink,
    /// Released on drop.
    _lock: Option<File>,
}

impl SyncContext {
    /// Combines an opened store and sink, finishing moves a crash cut short.
    ///
    /// - an id present in both (dead-lettering stopped after the sink
    ///   write) is dropped from the store
    /// - a sink entry whose requeued copy is already stored (requeue
    ///   stopped after the enqueue) is resolved
    ///
    /// # Errors
    ///
    /// Fails if a reconciling write cannot be journaled.
    pub fn new(store: ActionStore, sink: DeadLetterSink) -> QueueResult<Self> {
        for entry in sink.list() {
            if store.contains(&entry.action.id) {
                warn!(id = %entry.action.id, "action found in store and dead-letter sink, keeping sink entry");
                store.remove(&entry.action.id)?;
            }
        }
        for action in store.list() {
            let Some(origin) = action.requeued_from else {
                continue;
            };
            if sink.contains(&origin) {
                warn!(%origin, id = %action.id, "requeued entry still in dead-letter sink, resolving it");
                sink.resolve(&origin)?;
            }
        }
        Ok(Self {
            store,
            sink,
            _lock: None,
        })
    }

    /// Opens both journals under `dir`, creating it if needed.
    ///
    /// Takes an exclusive lock on `dir` first, so a second opener in any
    /// process fails instead of interleaving appends with this one.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DirectoryLocked`] if another context holds the
    /// directory, or fails if either journal cannot be opened or is
    /// corrupted.
    pub fn open_dir(dir: &Path) -> QueueResult<Self> {
        let lock = Self::lock_dir(dir)?;
        let store = ActionStore::open_path(&dir.join(ACTIONS_JOURNAL))?;
        let sink = DeadLetterSink::open_path(&dir.join(DEAD_LETTER_JOURNAL))?;
        let mut context = Self::new(store, sink)?;
        context._lock = Some(lock);
        Ok(context)
    }

    fn lock_dir(dir: &Path) -> QueueResult<File> {
        fs::create_dir_all(dir).map_err(JournalError::from)?;
        let lock_path = dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(JournalError::from)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(QueueError::DirectoryLocked {
                path: dir.to_path_buf(),
            });
        }
        debug!(path = %lock_path.display(), "data directory locked");
        Ok(lock_file)
    }

    /// Creates a non-durable context.
    pub fn in_memory() -> Self {
        Self {
            store: ActionStore::in_memory(),
            sink: DeadLetterSink::in_memory(),
            _lock: None,
        }
    }

    /// Journal paths for a data directory.
    pub fn journal_paths(dir: &Path) -> (PathBuf, PathBuf) {
        (dir.join(ACTIONS_JOURNAL), dir.join(DEAD_LETTER_JOURNAL))
    }

    /// The action record store.
    pub fn store(&self) -> &ActionStore {
        &self.store
    }

    /// The dead-letter sink.
    pub fn sink(&self) -> &DeadLetterSink {
        &self.sink
    }

    /// Moves an in-flight or conflicted action into the sink.
    ///
    /// The sink entry is written before the store entry is removed; if the
    /// process dies in between, [`SyncContext::new`] finishes the move.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] or [`QueueError::InvalidTransition`].
    pub fn dead_letter(
        &self,
        id: &ActionId,
        reason: DeadLetterReason,
        conflict: Option<ConflictRecord>,
    ) -> QueueResult<()> {
        let action = self.store.get(id)?;
        if !action.status.can_transition_to(ActionStatus::DeadLettered) {
            return Err(QueueError::InvalidTransition {
                id: *id,
                from: action.status,
                to: ActionStatus::DeadLettered,
            });
        }

        let conflict = conflict.or_else(|| self.store.conflict(id));
        self.sink.add_with_conflict(action, reason, conflict)?;
        self.store.remove(id)?;
        Ok(())
    }

    /// Applies a manual decision to a conflicted action.
    ///
    /// - `KeepLocal` rebases onto the server version seen in the conflict
    ///   and makes the action pending again
    /// - `AcceptRemote` drops the action
    /// - `DeadLetter` parks it with reason "unresolved conflict"
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if absent, or
    /// [`QueueError::InvalidTransition`] if the action is not conflicted.
    pub fn resolve_conflict(
        &self,
        id: &ActionId,
        resolution: ConflictResolution,
    ) -> QueueResult<()> {
        let action = self.store.get(id)?;
        if action.status != ActionStatus::Conflicted {
            return Err(QueueError::InvalidTransition {
                id: *id,
                from: action.status,
                to: match resolution {
                    ConflictResolution::DeadLetter => ActionStatus::DeadLettered,
                    _ => ActionStatus::Pending,
                },
            });
        }

        match resolution {
            ConflictResolution::KeepLocal => {
                let base_version = self
                    .store
                    .conflict(id)
                    .map_or(action.base_version, |c| c.server_version);
                self.store.rebase(id, base_version)?;
            }
            ConflictResolution::AcceptRemote => {
                self.store.remove(id)?;
            }
            ConflictResolution::DeadLetter => {
                self.dead_letter(id, DeadLetterReason::UnresolvedConflict, None)?;
            }
        }

        info!(%id, ?resolution, "conflict resolved");
        Ok(())
    }

    /// Takes a dead-lettered action out of the sink and enqueues its payload
    /// as a fresh action with a new id.
    ///
    /// The new action records the entry it came from, so a crash between
    /// the enqueue and the sink resolve is finished by
    /// [`SyncContext::new`] instead of leaving both live.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if the id is not parked.
    pub fn requeue_dead_letter(&self, id: &ActionId) -> QueueResult<ActionId> {
        let entry = self.sink.get(id)?;
        let base_version = entry
            .conflict
            .as_ref()
            .map_or(entry.action.base_version, |c| c.server_version);
        let new = NewAction {
            kind: entry.action.kind,
            payload: entry.action.payload,
            base_version,
        };
        let mut action = PendingAction::from_new(ActionId::new(), 0, new, Utc::now());
        action.requeued_from = Some(*id);
        let new_id = action.id;
        self.store.insert(action)?;
        self.sink.resolve(id)?;

        info!(old = %id, new = %new_id, "dead-letter entry requeued");
        Ok(new_id)
    }

    /// Enqueues a new action.
    ///
    /// # Errors
    ///
    /// Fails if the journal write fails.
    pub fn enqueue(&self, new: NewAction) -> QueueResult<ActionId> {
        self.store.enqueue(new)
    }

    /// Number of actions waiting to be sent.
    pub fn pending_count(&self) -> usize {
        self.store.pending_count()
    }

    /// Every dead-letter entry.
    pub fn dead_letter_entries(&self) -> Vec<DeadLetterEntry> {
        self.sink.list()
    }

    /// Every conflict awaiting manual resolution.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.store.conflicts()
    }

    /// Conflicted actions, in enqueue order.
    pub fn conflicted_actions(&self) -> Vec<PendingAction> {
        self.store
            .list()
            .into_iter()
            .filter(|a| a.status == ActionStatus::Conflicted)
            .collect()
    }

    /// Compacts both journals.
    ///
    /// # Errors
    ///
    /// Fails if either rewrite fails.
    pub fn compact(&self) -> QueueResult<()> {
        self.store.compact()?;
        self.sink.compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Version;
    use crate::conflict::{ConflictCheck, ConflictDetector};
    use fieldsync_journal::{InMemoryBackend, Journal};
    use serde_json::json;

    fn conflicted(ctx: &SyncContext, base: u64, server: u64) -> ActionId {
        let id = ctx
            .enqueue(NewAction::new("crew.check_in", json!({"crew": 9}), base))
            .unwrap();
        ctx.store().mark_status(&id, ActionStatus::InFlight).unwrap();
        let action = ctx.store().get(&id).unwrap();
        let ConflictCheck::Conflict(record) =
            ConflictDetector::new().check(&action, Version(server), None, Utc::now())
        else {
            panic!("expected conflict");
        };
        ctx.store().mark_conflicted(&id, *record).unwrap();
        id
    }

    #[test]
    fn dead_letter_moves_exclusively() {
        let ctx = SyncContext::in_memory();
        let id = ctx
            .enqueue(NewAction::new("crew.check_in", json!({}), 1))
            .unwrap();
        ctx.store().mark_status(&id, ActionStatus::InFlight).unwrap();

        ctx.dead_letter(&id, DeadLetterReason::MaxRetriesExceeded, None)
            .unwrap();
        assert!(!ctx.store().contains(&id));
        assert!(ctx.sink().contains(&id));
    }

    #[test]
    fn dead_letter_requires_in_flight_or_conflicted() {
        let ctx = SyncContext::in_memory();
        let id = ctx
            .enqueue(NewAction::new("crew.check_in", json!({}), 1))
            .unwrap();

        let err = ctx
            .dead_letter(&id, DeadLetterReason::MaxRetriesExceeded, None)
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));
        assert!(ctx.sink().is_empty());
    }

    #[test]
    fn keep_local_rebases_onto_server_version() {
        let ctx = SyncContext::in_memory();
        let id = conflicted(&ctx, 5, 7);

        ctx.resolve_conflict(&id, ConflictResolution::KeepLocal)
            .unwrap();
        let action = ctx.store().get(&id).unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.base_version, Version(7));
        assert!(ctx.conflicts().is_empty());
    }

    #[test]
    fn accept_remote_drops_action() {
        let ctx = SyncContext::in_memory();
        let id = conflicted(&ctx, 5, 7);

        ctx.resolve_conflict(&id, ConflictResolution::AcceptRemote)
            .unwrap();
        assert!(!ctx.store().contains(&id));
        assert!(!ctx.sink().contains(&id));
    }

    #[test]
    fn dead_letter_resolution_keeps_conflict() {
        let ctx = SyncContext::in_memory();
        let id = conflicted(&ctx, 5, 7);

        ctx.resolve_conflict(&id, ConflictResolution::DeadLetter)
            .unwrap();
        let entry = ctx.sink().get(&id).unwrap();
        assert_eq!(entry.reason, DeadLetterReason::UnresolvedConflict);
        assert_eq!(entry.conflict.unwrap().server_version, Version(7));
        assert!(!ctx.store().contains(&id));
    }

    #[test]
    fn resolving_a_pending_action_is_invalid() {
        let ctx = SyncContext::in_memory();
        let id = ctx
            .enqueue(NewAction::new("crew.check_in", json!({}), 1))
            .unwrap();

        assert!(matches!(
            ctx.resolve_conflict(&id, ConflictResolution::KeepLocal),
            Err(QueueError::InvalidTransition { .. })
        ));
        assert!(ctx
            .resolve_conflict(&ActionId::new(), ConflictResolution::KeepLocal)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn requeue_creates_fresh_action() {
        let ctx = SyncContext::in_memory();
        let id = conflicted(&ctx, 2, 6);
        ctx.resolve_conflict(&id, ConflictResolution::DeadLetter)
            .unwrap();

        let new_id = ctx.requeue_dead_letter(&id).unwrap();
        assert_ne!(new_id, id);
        assert!(ctx.sink().is_empty());
        let action = ctx.store().get(&new_id).unwrap();
        assert_eq!(action.attempt_count, 0);
        assert_eq!(action.base_version, Version(6));
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.requeued_from, Some(id));
    }

    #[test]
    fn reconciles_crash_between_requeue_and_resolve() {
        let store_bytes = InMemoryBackend::new();
        let sink_bytes = InMemoryBackend::new();

        let (old_id, new_id) = {
            let store = ActionStore::open(Journal::new(Box::new(store_bytes.clone()))).unwrap();
            let sink = DeadLetterSink::open(Journal::new(Box::new(sink_bytes.clone()))).unwrap();
            let ctx = SyncContext::new(store, sink).unwrap();
            let old_id = ctx
                .enqueue(NewAction::new("tm_ticket.update", json!({"hours": 3}), 1))
                .unwrap();
            ctx.store().mark_status(&old_id, ActionStatus::InFlight).unwrap();
            ctx.dead_letter(&old_id, DeadLetterReason::PermanentFailure("500".into()), None)
                .unwrap();

            // The requeued copy reached disk but the sink resolve did not.
            let entry = ctx.sink().get(&old_id).unwrap();
            let mut copy = PendingAction::from_new(
                ActionId::new(),
                0,
                NewAction::new(entry.action.kind, entry.action.payload, 1),
                Utc::now(),
            );
            copy.requeued_from = Some(old_id);
            let new_id = copy.id;
            ctx.store().insert(copy).unwrap();
            (old_id, new_id)
        };

        let ctx = SyncContext::new(
            ActionStore::open(Journal::new(Box::new(store_bytes))).unwrap(),
            DeadLetterSink::open(Journal::new(Box::new(sink_bytes))).unwrap(),
        )
        .unwrap();
        assert!(!ctx.sink().contains(&old_id));
        assert!(ctx.store().contains(&new_id));
        assert_eq!(ctx.pending_count(), 1);
    }

    #[test]
    fn reconciles_crash_between_sink_write_and_store_removal() {
        let store_bytes = InMemoryBackend::new();
        let sink_bytes = InMemoryBackend::new();

        let id = {
            let store = ActionStore::open(Journal::new(Box::new(store_bytes.clone()))).unwrap();
            let sink = DeadLetterSink::open(Journal::new(Box::new(sink_bytes.clone()))).unwrap();
            let id = store
                .enqueue(NewAction::new("tm_ticket.update", json!({}), 1))
                .unwrap();
            // Only the first half of a dead-lettering reached disk.
            sink.add(store.get(&id).unwrap(), DeadLetterReason::MaxRetriesExceeded)
                .unwrap();
            id
        };

        let ctx = SyncContext::new(
            ActionStore::open(Journal::new(Box::new(store_bytes))).unwrap(),
            DeadLetterSink::open(Journal::new(Box::new(sink_bytes))).unwrap(),
        )
        .unwrap();
        assert!(!ctx.store().contains(&id));
        assert!(ctx.sink().contains(&id));
    }

    #[test]
    fn open_dir_uses_both_journals() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ctx = SyncContext::open_dir(dir.path()).unwrap();
            ctx.enqueue(NewAction::new("route.stop_complete", json!({"stop": 1}), 0))
                .unwrap();
        }

        let (actions, dead_letters) = SyncContext::journal_paths(dir.path());
        assert!(actions.exists());
        assert!(dead_letters.exists());
        assert_eq!(SyncContext::open_dir(dir.path()).unwrap().pending_count(), 1);
    }

    #[test]
    fn second_open_of_a_directory_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let first = SyncContext::open_dir(dir.path()).unwrap();
        first
            .enqueue(NewAction::new("crew.check_in", json!({"crew": 2}), 0))
            .unwrap();

        let err = SyncContext::open_dir(dir.path()).unwrap_err();
        assert!(matches!(err, QueueError::DirectoryLocked { ref path } if path == dir.path()));
        assert!(dir.path().join(LOCK_FILE).exists());
        assert_eq!(first.pending_count(), 1);
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        drop(SyncContext::open_dir(dir.path()).unwrap());

        let reopened = SyncContext::open_dir(dir.path()).unwrap();
        assert_eq!(reopened.pending_count(), 0);
    }
}
