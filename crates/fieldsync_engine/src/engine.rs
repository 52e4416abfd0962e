//! Sync engine state machine.

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::mutex::{HolderId, SyncGuard, SyncMutex};
use crate::scheduler::RetryScheduler;
use crate::transport::{SendOutcome, SendReceipt, SyncTransport};
use chrono::{DateTime, Utc};
use fieldsync_core::{
    ActionId, ActionStatus, ActionStore, ConflictCheck, ConflictDetector, ConflictPolicy,
    ConflictRecord, ConflictResolution, DeadLetterEntry, DeadLetterReason, NewAction,
    PendingAction, SyncContext,
};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

tokio::task_local! {
    static CYCLE_HOLDER: HolderId;
}

/// Identity used for the sync lock: the running cycle's holder when
/// called from inside a cycle, otherwise a fresh one.
fn caller_identity() -> HolderId {
    CYCLE_HOLDER
        .try_with(|holder| *holder)
        .unwrap_or_else(|_| HolderId::next())
}

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle running and nothing scheduled.
    Idle,
    /// A cycle is draining the store.
    Syncing,
    /// A timer will start the next cycle.
    Scheduled,
    /// The engine no longer accepts triggers.
    ShutDown,
}

impl SyncState {
    /// Returns true while a cycle runs.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }
}

/// What asked for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// An explicit caller request.
    Manual,
    /// Connectivity came back.
    Connectivity,
    /// A backoff gate elapsed.
    RetryTimer,
    /// A trigger arrived while another cycle ran.
    FollowUp,
    /// The periodic sync interval.
    Periodic,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Connectivity => "connectivity",
            TriggerSource::RetryTimer => "retry-timer",
            TriggerSource::FollowUp => "follow-up",
            TriggerSource::Periodic => "periodic",
        })
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Actions the server accepted cleanly.
    pub actions_applied: u64,
    /// Transient failures that were scheduled for retry.
    pub retries: u64,
    /// Conflicts detected.
    pub conflicts_encountered: u64,
    /// Actions moved to the dead-letter sink by the engine.
    pub dead_lettered: u64,
    /// Triggers folded into a running cycle.
    pub coalesced_triggers: u64,
    /// When the last cycle finished.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Last store or sink error seen by a cycle.
    pub last_error: Option<String>,
}

/// A store or sink error hit while handling one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    /// The action being handled.
    pub action_id: ActionId,
    /// The error.
    pub message: String,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// Actions accepted and removed from the store.
    pub applied: u64,
    /// Actions that failed transiently and wait behind a backoff gate.
    pub retried: u64,
    /// Actions whose base version did not match the server.
    pub conflicted: u64,
    /// Actions moved to the dead-letter sink after failures.
    pub dead_lettered: u64,
    /// Actions left alone because their backoff gate had not elapsed.
    pub skipped: u64,
    /// Whether the cycle stopped early on request.
    pub cancelled: bool,
    /// Conflicts detected in this cycle.
    pub conflicts: Vec<ConflictRecord>,
    /// Integrity errors. The cycle kept going after each.
    pub failures: Vec<ActionFailure>,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    /// Number of actions handed to the transport.
    pub fn attempted(&self) -> u64 {
        self.applied + self.retried + self.conflicted + self.dead_lettered
    }

    /// True if everything attempted was applied.
    pub fn is_clean(&self) -> bool {
        self.retried == 0
            && self.conflicted == 0
            && self.dead_lettered == 0
            && self.failures.is_empty()
    }
}

/// What a trigger did.
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    /// This trigger ran a cycle.
    Ran(SyncCycleResult),
    /// A cycle was already running; a follow-up cycle is scheduled after it.
    Coalesced,
}

impl TriggerOutcome {
    /// The cycle result, if this trigger ran one.
    pub fn result(&self) -> Option<&SyncCycleResult> {
        match self {
            TriggerOutcome::Ran(result) => Some(result),
            TriggerOutcome::Coalesced => None,
        }
    }
}

struct EngineInner<T: SyncTransport> {
    config: SyncConfig,
    context: Arc<SyncContext>,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    detector: ConflictDetector,
    mutex: SyncMutex,
    scheduler: RetryScheduler,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    follow_up: AtomicBool,
    shut_down: AtomicBool,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl<T: SyncTransport> Drop for EngineInner<T> {
    fn drop(&mut self) {
        self.scheduler.cancel();
        if let Some(handle) = self.periodic.lock().take() {
            handle.abort();
        }
    }
}

/// The sync engine drains the action store through a transport.
///
/// Cycles never overlap: every cycle runs under the engine's
/// [`SyncMutex`]. The engine keeps no state of its own beyond counters;
/// everything durable lives in the [`SyncContext`].
///
/// Cloning yields another handle to the same engine.
pub struct SyncEngine<T: SyncTransport + 'static> {
    inner: Arc<EngineInner<T>>,
}

impl<T: SyncTransport + 'static> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncTransport + 'static> fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("context", &self.inner.context)
            .finish_non_exhaustive()
    }
}

impl<T: SyncTransport + 'static> SyncEngine<T> {
    /// Creates a new sync engine over `context`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: SyncConfig, context: Arc<SyncContext>, transport: Arc<T>) -> SyncResult<Self> {
        Self::with_clock(config, context, transport, Arc::new(SystemClock))
    }

    /// Creates a new sync engine that reads time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` does not validate.
    pub fn with_clock(
        config: SyncConfig,
        context: Arc<SyncContext>,
        transport: Arc<T>,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                context,
                transport,
                clock,
                detector: ConflictDetector::new(),
                mutex: SyncMutex::new(),
                scheduler: RetryScheduler::new(),
                state: RwLock::new(SyncState::Idle),
                stats: RwLock::new(SyncStats::default()),
                cancelled: AtomicBool::new(false),
                follow_up: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                periodic: Mutex::new(None),
            }),
        })
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Gets the context the engine works over.
    pub fn context(&self) -> &Arc<SyncContext> {
        &self.inner.context
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.inner.state.read()
    }

    /// Returns true while a cycle runs.
    pub fn is_syncing(&self) -> bool {
        self.inner.mutex.is_locked()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Records a user action. It is sent by a later cycle.
    ///
    /// # Errors
    ///
    /// Fails if the journal write fails.
    pub fn enqueue_action(&self, action: NewAction) -> SyncResult<ActionId> {
        Ok(self.inner.context.enqueue(action)?)
    }

    /// Number of actions waiting to be sent.
    pub fn pending_count(&self) -> usize {
        self.inner.context.pending_count()
    }

    /// Every dead-letter entry.
    pub fn dead_letter_entries(&self) -> Vec<DeadLetterEntry> {
        self.inner.context.dead_letter_entries()
    }

    /// Every conflict awaiting a manual decision.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.inner.context.conflicts()
    }

    /// Applies a manual decision to a conflicted action.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Queue`] if the action is absent or not
    /// conflicted.
    pub fn resolve_conflict(&self, id: &ActionId, resolution: ConflictResolution) -> SyncResult<()> {
        Ok(self.inner.context.resolve_conflict(id, resolution)?)
    }

    /// Removes a dead-letter entry handled outside the engine.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Queue`] wrapping `NotFound` if absent.
    pub fn resolve_dead_letter(&self, id: &ActionId) -> SyncResult<()> {
        Ok(self.inner.context.sink().resolve(id)?)
    }

    /// Moves a dead-letter entry back into the store as a new action.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Queue`] wrapping `NotFound` if absent.
    pub fn requeue_dead_letter(&self, id: &ActionId) -> SyncResult<ActionId> {
        Ok(self.inner.context.requeue_dead_letter(id)?)
    }

    /// Asks for a cycle on behalf of a caller.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::trigger`].
    pub async fn trigger_sync(&self) -> SyncResult<TriggerOutcome> {
        self.trigger(TriggerSource::Manual).await
    }

    /// Asks for a cycle.
    ///
    /// Runs the cycle if the lock is free. Otherwise returns
    /// [`TriggerOutcome::Coalesced`] at once and the running cycle
    /// schedules one follow-up when it ends, however many triggers were
    /// folded into it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Reentrancy`] when called from inside a cycle,
    /// or [`SyncError::ShutDown`].
    pub async fn trigger(&self, source: TriggerSource) -> SyncResult<TriggerOutcome> {
        self.ensure_running()?;
        let holder = caller_identity();
        loop {
            if let Some(guard) = self.inner.mutex.try_acquire(holder)? {
                return Ok(TriggerOutcome::Ran(self.run_cycle(guard, source).await));
            }

            self.inner.follow_up.store(true, Ordering::SeqCst);
            if self.inner.mutex.is_locked() {
                self.inner.stats.write().coalesced_triggers += 1;
                debug!(%source, "sync already running, trigger coalesced");
                return Ok(TriggerOutcome::Coalesced);
            }
            // Released between the attempt and the flag; try again.
        }
    }

    /// Waits for the lock and runs a cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Reentrancy`] when called from inside a cycle,
    /// or [`SyncError::ShutDown`].
    pub async fn sync_now(&self) -> SyncResult<SyncCycleResult> {
        self.ensure_running()?;
        let guard = self.inner.mutex.acquire(caller_identity()).await?;
        self.ensure_running()?;
        Ok(self.run_cycle(guard, TriggerSource::Manual).await)
    }

    /// Stops the running cycle at the next action boundary.
    ///
    /// The action being sent finishes first. Triggers coalesced into the
    /// cancelled cycle still get their follow-up cycle, but no retry timer
    /// is armed for the actions it skipped; they wait for the next trigger.
    /// Has no effect on later cycles.
    pub fn cancel(&self) {
        if self.inner.mutex.is_locked() {
            info!("sync cycle cancellation requested");
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Starts periodic sync if the configuration has an interval.
    ///
    /// Returns false if no interval is configured or periodic sync is
    /// already running. Must be called from within a tokio runtime.
    pub fn start_periodic_sync(&self) -> bool {
        let Some(interval) = self.inner.config.sync_interval else {
            return false;
        };
        let mut periodic = self.inner.periodic.lock();
        if periodic.is_some() || self.inner.shut_down.load(Ordering::SeqCst) {
            return false;
        }

        let weak = Arc::downgrade(&self.inner);
        *periodic = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let engine = SyncEngine { inner };
                match engine.trigger(TriggerSource::Periodic).await {
                    Ok(_) => {}
                    Err(SyncError::ShutDown) => break,
                    Err(err) => warn!(error = %err, "periodic sync failed"),
                }
            }
        }));
        info!(?interval, "periodic sync started");
        true
    }

    /// Stops accepting triggers, cancels the running cycle and timers, and
    /// waits for the running cycle to end.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel();
        if let Some(handle) = self.inner.periodic.lock().take() {
            handle.abort();
        }

        // From inside a cycle this is a re-entrant request: don't wait on
        // ourselves.
        if let Ok(guard) = self.inner.mutex.acquire(caller_identity()).await {
            drop(guard);
        }
        self.inner.scheduler.cancel();
        self.set_state(SyncState::ShutDown);
        info!("sync engine shut down");
    }

    fn ensure_running(&self) -> SyncResult<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            Err(SyncError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.inner.state.write() = state;
    }

    async fn run_cycle(&self, guard: SyncGuard, source: TriggerSource) -> SyncCycleResult {
        // This cycle's snapshot covers every trigger folded in so far.
        self.inner.follow_up.store(false, Ordering::SeqCst);
        self.inner.cancelled.store(false, Ordering::SeqCst);
        self.inner.scheduler.cancel();
        self.set_state(SyncState::Syncing);

        let result = CYCLE_HOLDER
            .scope(guard.holder(), self.drain(source))
            .await;
        drop(guard);

        self.finish_cycle(&result);
        result
    }

    async fn drain(&self, source: TriggerSource) -> SyncCycleResult {
        let started = Instant::now();
        let store = self.inner.context.store();
        let snapshot = store.list_pending();
        info!(%source, pending = snapshot.len(), "sync cycle started");

        let mut result = SyncCycleResult::default();
        for queued in snapshot {
            if self.inner.cancelled.load(Ordering::SeqCst) {
                info!("sync cycle cancelled");
                result.cancelled = true;
                break;
            }

            // Re-read: the snapshot may be stale by now.
            let action = match store.get(&queued.id) {
                Ok(action) if action.status == ActionStatus::Pending => action,
                _ => {
                    result.skipped += 1;
                    continue;
                }
            };
            if !action.is_due(self.inner.clock.now()) {
                result.skipped += 1;
                continue;
            }

            let id = action.id;
            if let Err(err) = self.process(action, &mut result).await {
                error!(%id, error = %err, "action handling failed");
                result.failures.push(ActionFailure {
                    action_id: id,
                    message: err.to_string(),
                });
            }
        }

        result.duration = started.elapsed();
        info!(
            applied = result.applied,
            retried = result.retried,
            conflicted = result.conflicted,
            dead_lettered = result.dead_lettered,
            skipped = result.skipped,
            cancelled = result.cancelled,
            duration_ms = result.duration.as_millis() as u64,
            "sync cycle finished"
        );
        result
    }

    async fn process(&self, action: PendingAction, result: &mut SyncCycleResult) -> SyncResult<()> {
        let store = self.inner.context.store();
        let id = action.id;

        store.mark_status(&id, ActionStatus::InFlight)?;
        if action.attempt_count >= self.inner.config.retry.max_attempts {
            // Exhausted earlier but the move to the sink did not happen.
            self.move_to_sink(&id, DeadLetterReason::MaxRetriesExceeded, None)?;
            warn!(%id, attempts = action.attempt_count, "retries exhausted");
            result.dead_lettered += 1;
            return Ok(());
        }
        let mut in_flight = InFlight {
            store,
            id,
            armed: true,
        };
        debug!(%id, kind = %action.kind, attempt = action.attempt_count + 1, "sending action");
        let receipt = self.send_with_timeout(&action).await;
        in_flight.armed = false;

        let now = self.inner.clock.now();
        match receipt.outcome {
            SendOutcome::Success => {
                let check = self.inner.detector.check(
                    &action,
                    receipt.server_version,
                    receipt.server_value.as_ref(),
                    now,
                );
                self.on_success(&action, check, result)
            }
            SendOutcome::TransientFailure(message) => {
                self.on_transient_failure(&action, message, now, result)
            }
            SendOutcome::PermanentFailure(message) => {
                self.on_permanent_failure(&action, message, result)
            }
        }
    }

    async fn send_with_timeout(&self, action: &PendingAction) -> SendReceipt {
        let timeout = self.inner.config.transport_timeout;
        match tokio::time::timeout(timeout, self.inner.transport.send(action)).await {
            Ok(receipt) => receipt,
            Err(_) => {
                warn!(id = %action.id, ?timeout, "transport call timed out");
                SendReceipt::transient(format!(
                    "transport timed out after {}ms",
                    timeout.as_millis()
                ))
            }
        }
    }

    fn on_success(
        &self,
        action: &PendingAction,
        check: ConflictCheck,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let store = self.inner.context.store();
        let id = action.id;

        match check {
            ConflictCheck::Clean => {
                store.mark_status(&id, ActionStatus::Applied)?;
                store.remove(&id)?;
                debug!(%id, "action applied");
                result.applied += 1;
            }
            ConflictCheck::Conflict(record) => {
                let record = *record;
                warn!(
                    %id,
                    base = %record.base_version,
                    server = %record.server_version,
                    "version conflict"
                );
                result.conflicted += 1;
                result.conflicts.push(record.clone());
                match self.inner.config.conflict_policy {
                    ConflictPolicy::Manual => store.mark_conflicted(&id, record)?,
                    ConflictPolicy::DeadLetter => self.move_to_sink(
                        &id,
                        DeadLetterReason::UnresolvedConflict,
                        Some(record),
                    )?,
                }
            }
        }
        Ok(())
    }

    fn on_transient_failure(
        &self,
        action: &PendingAction,
        message: String,
        now: DateTime<Utc>,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let store = self.inner.context.store();
        let retry = &self.inner.config.retry;
        let id = action.id;
        let attempts = action.attempt_count.saturating_add(1);

        if attempts >= retry.max_attempts {
            store.record_failure(&id, message.as_str(), None)?;
            self.move_to_sink(&id, DeadLetterReason::MaxRetriesExceeded, None)?;
            warn!(%id, attempts, error = %message, "retries exhausted");
            result.dead_lettered += 1;
            return Ok(());
        }

        let delay = retry.delay_for_attempt(attempts);
        let retry_at = gate_after(now, delay);
        store.record_failure(&id, message.as_str(), Some(retry_at))?;
        debug!(%id, attempts, ?delay, error = %message, "transient failure, retry scheduled");
        result.retried += 1;
        Ok(())
    }

    fn on_permanent_failure(
        &self,
        action: &PendingAction,
        message: String,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let id = action.id;
        self.inner
            .context
            .store()
            .record_failure(&id, message.as_str(), None)?;
        self.move_to_sink(&id, DeadLetterReason::PermanentFailure(message), None)?;
        result.dead_lettered += 1;
        Ok(())
    }

    /// Moves an in-flight action to the dead-letter sink.
    ///
    /// If the move fails before the sink holds the entry, the action is
    /// put back where a later cycle or the operator can reach it: pending,
    /// or conflicted when a conflict record is given.
    fn move_to_sink(
        &self,
        id: &ActionId,
        reason: DeadLetterReason,
        conflict: Option<ConflictRecord>,
    ) -> SyncResult<()> {
        let context = &self.inner.context;
        let Err(err) = context.dead_letter(id, reason, conflict.clone()) else {
            return Ok(());
        };
        warn!(%id, error = %err, "could not move action to dead-letter sink");

        if !context.sink().contains(id) {
            let store = context.store();
            let restored = match conflict {
                Some(record) => store.mark_conflicted(id, record),
                None => store.mark_status(id, ActionStatus::Pending),
            };
            if let Err(restore) = restored {
                warn!(%id, error = %restore, "could not release action after failed dead-lettering");
            }
        }
        Err(err.into())
    }

    fn finish_cycle(&self, result: &SyncCycleResult) {
        {
            let mut stats = self.inner.stats.write();
            stats.cycles_completed += 1;
            stats.actions_applied += result.applied;
            stats.retries += result.retried;
            stats.conflicts_encountered += result.conflicted;
            stats.dead_lettered += result.dead_lettered;
            stats.last_sync_at = Some(self.inner.clock.now());
            if let Some(failure) = result.failures.last() {
                stats.last_error = Some(failure.message.clone());
            }
        }

        if self.inner.shut_down.load(Ordering::SeqCst) {
            self.set_state(SyncState::ShutDown);
            return;
        }
        let next = if self.inner.follow_up.swap(false, Ordering::SeqCst) {
            Some((Duration::ZERO, TriggerSource::FollowUp))
        } else if self.inner.config.schedule_retries && !result.cancelled {
            self.next_gate_delay()
                .map(|delay| (delay, TriggerSource::RetryTimer))
        } else {
            None
        };

        match next {
            Some((delay, source)) => {
                self.schedule(delay, source);
                self.set_state(SyncState::Scheduled);
            }
            None => self.set_state(SyncState::Idle),
        }
    }

    /// Time until the earliest pending action is due.
    fn next_gate_delay(&self) -> Option<Duration> {
        let now = self.inner.clock.now();
        self.inner
            .context
            .store()
            .list_pending()
            .iter()
            .map(|action| {
                action
                    .next_attempt_at
                    .and_then(|at| (at - now).to_std().ok())
                    .unwrap_or(Duration::ZERO)
            })
            .min()
    }

    fn schedule(&self, delay: Duration, source: TriggerSource) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.arm(delay, async move {
            let Some(inner) = weak.upgrade() else { return };
            let engine = SyncEngine { inner };
            match engine.trigger(source).await {
                Ok(_) | Err(SyncError::ShutDown) => {}
                Err(err) => warn!(%source, error = %err, "scheduled sync failed"),
            }
        });
        debug!(%source, ?delay, "next sync scheduled");
    }
}

/// Puts an action back to pending if its send is abandoned midway.
struct InFlight<'a> {
    store: &'a ActionStore,
    id: ActionId,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.store.mark_status(&self.id, ActionStatus::Pending) {
                warn!(id = %self.id, error = %err, "could not return abandoned action to pending");
            }
        }
    }
}

fn gate_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
