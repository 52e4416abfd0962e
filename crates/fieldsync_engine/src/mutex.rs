//! Async mutual exclusion for sync cycles.
//!
//! [`SyncMutex`] admits one holder at a time and hands the lock to
//! waiters in arrival order. Each acquisition gets a [`Ticket`]; release
//! compares tickets, so a stale guard can never unlock someone else's
//! hold. A waiter whose future is dropped leaves the queue, and a grant
//! that arrives after the drop is passed on to the next waiter.
//!
//! Callers identify themselves with a [`HolderId`]. A holder that asks
//! again while holding gets [`MutexError::Reentrancy`] instead of waiting
//! on itself forever.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(1);

/// Identity of a logical caller of the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HolderId(u64);

impl HolderId {
    /// Allocates a fresh, process-unique holder id.
    pub fn next() -> Self {
        Self(NEXT_HOLDER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "holder-{}", self.0)
    }
}

/// One acquisition of the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

/// Errors from acquiring the mutex.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutexError {
    /// The holder already holds the lock.
    #[error("{holder} already holds the sync lock")]
    Reentrancy {
        /// The holder that asked twice.
        holder: HolderId,
    },
    /// The grant channel closed without a grant.
    #[error("sync lock closed")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Hold {
    ticket: Ticket,
    holder: HolderId,
}

#[derive(Debug)]
struct Waiter {
    ticket: Ticket,
    holder: HolderId,
    grant: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct State {
    current: Option<Hold>,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

impl State {
    fn issue(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    /// Releases `ticket` if it is the current hold and hands the lock to
    /// the first waiter still listening.
    fn release(&mut self, ticket: Ticket) -> bool {
        match self.current {
            Some(hold) if hold.ticket == ticket => {}
            _ => return false,
        }
        self.current = None;

        while let Some(waiter) = self.waiters.pop_front() {
            self.current = Some(Hold {
                ticket: waiter.ticket,
                holder: waiter.holder,
            });
            if waiter.grant.send(()).is_ok() {
                trace!(ticket = waiter.ticket.0, holder = %waiter.holder, "sync lock handed off");
                return true;
            }
            self.current = None;
        }
        true
    }
}

/// A FIFO async mutex guarding sync cycles.
///
/// Cloning yields another handle to the same lock.
#[derive(Debug, Clone, Default)]
pub struct SyncMutex {
    state: Arc<Mutex<State>>,
}

impl SyncMutex {
    /// Creates an unlocked mutex.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock.
    ///
    /// Waiters are served in the order they called `acquire`.
    ///
    /// # Errors
    ///
    /// Returns [`MutexError::Reentrancy`] if `holder` already holds it.
    pub async fn acquire(&self, holder: HolderId) -> Result<SyncGuard, MutexError> {
        let (ticket, granted) = {
            let mut state = self.state.lock();
            if let Some(hold) = state.current {
                if hold.holder == holder {
                    warn!(%holder, "re-entrant sync lock request");
                    return Err(MutexError::Reentrancy { holder });
                }
            }

            let ticket = state.issue();
            if state.current.is_none() && state.waiters.is_empty() {
                state.current = Some(Hold { ticket, holder });
                return Ok(self.guard(ticket, holder));
            }

            let (grant, granted) = oneshot::channel();
            state.waiters.push_back(Waiter {
                ticket,
                holder,
                grant,
            });
            debug!(%holder, queued = state.waiters.len(), "waiting for sync lock");
            (ticket, granted)
        };

        let mut pending = PendingAcquire {
            state: &self.state,
            ticket,
            armed: true,
        };
        granted.await.map_err(|_| MutexError::Closed)?;
        pending.armed = false;
        Ok(self.guard(ticket, holder))
    }

    /// Takes the lock only if nobody holds it or waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`MutexError::Reentrancy`] if `holder` already holds it.
    pub fn try_acquire(&self, holder: HolderId) -> Result<Option<SyncGuard>, MutexError> {
        let mut state = self.state.lock();
        match state.current {
            Some(hold) if hold.holder == holder => {
                warn!(%holder, "re-entrant sync lock request");
                Err(MutexError::Reentrancy { holder })
            }
            Some(_) => Ok(None),
            None if !state.waiters.is_empty() => Ok(None),
            None => {
                let ticket = state.issue();
                state.current = Some(Hold { ticket, holder });
                Ok(Some(self.guard(ticket, holder)))
            }
        }
    }

    /// Returns true if someone holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<HolderId> {
        self.state.lock().current.map(|h| h.holder)
    }

    /// Number of callers waiting.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn guard(&self, ticket: Ticket, holder: HolderId) -> SyncGuard {
        SyncGuard {
            state: Arc::clone(&self.state),
            ticket,
            holder,
        }
    }
}

/// Cleans up after an `acquire` future dropped while queued.
struct PendingAcquire<'a> {
    state: &'a Arc<Mutex<State>>,
    ticket: Ticket,
    armed: bool,
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock();
        if state.current.is_some_and(|h| h.ticket == self.ticket) {
            // Granted after the caller gave up.
            state.release(self.ticket);
        } else {
            state.waiters.retain(|w| w.ticket != self.ticket);
        }
    }
}

/// Holds the sync lock until dropped.
#[derive(Debug)]
#[must_use = "the sync lock is released as soon as the guard is dropped"]
pub struct SyncGuard {
    state: Arc<Mutex<State>>,
    ticket: Ticket,
    holder: HolderId,
}

impl SyncGuard {
    /// The ticket of this acquisition.
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// The holder this guard belongs to.
    pub fn holder(&self) -> HolderId {
        self.holder
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        if !self.state.lock().release(self.ticket) {
            warn!(ticket = self.ticket.0, "stale sync lock release ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_when_free() {
        let mutex = SyncMutex::new();
        let holder = HolderId::next();
        let guard = mutex.acquire(holder).await.unwrap();
        assert!(mutex.is_locked());
        assert_eq!(mutex.holder(), Some(holder));
        drop(guard);
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn same_holder_is_reentrancy() {
        let mutex = SyncMutex::new();
        let holder = HolderId::next();
        let _guard = mutex.acquire(holder).await.unwrap();

        assert_eq!(
            mutex.acquire(holder).await.unwrap_err(),
            MutexError::Reentrancy { holder }
        );
        assert!(matches!(
            mutex.try_acquire(holder),
            Err(MutexError::Reentrancy { .. })
        ));
    }

    #[tokio::test]
    async fn try_acquire_when_busy_returns_none() {
        let mutex = SyncMutex::new();
        let _guard = mutex.acquire(HolderId::next()).await.unwrap();
        assert!(mutex.try_acquire(HolderId::next()).unwrap().is_none());
    }

    #[tokio::test]
    async fn waiters_are_served_in_order() {
        let mutex = SyncMutex::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = mutex.acquire(HolderId::next()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..5 {
            let task_mutex = mutex.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let _guard = task_mutex.acquire(HolderId::next()).await.unwrap();
                order.lock().push(i);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }));
            // Let task i enqueue before task i + 1.
            while mutex.waiting() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(first);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn dropped_waiter_is_skipped() {
        let mutex = SyncMutex::new();
        let first = mutex.acquire(HolderId::next()).await.unwrap();

        let abandoned = {
            let mutex = mutex.clone();
            tokio::spawn(async move { mutex.acquire(HolderId::next()).await.map(|_| ()) })
        };
        while mutex.waiting() < 1 {
            tokio::task::yield_now().await;
        }

        let next_holder = HolderId::next();
        let next = {
            let mutex = mutex.clone();
            tokio::spawn(async move { mutex.acquire(next_holder).await.map(|g| g.holder()) })
        };
        while mutex.waiting() < 2 {
            tokio::task::yield_now().await;
        }

        abandoned.abort();
        let _ = abandoned.await;
        assert_eq!(mutex.waiting(), 1);

        drop(first);
        assert_eq!(next.await.unwrap().unwrap(), next_holder);
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn stale_release_does_not_unlock_new_holder() {
        let mutex = SyncMutex::new();
        let guard = mutex.acquire(HolderId::next()).await.unwrap();
        let stale_ticket = guard.ticket();
        drop(guard);

        let holder = HolderId::next();
        let _current = mutex.acquire(holder).await.unwrap();
        assert!(!mutex.state.lock().release(stale_ticket));
        assert_eq!(mutex.holder(), Some(holder));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_two_holders() {
        let mutex = SyncMutex::new();
        let active = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let mutex = mutex.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _guard = mutex.acquire(HolderId::next()).await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
