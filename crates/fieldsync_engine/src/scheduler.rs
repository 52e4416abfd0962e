//! Single-slot timer for the next sync attempt.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    armed: Option<JoinHandle<()>>,
}

/// Holds at most one pending timer task.
///
/// Arming replaces, and aborts, whatever was armed before. A timer that
/// fires leaves the slot before running its task, so re-arming from
/// inside that task does not abort it.
#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    slot: Arc<Mutex<Slot>>,
}

impl RetryScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay`, replacing any armed timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if let Some(previous) = slot.armed.take() {
            previous.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;

        let fired = Arc::clone(&self.slot);
        slot.armed = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = fired.lock();
                if slot.generation != generation {
                    return;
                }
                // Detach: dropping the handle does not abort the task.
                slot.armed = None;
            }
            trace!(generation, "retry timer fired");
            task.await;
        }));
        trace!(generation, ?delay, "retry timer armed");
    }

    /// Aborts the armed timer, if any.
    pub fn cancel(&self) {
        if let Some(armed) = self.slot.lock().armed.take() {
            armed.abort();
            trace!("retry timer cancelled");
        }
    }

    /// Returns true if a timer is waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.slot.lock().armed.is_some()
    }
}
