//! Transport layer abstraction for sync operations.

use async_trait::async_trait;
use fieldsync_core::{ActionId, PendingAction, Version};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How the server answered one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted. The receipt's server version decides clean vs. conflict.
    Success,
    /// Worth retrying later (offline, timeout, 5xx).
    TransientFailure(String),
    /// Will never succeed as sent (validation, 4xx).
    PermanentFailure(String),
}

/// The server's answer to one send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    /// Version the server holds for the touched record.
    pub server_version: Version,
    /// Server copy of the record, when the server returns it.
    pub server_value: Option<serde_json::Value>,
    /// Outcome of the send.
    pub outcome: SendOutcome,
}

impl SendReceipt {
    /// A successful send against `server_version`.
    pub fn success(server_version: impl Into<Version>) -> Self {
        Self {
            server_version: server_version.into(),
            server_value: None,
            outcome: SendOutcome::Success,
        }
    }

    /// A transient failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            server_version: Version::default(),
            server_value: None,
            outcome: SendOutcome::TransientFailure(message.into()),
        }
    }

    /// A permanent failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            server_version: Version::default(),
            server_value: None,
            outcome: SendOutcome::PermanentFailure(message.into()),
        }
    }

    /// Attaches the server copy of the record.
    pub fn with_server_value(mut self, value: serde_json::Value) -> Self {
        self.server_value = Some(value);
        self
    }
}

/// A sync transport sends one action to the server.
///
/// Implementations report failures through [`SendOutcome`] rather than
/// an error type; the engine decides what each outcome means for the
/// action. The engine bounds every call with its transport timeout.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends `action` and reports how the server answered.
    async fn send(&self, action: &PendingAction) -> SendReceipt;
}

/// What a [`MockTransport`] answers once its script is used up.
#[derive(Debug, Clone, Default)]
pub enum Fallback {
    /// Succeed against the action's own base version.
    #[default]
    Echo,
    /// Always answer with this receipt.
    Fixed(SendReceipt),
}

/// A scripted transport for testing.
///
/// Answers come from a queue of receipts, then from the fallback. Every
/// call is recorded, and the number of sends running at once is tracked
/// so tests can assert that cycles never overlap.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<SendReceipt>>,
    fallback: Mutex<Fallback>,
    delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<ActionId>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockTransport {
    /// Creates a mock that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `receipt` as the answer to the next unanswered call.
    pub fn push_response(&self, receipt: SendReceipt) {
        self.script.lock().push_back(receipt);
    }

    /// Queues `receipt` for the next `times` calls.
    pub fn push_responses(&self, receipt: SendReceipt, times: usize) {
        let mut script = self.script.lock();
        script.extend(std::iter::repeat(receipt).take(times));
    }

    /// Sets the answer used once the script is empty.
    pub fn set_fallback(&self, fallback: Fallback) {
        *self.fallback.lock() = fallback;
    }

    /// Makes every send take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of sends made so far.
    pub fn call_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Ids of sent actions, in call order.
    pub fn sent(&self) -> Vec<ActionId> {
        self.sent.lock().clone()
    }

    /// Highest number of sends that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_receipt(&self, action: &PendingAction) -> SendReceipt {
        if let Some(receipt) = self.script.lock().pop_front() {
            return receipt;
        }
        match &*self.fallback.lock() {
            Fallback::Echo => SendReceipt::success(action.base_version),
            Fallback::Fixed(receipt) => receipt.clone(),
        }
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn send(&self, action: &PendingAction) -> SendReceipt {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let _running = Running(&self.in_flight);
        self.sent.lock().push(action.id);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.next_receipt(action)
    }
}

/// Decrements the in-flight count even when a send is dropped midway.
struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fieldsync_core::NewAction;
    use serde_json::json;

    fn action(base: u64) -> PendingAction {
        PendingAction::from_new(
            ActionId::new(),
            0,
            NewAction::new("crew.check_in", json!({"crew": "C-3"}), base),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn mock_echoes_base_version_by_default() {
        let transport = MockTransport::new();
        let receipt = transport.send(&action(4)).await;
        assert_eq!(receipt, SendReceipt::success(4));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn mock_plays_script_then_fallback() {
        let transport = MockTransport::new();
        transport.push_response(SendReceipt::transient("offline"));
        transport.set_fallback(Fallback::Fixed(SendReceipt::permanent("422")));

        let a = action(1);
        assert_eq!(
            transport.send(&a).await.outcome,
            SendOutcome::TransientFailure("offline".into())
        );
        assert_eq!(
            transport.send(&a).await.outcome,
            SendOutcome::PermanentFailure("422".into())
        );
        assert_eq!(transport.sent(), vec![a.id, a.id]);
    }

    #[tokio::test]
    async fn mock_tracks_peak_concurrency() {
        let transport = std::sync::Arc::new(MockTransport::new());
        transport.set_delay(Duration::from_millis(20));

        let a = action(1);
        let b = action(1);
        let (t1, t2) = (transport.clone(), transport.clone());
        tokio::join!(t1.send(&a), t2.send(&b));

        assert_eq!(transport.peak_concurrency(), 2);
    }

    #[test]
    fn receipt_with_server_value() {
        let receipt = SendReceipt::success(7).with_server_value(json!({"hours": 6}));
        assert_eq!(receipt.server_version, Version(7));
        assert_eq!(receipt.server_value, Some(json!({"hours": 6})));
    }
}
