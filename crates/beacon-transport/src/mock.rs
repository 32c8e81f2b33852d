use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use beacon_core::errors::TransportError;
use beacon_core::events::Event;
use beacon_core::transport::Transport;

/// Scripted result for one `send` call.
#[derive(Clone, Debug)]
pub enum MockOutcome {
    /// Accept the batch.
    Ok,
    /// Fail with the given error.
    Fail(TransportError),
    /// Sleep, then resolve the inner outcome.
    Delay(Duration, Box<MockOutcome>),
    /// Park until the notify fires, then resolve the inner outcome.
    WaitFor(Arc<Notify>, Box<MockOutcome>),
}

impl MockOutcome {
    pub fn delayed(delay: Duration, inner: MockOutcome) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    pub fn held(gate: Arc<Notify>, inner: MockOutcome) -> Self {
        Self::WaitFor(gate, Box::new(inner))
    }
}

/// Transport that replays scripted outcomes and records every batch it sees.
///
/// Once the script runs out, every call resolves to the fallback outcome
/// (`Ok` unless changed).
pub struct MockTransport {
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: Mutex<MockOutcome>,
    call_count: AtomicUsize,
    attempts: Mutex<Vec<Vec<Event>>>,
    delivered: Mutex<Vec<Vec<Event>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockTransport {
    pub fn new(script: Vec<MockOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(MockOutcome::Ok),
            call_count: AtomicUsize::new(0),
            attempts: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// A transport that fails every call with `err`.
    pub fn failing(err: TransportError) -> Self {
        let mock = Self::default();
        mock.set_fallback(MockOutcome::Fail(err));
        mock
    }

    pub fn set_fallback(&self, outcome: MockOutcome) {
        *self.fallback.lock() = outcome;
    }

    /// Append outcomes to the end of the script.
    pub fn push(&self, outcome: MockOutcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every batch passed to `send`, in call order, successful or not.
    pub fn attempts(&self) -> Vec<Vec<Event>> {
        self.attempts.lock().clone()
    }

    /// Batches that resolved to success.
    pub fn delivered(&self) -> Vec<Vec<Event>> {
        self.delivered.lock().clone()
    }

    /// All successfully delivered events, flattened in delivery order.
    pub fn delivered_events(&self) -> Vec<Event> {
        self.delivered.lock().iter().flatten().cloned().collect()
    }

    fn next_outcome(&self) -> MockOutcome {
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// Unwind nested Delay/WaitFor wrappers without recursive async.
async fn resolve(outcome: MockOutcome) -> Result<(), TransportError> {
    let mut current = outcome;
    loop {
        match current {
            MockOutcome::Ok => return Ok(()),
            MockOutcome::Fail(e) => return Err(e),
            MockOutcome::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
            MockOutcome::WaitFor(gate, inner) => {
                gate.notified().await;
                current = *inner;
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, batch: &[Event]) -> Result<(), TransportError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().push(batch.to_vec());

        let outcome = self.next_outcome();
        let result = resolve(outcome).await;
        if result.is_ok() {
            self.delivered.lock().push(batch.to_vec());
        }
        result
    }
}
