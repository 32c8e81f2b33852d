use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use beacon_core::errors::TransportError;
use beacon_core::events::Event;
use beacon_core::ids::BatchId;
use beacon_core::transport::Transport;
use beacon_telemetry::MetricsRecorder;

use crate::error::PipelineError;
use crate::queue::EventQueue;

/// Why a drain was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainTrigger {
    /// The queue reached the batch size. Only full batches are sent.
    Threshold,
    /// Send whatever is queued, full batch or not.
    Flush,
}

impl DrainTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Threshold => "threshold",
            Self::Flush => "flush",
        }
    }
}

/// Result of one drain-and-send task.
#[derive(Debug)]
pub enum UploadOutcome {
    /// Every batch the task formed was accepted.
    Sent { events: usize },
    /// The last batch failed and was put back at the head of the queue.
    /// `evicted` of its events did not fit and were lost.
    Requeued {
        events: usize,
        evicted: usize,
        error: TransportError,
    },
}

struct UploaderInner {
    transport: Arc<dyn Transport>,
    batch_size: usize,
    in_flight: AtomicBool,
    /// Spawned send tasks that have not returned yet. A task can briefly
    /// drop the flag and take it back, so idleness needs both.
    tasks: AtomicUsize,
    metrics: Arc<MetricsRecorder>,
}

/// Decrements the task count when a send task ends, however it ends.
struct TaskGuard(Arc<UploaderInner>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.tasks.fetch_sub(1, Ordering::AcqRel);
    }
}

impl UploaderInner {
    fn try_acquire(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    /// Called with the in-flight flag held. Only a concurrent `clear` can
    /// shrink the queue between the length check and the drain.
    fn take_batch(&self, queue: &EventQueue, trigger: DrainTrigger) -> Option<Vec<Event>> {
        let ready = match trigger {
            DrainTrigger::Threshold => queue.len() >= self.batch_size,
            DrainTrigger::Flush => !queue.is_empty(),
        };
        if !ready {
            return None;
        }
        let batch = queue.drain_batch(self.batch_size);
        (!batch.is_empty()).then_some(batch)
    }

    fn record_depth(&self, queue: &EventQueue) {
        self.metrics
            .gauge_set("analytics.queue.depth", &[], queue.len() as f64);
    }
}

/// Moves batches from the queue to the transport, one at a time.
///
/// A single atomic flag admits at most one drain-and-send. Triggers that
/// arrive while it is held are dropped; the running task picks up any full
/// batch they would have sent before it lets go.
pub struct BatchUploader {
    inner: Arc<UploaderInner>,
    runtime: Handle,
    /// While false no new batch is formed. A send already running finishes.
    enabled: Arc<AtomicBool>,
}

impl BatchUploader {
    /// Build on the current tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        batch_size: usize,
        metrics: Arc<MetricsRecorder>,
    ) -> Result<Self, PipelineError> {
        let runtime = Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;
        Ok(Self::with_runtime(transport, batch_size, metrics, runtime))
    }

    /// Build with an explicit runtime handle, for hosts that record from
    /// plain threads.
    pub fn with_runtime(
        transport: Arc<dyn Transport>,
        batch_size: usize,
        metrics: Arc<MetricsRecorder>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(UploaderInner {
                transport,
                batch_size: batch_size.max(1),
                in_flight: AtomicBool::new(false),
                tasks: AtomicUsize::new(0),
                metrics,
            }),
            runtime,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Share the host's enabled switch with the uploader.
    pub fn gated_by(mut self, enabled: Arc<AtomicBool>) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// No send task is running or about to run.
    pub fn is_idle(&self) -> bool {
        self.inner.tasks.load(Ordering::Acquire) == 0 && !self.is_in_flight()
    }

    /// Form a batch and send it on the runtime.
    ///
    /// Returns `None` without touching the queue when uploads are switched
    /// off, when another send is in flight (coalesced) or when there is
    /// nothing to send for `trigger`. Never blocks the caller.
    pub fn drain_and_send(
        &self,
        queue: &Arc<EventQueue>,
        trigger: DrainTrigger,
    ) -> Option<JoinHandle<UploadOutcome>> {
        if !self.enabled.load(Ordering::Acquire) {
            trace!(trigger = trigger.as_str(), "uploads disabled, drain skipped");
            return None;
        }
        if !self.inner.try_acquire() {
            self.inner
                .metrics
                .counter_inc("analytics.drains.coalesced", &[], 1);
            trace!(trigger = trigger.as_str(), "drain coalesced into in-flight send");
            return None;
        }

        let Some(batch) = self.inner.take_batch(queue, trigger) else {
            self.inner.release();
            return None;
        };
        self.inner.record_depth(queue);
        self.inner
            .metrics
            .counter_inc("analytics.drains.started", &[("trigger", trigger.as_str())], 1);

        self.inner.tasks.fetch_add(1, Ordering::AcqRel);
        let guard = TaskGuard(Arc::clone(&self.inner));
        let inner = Arc::clone(&self.inner);
        let queue = Arc::clone(queue);
        let enabled = Arc::clone(&self.enabled);
        Some(self.runtime.spawn(async move {
            let _guard = guard;
            run_sends(inner, queue, enabled, batch, trigger).await
        }))
    }

    /// Wait until no send task is running. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while !self.is_idle() {
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

/// Body of the spawned task. Entered with the in-flight flag held; every
/// exit path releases it, and a failed batch is re-queued before that.
/// Each further batch is only formed while `enabled` holds.
async fn run_sends(
    inner: Arc<UploaderInner>,
    queue: Arc<EventQueue>,
    enabled: Arc<AtomicBool>,
    first: Vec<Event>,
    trigger: DrainTrigger,
) -> UploadOutcome {
    let mut batch = first;
    let mut sent = 0usize;

    loop {
        let batch_id = BatchId::new();
        let started = Instant::now();
        let result = inner.transport.send(&batch).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        inner
            .metrics
            .histogram_observe("analytics.send.latency_ms", &[], elapsed_ms);

        match result {
            Ok(()) => {
                sent += batch.len();
                inner.metrics.counter_inc("analytics.batches.sent", &[], 1);
                debug!(
                    batch_id = %batch_id,
                    events = batch.len(),
                    transport = inner.transport.name(),
                    trigger = trigger.as_str(),
                    elapsed_ms = elapsed_ms as u64,
                    "batch sent"
                );
            }
            Err(error) => {
                let events = batch.len();
                let evicted = queue.requeue_front(batch);
                inner.record_depth(&queue);
                inner.metrics.counter_inc(
                    "analytics.batches.failed",
                    &[("kind", error.error_kind())],
                    1,
                );
                if evicted > 0 {
                    inner
                        .metrics
                        .counter_inc("analytics.requeue.collisions", &[], 1);
                    inner.metrics.counter_inc(
                        "analytics.queue.evicted",
                        &[("cause", "requeue")],
                        evicted as u64,
                    );
                    warn!(
                        batch_id = %batch_id,
                        events,
                        evicted,
                        "queue filled during failed send, oldest re-queued events dropped"
                    );
                }
                warn!(
                    batch_id = %batch_id,
                    events,
                    transport = inner.transport.name(),
                    kind = error.error_kind(),
                    retryable = error.is_retryable(),
                    error = %error,
                    "batch send failed, re-queued"
                );
                inner.release();
                return UploadOutcome::Requeued {
                    events,
                    evicted,
                    error,
                };
            }
        }

        let paused = !enabled.load(Ordering::Acquire);
        if !paused {
            if let Some(next) = inner.take_batch(&queue, trigger) {
                inner.record_depth(&queue);
                batch = next;
                continue;
            }
        } else {
            debug!(queued = queue.len(), "uploads disabled, not forming next batch");
        }

        inner.release();

        // A trigger may have been coalesced after our last check: a producer
        // crossing the threshold, or a flush from uploads being switched back
        // on while we were paused. Take the flag back for it.
        let retry = if paused {
            DrainTrigger::Flush
        } else {
            DrainTrigger::Threshold
        };
        let ready = match retry {
            DrainTrigger::Threshold => queue.len() >= inner.batch_size,
            DrainTrigger::Flush => !queue.is_empty(),
        };
        if !ready || !inner.try_acquire() {
            break;
        }
        if !enabled.load(Ordering::Acquire) {
            inner.release();
            break;
        }
        match inner.take_batch(&queue, retry) {
            Some(next) => {
                inner.record_depth(&queue);
                batch = next;
            }
            None => {
                inner.release();
                break;
            }
        }
    }

    inner.record_depth(&queue);
    UploadOutcome::Sent { events: sent }
}
