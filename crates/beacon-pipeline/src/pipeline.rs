use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{info, trace, warn};

use beacon_core::consent::{ConsentDecision, ConsentPrompt};
use beacon_core::events::{AttrValue, Attributes, Event};
use beacon_core::storage::KeyValueStore;
use beacon_core::transport::Transport;
use beacon_telemetry::MetricsRecorder;

use crate::config::PipelineConfig;
use crate::consent::ConsentStore;
use crate::domain::DomainEvent;
use crate::error::PipelineError;
use crate::normalize::{merge_defaults, normalize_attributes, normalize_key, normalize_value};
use crate::queue::EventQueue;
use crate::uploader::{BatchUploader, DrainTrigger, UploadOutcome};

pub const USER_PROPERTIES_KEY: &str = "userProperties";

/// How long `flush` waits for an earlier send to settle before giving up.
const FLUSH_WAIT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// The consent gate has never been seen open.
    Uninitialized,
    Active,
    Disabled,
}

impl PipelineState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

/// Builder for [`AnalyticsPipeline`].
pub struct PipelineBuilder {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    config: PipelineConfig,
    prompt: Option<Arc<dyn ConsentPrompt>>,
    metrics: Option<Arc<MetricsRecorder>>,
    runtime: Option<Handle>,
}

impl PipelineBuilder {
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ConsentPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runtime that runs uploads. Defaults to the runtime `build` is called on.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<AnalyticsPipeline, PipelineError> {
        self.config
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| PipelineError::NoRuntime)?,
        };
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(MetricsRecorder::new()));

        let enabled = Arc::new(AtomicBool::new(self.config.analytics_enabled));
        let uploader = BatchUploader::with_runtime(
            self.transport,
            self.config.batch_size,
            Arc::clone(&metrics),
            runtime,
        )
        .gated_by(Arc::clone(&enabled));
        let consent = ConsentStore::new(Arc::clone(&self.store));
        let user_properties = load_user_properties(self.store.as_ref());

        let gate_open = self.config.analytics_enabled && consent.has_valid_consent();

        info!(
            enabled = self.config.analytics_enabled,
            consent = consent.status().label(),
            queue_capacity = self.config.queue_capacity,
            batch_size = self.config.batch_size,
            "analytics pipeline created"
        );

        Ok(AnalyticsPipeline {
            consent,
            store: self.store,
            queue: Arc::new(EventQueue::new(self.config.queue_capacity)),
            uploader,
            prompt: self.prompt,
            enabled,
            initialized: AtomicBool::new(gate_open),
            denials: AtomicU64::new(0),
            user_properties: RwLock::new(user_properties),
            persist_lock: Mutex::new(()),
            metrics,
        })
    }
}

fn load_user_properties(store: &dyn KeyValueStore) -> Attributes {
    match store.get(USER_PROPERTIES_KEY) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "corrupt user properties, starting empty");
            Attributes::new()
        }),
        Ok(None) => Attributes::new(),
        Err(e) => {
            warn!(error = %e, "failed to read user properties, starting empty");
            Attributes::new()
        }
    }
}

/// Entry point for game telemetry.
///
/// `record` may be called from any thread; it never blocks on the network and
/// never fails. Events are kept only while consent is valid and analytics is
/// enabled.
pub struct AnalyticsPipeline {
    consent: ConsentStore,
    store: Arc<dyn KeyValueStore>,
    queue: Arc<EventQueue>,
    uploader: BatchUploader,
    prompt: Option<Arc<dyn ConsentPrompt>>,
    /// Shared with the uploader, which stops forming batches while false.
    enabled: Arc<AtomicBool>,
    initialized: AtomicBool,
    /// Bumped on every denial, before the queue is cleared.
    denials: AtomicU64,
    user_properties: RwLock<Attributes>,
    persist_lock: Mutex<()>,
    metrics: Arc<MetricsRecorder>,
}

impl AnalyticsPipeline {
    pub fn builder(
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            store,
            transport,
            config: PipelineConfig::default(),
            prompt: None,
            metrics: None,
            runtime: None,
        }
    }

    pub fn record<E: DomainEvent + ?Sized>(&self, event: &E) {
        let denials = self.denials.load(Ordering::SeqCst);
        if !self.enabled.load(Ordering::Acquire) {
            self.count_drop("disabled", event.name());
            return;
        }
        if !self.consent.has_valid_consent() {
            self.count_drop("consent", event.name());
            return;
        }
        self.mark_initialized();

        let name = normalize_key(event.name());
        if name.is_empty() {
            warn!(raw = event.name(), "event name is empty after normalization, dropping");
            self.metrics.counter_inc(
                "analytics.events.dropped",
                &[("reason", "invalid_name")],
                1,
            );
            return;
        }

        let mut attributes = normalize_attributes(event.attributes());
        merge_defaults(&mut attributes, &self.user_properties.read());

        let outcome = self.queue.enqueue(Event::new(name, attributes));
        if self.denials.load(Ordering::SeqCst) != denials {
            // Consent was withdrawn after our check; the clear may have run
            // before this enqueue.
            self.discard_queued("consent_denied");
            return;
        }
        self.metrics.counter_inc("analytics.events.recorded", &[], 1);
        self.metrics
            .gauge_set("analytics.queue.depth", &[], outcome.len as f64);
        if outcome.evicted > 0 {
            self.metrics.counter_inc(
                "analytics.queue.evicted",
                &[("cause", "enqueue")],
                outcome.evicted as u64,
            );
            trace!(evicted = outcome.evicted, "queue full, oldest event evicted");
        }

        if outcome.len >= self.uploader.batch_size() {
            let _ = self
                .uploader
                .drain_and_send(&self.queue, DrainTrigger::Threshold);
        }
    }

    fn count_drop(&self, reason: &'static str, name: &str) {
        self.metrics
            .counter_inc("analytics.events.dropped", &[("reason", reason)], 1);
        trace!(event = name, reason, "event dropped at gate");
    }

    fn mark_initialized(&self) {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!("analytics pipeline active");
        }
    }

    /// Host-level switch. Turning analytics back on flushes what is queued.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was == enabled {
            return;
        }
        info!(enabled, "analytics toggled");
        if enabled {
            if self.consent.has_valid_consent() {
                self.mark_initialized();
            }
            let _ = self.uploader.drain_and_send(&self.queue, DrainTrigger::Flush);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn state(&self) -> PipelineState {
        if !self.initialized.load(Ordering::Acquire) {
            PipelineState::Uninitialized
        } else if self.is_enabled() {
            PipelineState::Active
        } else {
            PipelineState::Disabled
        }
    }

    /// Ask the player through the configured prompt and store the answer.
    ///
    /// Nothing is locked while the prompt is pending.
    pub async fn request_consent(&self) -> Result<bool, PipelineError> {
        let prompt = self
            .prompt
            .clone()
            .ok_or(PipelineError::NoConsentPrompt)?;
        let granted = prompt.request().await;
        self.set_consent(ConsentDecision::from_granted(granted))?;
        Ok(granted)
    }

    /// Store a consent decision directly. A denial discards queued events.
    pub fn set_consent(&self, decision: ConsentDecision) -> Result<(), PipelineError> {
        self.consent.set_status(decision)?;
        match decision {
            ConsentDecision::Granted => {
                if self.is_enabled() {
                    self.mark_initialized();
                }
            }
            ConsentDecision::Denied => {
                self.denials.fetch_add(1, Ordering::SeqCst);
                self.discard_queued("consent_denied");
            }
        }
        Ok(())
    }

    pub fn consent(&self) -> &ConsentStore {
        &self.consent
    }

    /// Send everything queued and wait for the result.
    ///
    /// Returns `None` when analytics is disabled, when there was nothing to
    /// send or when an earlier send did not settle in time.
    pub async fn flush(&self) -> Option<UploadOutcome> {
        if !self.is_enabled() {
            trace!(queued = self.queue.len(), "flush skipped, analytics disabled");
            return None;
        }
        if !self.uploader.wait_idle(FLUSH_WAIT).await {
            warn!("flush gave up waiting for in-flight upload");
            return None;
        }
        let handle = self.uploader.drain_and_send(&self.queue, DrainTrigger::Flush)?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "upload task did not complete");
                None
            }
        }
    }

    /// Drop everything queued.
    pub fn reset(&self) {
        self.discard_queued("reset");
    }

    fn discard_queued(&self, reason: &'static str) {
        let discarded = self.queue.clear();
        self.metrics.gauge_set("analytics.queue.depth", &[], 0.0);
        if discarded > 0 {
            self.metrics.counter_inc(
                "analytics.events.dropped",
                &[("reason", reason)],
                discarded as u64,
            );
        }
        info!(discarded, reason, "analytics queue cleared");
    }

    /// Set a property attached to every future event that does not carry the
    /// same key itself. Persisted across restarts.
    pub fn set_user_property(
        &self,
        key: &str,
        value: impl Into<AttrValue>,
    ) -> Result<(), PipelineError> {
        let key = normalize_key(key);
        if key.is_empty() {
            return Err(PipelineError::InvalidProperty(
                "key is empty after normalization".into(),
            ));
        }
        let value = normalize_value(value.into())
            .ok_or_else(|| PipelineError::InvalidProperty(format!("{key}: non-finite value")))?;

        // Writers are serialized so each one persists on top of the last.
        // Events only see the new value once it is stored.
        let _guard = self.persist_lock.lock();
        let mut updated = self.user_properties.read().clone();
        updated.insert(key.clone(), value);
        let json =
            serde_json::to_string(&updated).map_err(beacon_core::errors::StoreError::from)?;
        self.store.set(USER_PROPERTIES_KEY, &json)?;
        *self.user_properties.write() = updated;
        info!(key = %key, "user property set");
        Ok(())
    }

    pub fn user_properties(&self) -> Attributes {
        self.user_properties.read().clone()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn uploader(&self) -> &BatchUploader {
        &self.uploader
    }

    /// Queued events, oldest first.
    pub fn queued_events(&self) -> Vec<Event> {
        self.queue.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CustomEvent, GameEvent};
    use beacon_core::errors::StoreError;
    use beacon_store::MemoryStore;
    use beacon_transport::MockTransport;

    fn granted_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        ConsentStore::new(store.clone())
            .set_status(ConsentDecision::Granted)
            .unwrap();
        store
    }

    fn pipeline(store: Arc<MemoryStore>, config: PipelineConfig) -> AnalyticsPipeline {
        AnalyticsPipeline::builder(store, Arc::new(MockTransport::default()))
            .with_config(config)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let result = AnalyticsPipeline::builder(
            Arc::new(MemoryStore::new()),
            Arc::new(MockTransport::default()),
        )
        .with_config(PipelineConfig {
            queue_capacity: 5,
            batch_size: 6,
            ..Default::default()
        })
        .build();
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn build_outside_runtime_needs_handle() {
        let result = AnalyticsPipeline::builder(
            Arc::new(MemoryStore::new()),
            Arc::new(MockTransport::default()),
        )
        .build();
        assert!(matches!(result, Err(PipelineError::NoRuntime)));
    }

    #[tokio::test]
    async fn starts_uninitialized_without_consent() {
        let p = pipeline(Arc::new(MemoryStore::new()), PipelineConfig::default());
        assert_eq!(p.state(), PipelineState::Uninitialized);
        p.record(&GameEvent::SessionStart);
        assert_eq!(p.queue_len(), 0);
        assert_eq!(p.state(), PipelineState::Uninitialized);
        assert_eq!(
            p.metrics()
                .counter_get("analytics.events.dropped", &[("reason", "consent")]),
            1
        );
    }

    #[tokio::test]
    async fn starts_active_with_consent() {
        let p = pipeline(granted_store(), PipelineConfig::default());
        assert_eq!(p.state(), PipelineState::Active);
    }

    #[tokio::test]
    async fn disabled_config_drops_events() {
        let p = pipeline(
            granted_store(),
            PipelineConfig {
                analytics_enabled: false,
                ..Default::default()
            },
        );
        p.record(&GameEvent::LevelStarted { level: 1 });
        assert_eq!(p.queue_len(), 0);
        assert_eq!(
            p.metrics()
                .counter_get("analytics.events.dropped", &[("reason", "disabled")]),
            1
        );
    }

    #[tokio::test]
    async fn state_follows_enabled_after_activation() {
        let p = pipeline(granted_store(), PipelineConfig::default());
        p.set_enabled(false);
        assert_eq!(p.state(), PipelineState::Disabled);
        p.set_enabled(true);
        assert_eq!(p.state(), PipelineState::Active);
    }

    #[tokio::test]
    async fn records_are_normalized() {
        let p = pipeline(granted_store(), PipelineConfig::default());
        p.record(&CustomEvent::new("  Boss Fight!").with("Boss Name", "x".repeat(150)));

        let events = p.queued_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "boss_fight_");
        let name = events[0].attribute("boss_name").unwrap().as_str().unwrap();
        assert_eq!(name.len(), 100);
    }

    #[tokio::test]
    async fn empty_name_dropped() {
        let p = pipeline(granted_store(), PipelineConfig::default());
        p.record(&CustomEvent::new("   "));
        assert_eq!(p.queue_len(), 0);
        assert_eq!(
            p.metrics()
                .counter_get("analytics.events.dropped", &[("reason", "invalid_name")]),
            1
        );
    }

    #[tokio::test]
    async fn user_properties_merge_and_persist() {
        let store = granted_store();
        let p = pipeline(store.clone(), PipelineConfig::default());
        p.set_user_property("Tier", "gold").unwrap();
        p.set_user_property("level", 99i64).unwrap();
        p.record(&GameEvent::LevelStarted { level: 4 });

        let event = &p.queued_events()[0];
        assert_eq!(event.attribute("tier"), Some(&AttrValue::from("gold")));
        assert_eq!(event.attribute("level"), Some(&AttrValue::Int(4)));

        let reloaded = pipeline(store, PipelineConfig::default());
        assert_eq!(reloaded.user_properties().len(), 2);
    }

    #[tokio::test]
    async fn invalid_user_property_rejected() {
        let p = pipeline(granted_store(), PipelineConfig::default());
        assert!(matches!(
            p.set_user_property("  ", "x"),
            Err(PipelineError::InvalidProperty(_))
        ));
        assert!(matches!(
            p.set_user_property("ratio", f64::INFINITY),
            Err(PipelineError::InvalidProperty(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_user_properties_start_empty() {
        let store = granted_store();
        store.set(USER_PROPERTIES_KEY, "{not json").unwrap();
        let p = pipeline(store, PipelineConfig::default());
        assert!(p.user_properties().is_empty());
    }

    #[tokio::test]
    async fn denial_discards_queue() {
        let p = pipeline(granted_store(), PipelineConfig::default());
        p.record(&GameEvent::SessionStart);
        p.record(&GameEvent::SessionEnd { duration_secs: 60 });
        assert_eq!(p.queue_len(), 2);

        p.set_consent(ConsentDecision::Denied).unwrap();
        assert_eq!(p.queue_len(), 0);
        p.record(&GameEvent::SessionStart);
        assert_eq!(p.queue_len(), 0);
    }

    #[tokio::test]
    async fn reset_clears_queue() {
        let p = pipeline(granted_store(), PipelineConfig::default());
        p.record(&GameEvent::SessionStart);
        p.reset();
        assert_eq!(p.queue_len(), 0);
        assert_eq!(p.state(), PipelineState::Active);
    }

    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::Acquire) {
                return Err(StoreError::Database("disk full".into()));
            }
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn unsaved_user_property_is_not_applied() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            fail_writes: AtomicBool::new(false),
        });
        ConsentStore::new(store.clone())
            .set_status(ConsentDecision::Granted)
            .unwrap();
        let p = AnalyticsPipeline::builder(store.clone(), Arc::new(MockTransport::default()))
            .build()
            .unwrap();
        p.set_user_property("tier", "gold").unwrap();

        store.fail_writes.store(true, Ordering::Release);
        assert!(matches!(
            p.set_user_property("tier", "platinum"),
            Err(PipelineError::Store(_))
        ));
        assert!(p.set_user_property("region", "eu").is_err());

        assert_eq!(p.user_properties().len(), 1);
        p.record(&GameEvent::SessionStart);
        let event = &p.queued_events()[0];
        assert_eq!(event.attribute("tier"), Some(&AttrValue::from("gold")));
        assert_eq!(event.attribute("region"), None);
    }

    #[tokio::test]
    async fn flush_while_disabled_sends_nothing() {
        let mock = Arc::new(MockTransport::default());
        let p = AnalyticsPipeline::builder(granted_store(), mock.clone())
            .build()
            .unwrap();
        p.record(&GameEvent::SessionStart);
        p.record(&GameEvent::LevelStarted { level: 1 });
        p.set_enabled(false);

        assert!(p.flush().await.is_none());
        assert_eq!(mock.call_count(), 0);
        assert_eq!(p.queue_len(), 2);
    }

    #[tokio::test]
    async fn request_consent_without_prompt_errors() {
        let p = pipeline(Arc::new(MemoryStore::new()), PipelineConfig::default());
        assert!(matches!(
            p.request_consent().await,
            Err(PipelineError::NoConsentPrompt)
        ));
    }
}
