use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// Histograms keep only the most recent observations.
const HISTOGRAM_WINDOW: usize = 1024;

/// Kind of a recorded metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// One metric value captured by [`MetricsRecorder::snapshot`].
#[derive(Clone, Debug, Serialize)]
pub struct MetricSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub kind: MetricKind,
    pub value: f64,
    pub taken_at: DateTime<Utc>,
}

/// Summary statistics over a histogram window.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        sorted.sort();
        Self {
            name: name.to_string(),
            labels: sorted,
        }
    }

    fn label_map(&self) -> BTreeMap<String, String> {
        self.labels.iter().cloned().collect()
    }
}

#[derive(Default)]
struct Window {
    values: VecDeque<f64>,
    count: u64,
    sum: f64,
}

impl Window {
    fn observe(&mut self, value: f64) {
        if self.values.len() == HISTOGRAM_WINDOW {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.count += 1;
        self.sum += value;
    }

    fn summary(&self) -> HistogramSummary {
        if self.values.is_empty() {
            return HistogramSummary::default();
        }
        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let last = sorted.len() - 1;
        let pick = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(last)];
        HistogramSummary {
            count: self.count,
            sum: self.sum,
            min: sorted[0],
            max: sorted[last],
            p50: pick(0.50),
            p95: pick(0.95),
        }
    }
}

/// Thread-safe in-process metrics: counters, gauges and windowed histograms,
/// keyed by name plus labels.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, AtomicU64>>,
    // f64 stored as raw bits
    gauges: RwLock<HashMap<MetricKey, AtomicU64>>,
    histograms: RwLock<HashMap<MetricKey, Mutex<Window>>>,
}

/// Run `f` on the entry for `key`, inserting it with `init` on first use.
/// The write lock is only taken for new keys.
fn with_entry<T, R>(
    map: &RwLock<HashMap<MetricKey, T>>,
    key: MetricKey,
    init: impl FnOnce() -> T,
    f: impl FnOnce(&T) -> R,
) -> R {
    {
        let read = map.read();
        if let Some(entry) = read.get(&key) {
            return f(entry);
        }
    }
    let mut write = map.write();
    let entry = write.entry(key).or_insert_with(init);
    f(entry)
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        with_entry(
            &self.counters,
            MetricKey::new(name, labels),
            || AtomicU64::new(0),
            |c| c.fetch_add(n, Ordering::Relaxed),
        );
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters
            .read()
            .get(&key)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Sum of a counter across every label set.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .read()
            .iter()
            .filter(|(k, _)| k.name == name)
            .map(|(_, c)| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        with_entry(
            &self.gauges,
            MetricKey::new(name, labels),
            || AtomicU64::new(0f64.to_bits()),
            |g| g.store(value.to_bits(), Ordering::Relaxed),
        );
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.gauges
            .read()
            .get(&key)
            .map_or(0.0, |g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        with_entry(
            &self.histograms,
            MetricKey::new(name, labels),
            || Mutex::new(Window::default()),
            |h| h.lock().observe(value),
        );
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(|h| h.lock().summary())
            .unwrap_or_default()
    }

    /// Capture every metric. Histograms report their p50.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let now = Utc::now();
        let mut samples = Vec::new();

        for (key, c) in self.counters.read().iter() {
            samples.push(MetricSample {
                name: key.name.clone(),
                labels: key.label_map(),
                kind: MetricKind::Counter,
                value: c.load(Ordering::Relaxed) as f64,
                taken_at: now,
            });
        }
        for (key, g) in self.gauges.read().iter() {
            samples.push(MetricSample {
                name: key.name.clone(),
                labels: key.label_map(),
                kind: MetricKind::Gauge,
                value: f64::from_bits(g.load(Ordering::Relaxed)),
                taken_at: now,
            });
        }
        for (key, h) in self.histograms.read().iter() {
            samples.push(MetricSample {
                name: key.name.clone(),
                labels: key.label_map(),
                kind: MetricKind::Histogram,
                value: h.lock().summary().p50,
                taken_at: now,
            });
        }

        samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        samples
    }
}
