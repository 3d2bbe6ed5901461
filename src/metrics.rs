//! In-memory metrics registry
//!
//! Named counters, gauges, and timings with tag dimensions. One
//! reader/writer lock guards the whole map — metric cardinality is bounded
//! by design, so per-metric locking buys nothing. Callers must tag only with
//! closed enumerations (method, path, status), never free-form input.
//!
//! Reads go through [`MetricsRegistry::get_metrics`], which returns a
//! point-in-time copy — never live references, so readers cannot observe
//! torn updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

/// Kind of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically increasing value
    Counter,
    /// Last-write-wins instantaneous value
    Gauge,
    /// Last-write-wins duration in milliseconds
    Timing,
}

/// A single named metric
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

/// Registry of in-process metrics
///
/// Thread-safe; every mutation takes the single write lock briefly. Intended
/// to be constructed once per process and shared via `Arc`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    metrics: RwLock<HashMap<String, Metric>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one, creating it at zero if absent
    pub fn increment_counter(&self, name: &str, tags: &[(&str, &str)]) {
        self.add_to_counter(name, 1.0, tags);
    }

    /// Add to a counter, creating it at zero if absent
    ///
    /// Negative amounts are ignored — counters are monotonic.
    pub fn add_to_counter(&self, name: &str, amount: f64, tags: &[(&str, &str)]) {
        if amount < 0.0 {
            tracing::debug!(metric = name, amount, "Ignored negative counter increment");
            return;
        }
        let key = metric_key(name, tags);
        let mut metrics = self.write_lock();
        let entry = metrics.entry(key).or_insert_with(|| Metric {
            name: name.to_string(),
            kind: MetricKind::Counter,
            value: 0.0,
            tags: owned_tags(tags),
            updated_at: Utc::now(),
        });
        entry.value += amount;
        entry.updated_at = Utc::now();
    }

    /// Set a gauge to an instantaneous value (last write wins)
    pub fn set_gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.put(name, MetricKind::Gauge, value, tags);
    }

    /// Record a timing in milliseconds (last write wins)
    pub fn record_timing(&self, name: &str, duration: Duration, tags: &[(&str, &str)]) {
        self.put(
            name,
            MetricKind::Timing,
            duration.as_secs_f64() * 1000.0,
            tags,
        );
    }

    /// Convenience wrapper for HTTP producers: bumps the request counter,
    /// records the request timing, and bumps the error counter for 4xx/5xx.
    pub fn track_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        let status_str = status.to_string();
        let tags: &[(&str, &str)] = &[
            ("method", method),
            ("path", path),
            ("status", &status_str),
        ];
        self.increment_counter("http_requests_total", tags);
        self.record_timing(
            "http_request_duration_ms",
            duration,
            &[("method", method), ("path", path)],
        );
        if status >= 400 {
            self.increment_counter("http_errors_total", tags);
        }
    }

    /// Point-in-time copy of all metrics, keyed by name plus tag set
    pub fn get_metrics(&self) -> HashMap<String, Metric> {
        self.read_lock().clone()
    }

    /// Current value of an untagged counter (0 if absent)
    pub fn counter_value(&self, name: &str) -> f64 {
        self.read_lock().get(name).map(|m| m.value).unwrap_or(0.0)
    }

    /// Current value of an untagged gauge
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.read_lock().get(name).map(|m| m.value)
    }

    /// Sum of a counter across all tag sets (e.g. every status/path cell of
    /// `http_requests_total`)
    pub fn counter_sum(&self, name: &str) -> f64 {
        self.read_lock()
            .values()
            .filter(|m| m.name == name && m.kind == MetricKind::Counter)
            .map(|m| m.value)
            .sum()
    }

    fn put(&self, name: &str, kind: MetricKind, value: f64, tags: &[(&str, &str)]) {
        let key = metric_key(name, tags);
        let mut metrics = self.write_lock();
        metrics.insert(
            key,
            Metric {
                name: name.to_string(),
                kind,
                value,
                tags: owned_tags(tags),
                updated_at: Utc::now(),
            },
        );
    }

    // A poisoned lock means a panic mid-update elsewhere; the map itself is
    // always left consistent, so recover the guard and keep serving.
    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Metric>> {
        self.metrics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Metric>> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Stable map key: name alone when untagged, else `name{k=v,...}` with keys
/// sorted so tag order at the call site doesn't split a metric in two.
fn metric_key(name: &str, tags: &[(&str, &str)]) -> String {
    if tags.is_empty() {
        return name.to_string();
    }
    let sorted: BTreeMap<&str, &str> = tags.iter().copied().collect();
    let parts: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}{{{}}}", name, parts.join(","))
}

fn owned_tags(tags: &[(&str, &str)]) -> BTreeMap<String, String> {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_monotonicity() {
        let registry = MetricsRegistry::new();
        for _ in 0..50 {
            registry.increment_counter("requests", &[]);
        }
        assert_eq!(registry.get_metrics()["requests"].value, 50.0);
        assert_eq!(registry.counter_value("requests"), 50.0);
    }

    #[test]
    fn test_counter_ignores_negative_amount() {
        let registry = MetricsRegistry::new();
        registry.add_to_counter("requests", 5.0, &[]);
        registry.add_to_counter("requests", -3.0, &[]);
        assert_eq!(registry.counter_value("requests"), 5.0);
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("memory_percent", 42.0, &[]);
        registry.set_gauge("memory_percent", 91.5, &[]);
        assert_eq!(registry.gauge_value("memory_percent"), Some(91.5));
    }

    #[test]
    fn test_timing_stored_in_milliseconds() {
        let registry = MetricsRegistry::new();
        registry.record_timing("db_query", Duration::from_micros(2500), &[]);
        let metrics = registry.get_metrics();
        assert_eq!(metrics["db_query"].kind, MetricKind::Timing);
        assert!((metrics["db_query"].value - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tags_create_separate_cells() {
        let registry = MetricsRegistry::new();
        registry.increment_counter("hits", &[("path", "/a")]);
        registry.increment_counter("hits", &[("path", "/b")]);
        registry.increment_counter("hits", &[("path", "/a")]);

        let metrics = registry.get_metrics();
        assert_eq!(metrics["hits{path=/a}"].value, 2.0);
        assert_eq!(metrics["hits{path=/b}"].value, 1.0);
        assert_eq!(registry.counter_sum("hits"), 3.0);
    }

    #[test]
    fn test_tag_order_does_not_split_metric() {
        let registry = MetricsRegistry::new();
        registry.increment_counter("hits", &[("a", "1"), ("b", "2")]);
        registry.increment_counter("hits", &[("b", "2"), ("a", "1")]);
        assert_eq!(registry.get_metrics().len(), 1);
        assert_eq!(registry.counter_sum("hits"), 2.0);
    }

    #[test]
    fn test_get_metrics_is_a_snapshot() {
        let registry = MetricsRegistry::new();
        registry.increment_counter("requests", &[]);
        let snapshot = registry.get_metrics();
        registry.increment_counter("requests", &[]);

        // The copy does not move with later writes
        assert_eq!(snapshot["requests"].value, 1.0);
        assert_eq!(registry.counter_value("requests"), 2.0);
    }

    #[test]
    fn test_track_request_success() {
        let registry = MetricsRegistry::new();
        registry.track_request("GET", "/documents", 200, Duration::from_millis(15));

        assert_eq!(registry.counter_sum("http_requests_total"), 1.0);
        assert_eq!(registry.counter_sum("http_errors_total"), 0.0);
        let metrics = registry.get_metrics();
        let timing = metrics
            .values()
            .find(|m| m.name == "http_request_duration_ms")
            .unwrap();
        assert!((timing.value - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_track_request_error_bumps_error_counter() {
        let registry = MetricsRegistry::new();
        registry.track_request("POST", "/verify", 500, Duration::from_millis(3));
        registry.track_request("POST", "/verify", 404, Duration::from_millis(1));
        registry.track_request("GET", "/health", 200, Duration::from_millis(1));

        assert_eq!(registry.counter_sum("http_requests_total"), 3.0);
        assert_eq!(registry.counter_sum("http_errors_total"), 2.0);
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;

        let registry = Arc::new(MetricsRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    registry.increment_counter("concurrent", &[]);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.counter_value("concurrent"), 800.0);
    }
}
