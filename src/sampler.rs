//! Periodic runtime-stat sampling
//!
//! One background timer refreshes a single "latest" snapshot slot — this is
//! not a time series — and republishes each field as a gauge in the metrics
//! registry so the alert evaluator and health aggregator can read them.
//!
//! Memory comes from `sysinfo`; the thread count is read from
//! `/proc/self/stat` and reported as 0 on platforms without procfs.

use crate::error::{Result, VigilError};
use crate::metrics::MetricsRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Configuration for the performance sampler
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Interval between samples
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(VigilError::Config(
                "sampler interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Latest runtime snapshot — overwritten on every tick
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub sampled_at: DateTime<Utc>,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub memory_percent: f64,
    pub thread_count: u64,
    pub requests_per_second: f64,
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        Self {
            sampled_at: Utc::now(),
            memory_used_bytes: 0,
            memory_total_bytes: 0,
            memory_percent: 0.0,
            thread_count: 0,
            requests_per_second: 0.0,
        }
    }
}

struct SamplerInner {
    system: sysinfo::System,
    pid: Option<sysinfo::Pid>,
    prev_requests: f64,
    prev_instant: Instant,
}

/// Periodic runtime-stat collector feeding the metrics registry
pub struct PerformanceSampler {
    metrics: Arc<MetricsRegistry>,
    inner: Mutex<SamplerInner>,
    latest: RwLock<PerformanceSnapshot>,
    config: SamplerConfig,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PerformanceSampler {
    pub fn new(metrics: Arc<MetricsRegistry>, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            tracing::warn!("Current pid unavailable, process memory will read as 0");
        }
        Ok(Self {
            metrics,
            inner: Mutex::new(SamplerInner {
                system: sysinfo::System::new(),
                pid,
                prev_requests: 0.0,
                prev_instant: Instant::now(),
            }),
            latest: RwLock::new(PerformanceSnapshot::default()),
            config,
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    /// Take one sample: refresh runtime stats, overwrite the latest slot,
    /// republish each field as a gauge
    pub fn sample_now(&self) -> PerformanceSnapshot {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

            inner.system.refresh_memory();
            let memory_total_bytes = inner.system.total_memory();

            let memory_used_bytes = match inner.pid {
                Some(pid) => {
                    inner.system.refresh_process(pid);
                    inner.system.process(pid).map(|p| p.memory()).unwrap_or(0)
                }
                None => 0,
            };
            let memory_percent = if memory_total_bytes > 0 {
                memory_used_bytes as f64 / memory_total_bytes as f64 * 100.0
            } else {
                0.0
            };

            let now = Instant::now();
            let requests = self.metrics.counter_sum("http_requests_total");
            let elapsed = now.duration_since(inner.prev_instant).as_secs_f64();
            let requests_per_second = if elapsed > 0.0 && requests >= inner.prev_requests {
                (requests - inner.prev_requests) / elapsed
            } else {
                0.0
            };
            inner.prev_requests = requests;
            inner.prev_instant = now;

            PerformanceSnapshot {
                sampled_at: Utc::now(),
                memory_used_bytes,
                memory_total_bytes,
                memory_percent,
                thread_count: read_thread_count(),
                requests_per_second,
            }
        };

        self.metrics
            .set_gauge("process_memory_bytes", snapshot.memory_used_bytes as f64, &[]);
        self.metrics
            .set_gauge("process_memory_percent", snapshot.memory_percent, &[]);
        self.metrics
            .set_gauge("process_threads", snapshot.thread_count as f64, &[]);
        self.metrics
            .set_gauge("requests_per_second", snapshot.requests_per_second, &[]);

        let mut latest = self.latest.write().unwrap_or_else(|e| e.into_inner());
        *latest = snapshot.clone();
        snapshot
    }

    /// Copy of the latest snapshot
    pub fn latest(&self) -> PerformanceSnapshot {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Start the sampling timer. Stopped by [`PerformanceSampler::close`].
    pub fn start(self: &Arc<Self>) {
        let sampler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.config.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sampler.sample_now();
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handle);
    }

    /// Stop the sampling timer. Idempotent.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = {
            let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Performance sampler task ended abnormally");
            }
        }
    }
}

/// Thread count from `/proc/self/stat` (field 20), 0 where unavailable
///
/// The comm field may contain spaces and parentheses, so parsing starts
/// after the last `)`.
fn read_thread_count() -> u64 {
    let content = match std::fs::read_to_string("/proc/self/stat") {
        Ok(c) => c,
        Err(_) => return 0,
    };
    let rest = match content.rfind(')') {
        Some(end) => &content[end + 2..],
        None => return 0,
    };
    // rest starts at field 3 (state); num_threads is field 20
    rest.split_whitespace()
        .nth(17)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(metrics: Arc<MetricsRegistry>) -> PerformanceSampler {
        PerformanceSampler::new(metrics, SamplerConfig::default()).unwrap()
    }

    #[test]
    fn test_config_rejects_zero_interval() {
        let config = SamplerConfig {
            interval: Duration::ZERO,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_overwrites_latest_slot() {
        let metrics = Arc::new(MetricsRegistry::new());
        let sampler = sampler(Arc::clone(&metrics));

        let first = sampler.sample_now();
        let second = sampler.sample_now();
        assert!(second.sampled_at >= first.sampled_at);

        // latest() is the most recent sample, not a series
        assert_eq!(sampler.latest().sampled_at, second.sampled_at);
    }

    #[test]
    fn test_sample_republishes_gauges() {
        let metrics = Arc::new(MetricsRegistry::new());
        let sampler = sampler(Arc::clone(&metrics));
        sampler.sample_now();

        assert!(metrics.gauge_value("process_memory_percent").is_some());
        assert!(metrics.gauge_value("process_threads").is_some());
        assert!(metrics.gauge_value("requests_per_second").is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_runtime_stats_nonzero() {
        let metrics = Arc::new(MetricsRegistry::new());
        let sampler = sampler(Arc::clone(&metrics));
        let snapshot = sampler.sample_now();

        assert!(snapshot.memory_total_bytes > 0);
        assert!(snapshot.thread_count >= 1);
    }

    #[test]
    fn test_requests_per_second_from_counter_delta() {
        let metrics = Arc::new(MetricsRegistry::new());
        let sampler = sampler(Arc::clone(&metrics));
        sampler.sample_now();

        for _ in 0..10 {
            metrics.increment_counter("http_requests_total", &[("path", "/a")]);
        }
        std::thread::sleep(Duration::from_millis(20));
        let snapshot = sampler.sample_now();
        assert!(snapshot.requests_per_second > 0.0);

        // No new requests: rate falls back to zero
        std::thread::sleep(Duration::from_millis(20));
        let idle = sampler.sample_now();
        assert_eq!(idle.requests_per_second, 0.0);
    }

    #[tokio::test]
    async fn test_start_and_close() {
        let metrics = Arc::new(MetricsRegistry::new());
        let sampler = Arc::new(
            PerformanceSampler::new(
                Arc::clone(&metrics),
                SamplerConfig {
                    interval: Duration::from_millis(10),
                },
            )
            .unwrap(),
        );

        sampler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sampler.close().await;

        assert!(metrics.gauge_value("process_memory_percent").is_some());
    }
}
