//! Composition root for the observability core
//!
//! `ObservabilityHub` constructs the four singletons, wires the background
//! timers, and hands out `Arc` handles for injection into producers. There
//! is no ambient global state anywhere in this crate — everything flows from
//! one explicitly constructed hub per process.

use crate::alert::{AlertConfig, AlertEngine};
use crate::audit::{AuditConfig, AuditLogger};
use crate::error::Result;
use crate::event::EventOutcome;
use crate::health::{HealthAggregator, HealthReport};
use crate::metrics::MetricsRegistry;
use crate::sampler::{PerformanceSampler, SamplerConfig};
use std::sync::Arc;

/// Configuration for the whole observability core
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    pub audit: AuditConfig,
    pub alerts: AlertConfig,
    pub sampler: SamplerConfig,
}

/// One-per-process bundle of the observability singletons
///
/// Construction starts the audit writer/flush tasks, the alert evaluation
/// timer, and the performance sampler; [`ObservabilityHub::close`] stops
/// them in dependency order, draining the audit queue last.
pub struct ObservabilityHub {
    audit: Arc<AuditLogger>,
    metrics: Arc<MetricsRegistry>,
    alerts: Arc<AlertEngine>,
    sampler: Arc<PerformanceSampler>,
    health: HealthAggregator,
}

impl ObservabilityHub {
    /// Validate all configs, build the components, start background tasks
    ///
    /// Must be called from within a tokio runtime. Any configuration or
    /// startup I/O failure aborts construction.
    pub fn new(config: HubConfig) -> Result<Self> {
        let audit = Arc::new(AuditLogger::new(config.audit)?);
        let metrics = Arc::new(MetricsRegistry::new());
        let alerts = Arc::new(AlertEngine::new(config.alerts)?);
        let sampler = Arc::new(PerformanceSampler::new(
            Arc::clone(&metrics),
            config.sampler,
        )?);
        let health = HealthAggregator::new(Arc::clone(&metrics), Arc::clone(&alerts));

        alerts.start_evaluation(Arc::clone(&metrics));
        sampler.start();

        audit.log_system_event("start", EventOutcome::Success, "Observability core started");

        Ok(Self {
            audit,
            metrics,
            alerts,
            sampler,
            health,
        })
    }

    /// Audit pipeline handle for producers
    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Metrics registry handle for producers
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Alert engine handle for producers and the ops surface
    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    /// Performance sampler handle for the ops surface
    pub fn sampler(&self) -> &Arc<PerformanceSampler> {
        &self.sampler
    }

    /// Current overall health (recomputed on every call)
    pub fn health(&self) -> HealthReport {
        self.health.status()
    }

    /// Stop all background tasks: evaluation and sampling first, then drain
    /// and close the audit pipeline. Idempotent.
    pub async fn close(&self) {
        self.alerts.close().await;
        self.sampler.close().await;
        self.audit
            .log_system_event("shutdown", EventOutcome::Success, "Observability core stopping");
        self.audit.close().await;
    }
}
