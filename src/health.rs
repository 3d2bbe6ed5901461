//! Read-time health synthesis
//!
//! `HealthAggregator` owns no state and runs no timer: every call to
//! [`HealthAggregator::status`] recomputes overall health from the current
//! metric gauges and the unresolved alert set.

use crate::alert::AlertEngine;
use crate::event::AuditSeverity;
use crate::metrics::MetricsRegistry;
use serde::Serialize;
use std::sync::Arc;

/// Memory percentage above which the process is degraded
const MEMORY_WARNING_PERCENT: f64 = 80.0;
/// Memory percentage above which the process is unhealthy
const MEMORY_UNHEALTHY_PERCENT: f64 = 90.0;
/// Thread count above which the process is degraded
const THREAD_WARNING_COUNT: f64 = 1000.0;

/// Overall health of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// One health computation with its inputs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_count: Option<u64>,
    pub unresolved_critical_alerts: usize,
    /// Human-readable reasons for any non-healthy status
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// Pure read-time synthesis over the registry and alert engine
pub struct HealthAggregator {
    metrics: Arc<MetricsRegistry>,
    alerts: Arc<AlertEngine>,
}

impl HealthAggregator {
    pub fn new(metrics: Arc<MetricsRegistry>, alerts: Arc<AlertEngine>) -> Self {
        Self { metrics, alerts }
    }

    /// Compute current health. Never cached.
    ///
    /// Unhealthy iff the memory gauge exceeds 90% or any unresolved Critical
    /// alert exists; memory above 80% or more than 1000 threads degrade to
    /// Warning.
    pub fn status(&self) -> HealthReport {
        let memory_percent = self.metrics.gauge_value("process_memory_percent");
        let thread_count = self.metrics.gauge_value("process_threads");
        let unresolved_critical = self.alerts.unresolved_at_or_above(AuditSeverity::Critical);

        let mut status = HealthStatus::Healthy;
        let mut notes = Vec::new();

        if let Some(mem) = memory_percent {
            if mem > MEMORY_UNHEALTHY_PERCENT {
                status = status.max(HealthStatus::Unhealthy);
                notes.push(format!("memory at {:.1}%", mem));
            } else if mem > MEMORY_WARNING_PERCENT {
                status = status.max(HealthStatus::Warning);
                notes.push(format!("memory elevated at {:.1}%", mem));
            }
        }

        if let Some(threads) = thread_count {
            if threads > THREAD_WARNING_COUNT {
                status = status.max(HealthStatus::Warning);
                notes.push(format!("{} threads alive", threads as u64));
            }
        }

        if unresolved_critical > 0 {
            status = status.max(HealthStatus::Unhealthy);
            notes.push(format!(
                "{} unresolved critical alert(s)",
                unresolved_critical
            ));
        }

        HealthReport {
            status,
            memory_percent,
            thread_count: thread_count.map(|t| t as u64),
            unresolved_critical_alerts: unresolved_critical,
            notes,
        }
    }
}
