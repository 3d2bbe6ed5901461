//! # vigil
//!
//! Asynchronous audit logging, in-memory metrics, and security alerting for
//! single-process services — built from primitives, no external broker or
//! time-series database.
//!
//! ## Overview
//!
//! `vigil` bundles four cooperating singletons behind one composition root:
//!
//! - **AuditLogger** — fire-and-forget structured events, buffered through a
//!   bounded queue into rotating daily JSONL files, with a synchronous
//!   fallback write under backpressure so nothing is silently dropped.
//! - **MetricsRegistry** — named counters, gauges, and timings with tags;
//!   reads return point-in-time copies.
//! - **AlertEngine** — per-key abuse trackers (brute force, rate limiting,
//!   verification tampering) plus periodic threshold evaluation over the
//!   registry; alerts resolve exactly once.
//! - **PerformanceSampler / HealthAggregator** — a single "latest" runtime
//!   snapshot republished as gauges, and pure read-time health synthesis.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vigil::{EventContext, HubConfig, ObservabilityHub};
//!
//! # async fn example() -> vigil::Result<()> {
//! let hub = ObservabilityHub::new(HubConfig::default())?;
//!
//! // Producers log fire-and-forget
//! let ctx = EventContext::default().with_client_ip("203.0.113.9");
//! hub.audit().log_auth_event(&ctx, "login", false, Default::default());
//! hub.alerts().track_auth_failure("203.0.113.9", None);
//! hub.metrics().track_request("POST", "/login", 401, std::time::Duration::from_millis(12));
//!
//! // Ops surface reads
//! println!("health: {}", hub.health().status);
//!
//! // Clean shutdown drains the audit queue — no loss
//! hub.close().await;
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod audit;
pub mod error;
pub mod event;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod rotation;
pub mod sampler;

// Re-export core types
pub use alert::{AlertConfig, AlertEngine, AlertType, SecurityAlert};
pub use audit::{AuditConfig, AuditLogger, AuditStats};
pub use error::{Result, VigilError};
pub use event::{
    AuditEvent, AuditEventType, AuditSeverity, DetailValue, Details, EventContext, EventOutcome,
};
pub use health::{HealthAggregator, HealthReport, HealthStatus};
pub use hub::{HubConfig, ObservabilityHub};
pub use metrics::{Metric, MetricKind, MetricsRegistry};
pub use rotation::{CleanupStats, RetentionPolicy, RotateReason, RotationManager};
pub use sampler::{PerformanceSampler, PerformanceSnapshot, SamplerConfig};
