//! Security alert engine
//!
//! Alerts enter the world unresolved and can move exactly once to resolved —
//! there is no re-open. They are created two ways: directly by producers that
//! detect abuse (the per-key `track_*` helpers below), or by the periodic
//! threshold evaluation task reading the metrics registry.
//!
//! Threshold evaluation deliberately has no deduplication or hysteresis:
//! every breached tick emits a fresh alert record. That mirrors the intended
//! operational model (each breach is evidence) at the cost of being
//! storm-prone under a sustained breach.

use crate::error::{Result, VigilError};
use crate::event::{AuditSeverity, Details};
use crate::metrics::MetricsRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Kind of detected condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Repeated auth failures from one source
    BruteForceAttempt,
    /// Repeated rate-limit violations from one source
    RateLimitExceeded,
    /// Repeated verification failures against one document
    SuspiciousVerification,
    /// Process memory above the configured percentage
    HighMemoryUsage,
    /// Thread count above the configured limit
    HighThreadCount,
    /// HTTP error ratio above the configured percentage
    HighErrorRate,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertType::BruteForceAttempt => "brute_force_attempt",
            AlertType::RateLimitExceeded => "rate_limit_exceeded",
            AlertType::SuspiciousVerification => "suspicious_verification",
            AlertType::HighMemoryUsage => "high_memory_usage",
            AlertType::HighThreadCount => "high_thread_count",
            AlertType::HighErrorRate => "high_error_rate",
        };
        f.write_str(s)
    }
}

/// A detected security or health condition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAlert {
    /// Unique alert identifier (alr-<uuid>)
    pub id: String,

    /// When the condition was detected
    pub timestamp: DateTime<Utc>,

    pub severity: AuditSeverity,
    pub alert_type: AlertType,

    /// Producer that raised the alert (e.g. "auth", "rate_limiter", "evaluator")
    pub source: String,

    pub message: String,

    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub details: Details,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Resolution state — one-way, set by an operator
    pub resolved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl SecurityAlert {
    fn new(
        alert_type: AlertType,
        severity: AuditSeverity,
        source: impl Into<String>,
        message: impl Into<String>,
        details: Details,
    ) -> Self {
        Self {
            id: format!("alr-{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            severity,
            alert_type,
            source: source.into(),
            message: message.into(),
            details,
            ip_address: None,
            user_id: None,
            session_id: None,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
        }
    }
}

/// Thresholds and timing for the alert engine
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Auth failures per key before a brute-force alert fires
    pub auth_failure_threshold: usize,

    /// Rate-limit violations per key before an alert fires
    pub rate_limit_threshold: usize,

    /// Verification failures per key before an alert fires
    pub verification_failure_threshold: usize,

    /// Sliding window over which per-key failures are counted
    pub failure_window: Duration,

    /// Memory gauge percentage above which evaluation alerts
    pub memory_alert_percent: f64,

    /// Thread count above which evaluation alerts
    pub thread_alert_count: u64,

    /// HTTP error ratio percentage above which evaluation alerts
    pub error_rate_percent: f64,

    /// Interval between threshold evaluation passes
    pub check_interval: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            auth_failure_threshold: 5,
            rate_limit_threshold: 10,
            verification_failure_threshold: 3,
            failure_window: Duration::from_secs(15 * 60),
            memory_alert_percent: 90.0,
            thread_alert_count: 1000,
            error_rate_percent: 10.0,
            check_interval: Duration::from_secs(30),
        }
    }
}

impl AlertConfig {
    /// Validate configuration, failing fast on nonsense
    pub fn validate(&self) -> Result<()> {
        if self.failure_window.is_zero() {
            return Err(VigilError::Config(
                "failure_window must be greater than zero".to_string(),
            ));
        }
        if self.check_interval.is_zero() {
            return Err(VigilError::Config(
                "check_interval must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.memory_alert_percent) {
            return Err(VigilError::Config(format!(
                "memory_alert_percent must be within 0..=100, got {}",
                self.memory_alert_percent
            )));
        }
        Ok(())
    }
}

/// Per-key sliding window of failure instants
type FailureWindows = Mutex<HashMap<String, VecDeque<Instant>>>;

/// In-memory alert store plus abuse trackers and threshold evaluation
///
/// Construct once per process and share via `Arc`; producers call the
/// `track_*` and `create_alert` methods, the ops surface reads with
/// `get_alerts` and resolves with `resolve_alert`.
pub struct AlertEngine {
    config: AlertConfig,

    /// Alerts indexed by id for O(1) resolve
    alerts: RwLock<HashMap<String, SecurityAlert>>,

    auth_failures: FailureWindows,
    rate_limit_violations: FailureWindows,
    verification_failures: FailureWindows,

    shutdown_tx: watch::Sender<bool>,
    evaluator: Mutex<Option<JoinHandle<()>>>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            alerts: RwLock::new(HashMap::new()),
            auth_failures: Mutex::new(HashMap::new()),
            rate_limit_violations: Mutex::new(HashMap::new()),
            verification_failures: Mutex::new(HashMap::new()),
            shutdown_tx,
            evaluator: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Create an alert directly (producer-detected condition)
    pub fn create_alert(
        &self,
        alert_type: AlertType,
        severity: AuditSeverity,
        message: impl Into<String>,
        details: Details,
    ) -> SecurityAlert {
        self.insert(SecurityAlert::new(
            alert_type,
            severity,
            "producer",
            message,
            details,
        ))
    }

    /// Resolve an alert, stamping the operator and time
    ///
    /// Resolving an already-resolved alert overwrites the stamp (the
    /// transition stays one-way; only the bookkeeping moves).
    pub fn resolve_alert(&self, id: &str, resolved_by: &str) -> Result<()> {
        let mut alerts = self.alerts.write().unwrap_or_else(|e| e.into_inner());
        let alert = alerts
            .get_mut(id)
            .ok_or_else(|| VigilError::AlertNotFound(id.to_string()))?;
        alert.resolved = true;
        alert.resolved_at = Some(Utc::now());
        alert.resolved_by = Some(resolved_by.to_string());
        tracing::info!(alert_id = id, resolved_by, "Alert resolved");
        Ok(())
    }

    /// Alerts in the given resolution state, newest first
    pub fn get_alerts(&self, resolved: bool) -> Vec<SecurityAlert> {
        let alerts = self.alerts.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<SecurityAlert> = alerts
            .values()
            .filter(|a| a.resolved == resolved)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    /// Number of unresolved alerts at the given severity or above
    pub fn unresolved_at_or_above(&self, severity: AuditSeverity) -> usize {
        let alerts = self.alerts.read().unwrap_or_else(|e| e.into_inner());
        alerts
            .values()
            .filter(|a| !a.resolved && a.severity >= severity)
            .count()
    }

    /// Record an auth failure for `ip`; alerts once the in-window count
    /// exceeds the threshold, then resets that key's window.
    pub fn track_auth_failure(&self, ip: &str, user_id: Option<&str>) {
        let count = record_failure(
            &self.auth_failures,
            ip,
            self.config.failure_window,
        );
        if count > self.config.auth_failure_threshold {
            reset_key(&self.auth_failures, ip);
            let mut alert = SecurityAlert::new(
                AlertType::BruteForceAttempt,
                AuditSeverity::Critical,
                "auth",
                format!("{} failed auth attempts from {}", count, ip),
                Details::new(),
            );
            alert.ip_address = Some(ip.to_string());
            alert.user_id = user_id.map(str::to_string);
            alert
                .details
                .insert("failureCount".to_string(), (count as i64).into());
            self.insert(alert);
        }
    }

    /// Record a rate-limit violation for `key` (usually the client IP)
    pub fn track_rate_limit_violation(&self, key: &str, endpoint: &str) {
        let count = record_failure(
            &self.rate_limit_violations,
            key,
            self.config.failure_window,
        );
        if count > self.config.rate_limit_threshold {
            reset_key(&self.rate_limit_violations, key);
            let mut alert = SecurityAlert::new(
                AlertType::RateLimitExceeded,
                AuditSeverity::Warning,
                "rate_limiter",
                format!("{} rate-limit violations from {} on {}", count, key, endpoint),
                Details::new(),
            );
            alert.ip_address = Some(key.to_string());
            alert
                .details
                .insert("endpoint".to_string(), endpoint.into());
            alert
                .details
                .insert("violationCount".to_string(), (count as i64).into());
            self.insert(alert);
        }
    }

    /// Record a verification failure against `document_id`
    pub fn track_verification_failure(&self, document_id: &str, ip: Option<&str>) {
        let count = record_failure(
            &self.verification_failures,
            document_id,
            self.config.failure_window,
        );
        if count > self.config.verification_failure_threshold {
            reset_key(&self.verification_failures, document_id);
            let mut alert = SecurityAlert::new(
                AlertType::SuspiciousVerification,
                AuditSeverity::Critical,
                "verification",
                format!(
                    "{} failed verification attempts against document {}",
                    count, document_id
                ),
                Details::new(),
            );
            alert.ip_address = ip.map(str::to_string);
            alert
                .details
                .insert("documentId".to_string(), document_id.into());
            alert
                .details
                .insert("failureCount".to_string(), (count as i64).into());
            self.insert(alert);
        }
    }

    /// Start the periodic threshold evaluation task over the registry
    ///
    /// Reads the `process_memory_percent` and `process_threads` gauges and
    /// the HTTP error ratio each tick. A breach alerts on *every* tick it
    /// persists — no suppression. Stopped by [`AlertEngine::close`].
    pub fn start_evaluation(self: &Arc<Self>, metrics: Arc<MetricsRegistry>) {
        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.config.check_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would alert before producers have
            // reported anything
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.evaluate_thresholds(&metrics),
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        let mut slot = self.evaluator.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handle);
    }

    /// One evaluation pass (exposed for tests and on-demand checks)
    pub fn evaluate_thresholds(&self, metrics: &MetricsRegistry) {
        if let Some(mem) = metrics.gauge_value("process_memory_percent") {
            if mem > self.config.memory_alert_percent {
                let mut details = Details::new();
                details.insert("memoryPercent".to_string(), mem.into());
                let alert = SecurityAlert::new(
                    AlertType::HighMemoryUsage,
                    AuditSeverity::Critical,
                    "evaluator",
                    format!("Process memory at {:.1}%", mem),
                    details,
                );
                self.insert(alert);
            }
        }

        if let Some(threads) = metrics.gauge_value("process_threads") {
            if threads > self.config.thread_alert_count as f64 {
                let mut details = Details::new();
                details.insert("threadCount".to_string(), (threads as i64).into());
                let alert = SecurityAlert::new(
                    AlertType::HighThreadCount,
                    AuditSeverity::Warning,
                    "evaluator",
                    format!("{} threads alive", threads as u64),
                    details,
                );
                self.insert(alert);
            }
        }

        let requests = metrics.counter_sum("http_requests_total");
        if requests > 0.0 {
            let errors = metrics.counter_sum("http_errors_total");
            let rate = errors / requests * 100.0;
            if rate > self.config.error_rate_percent {
                let mut details = Details::new();
                details.insert("errorRatePercent".to_string(), rate.into());
                details.insert("requests".to_string(), (requests as i64).into());
                details.insert("errors".to_string(), (errors as i64).into());
                let alert = SecurityAlert::new(
                    AlertType::HighErrorRate,
                    AuditSeverity::Warning,
                    "evaluator",
                    format!("HTTP error rate at {:.1}%", rate),
                    details,
                );
                self.insert(alert);
            }
        }
    }

    /// Stop the evaluation task. Idempotent.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = {
            let mut slot = self.evaluator.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Alert evaluation task ended abnormally");
            }
        }
    }

    fn insert(&self, alert: SecurityAlert) -> SecurityAlert {
        tracing::warn!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            ip = alert.ip_address.as_deref().unwrap_or("-"),
            "{}",
            alert.message
        );
        let mut alerts = self.alerts.write().unwrap_or_else(|e| e.into_inner());
        alerts.insert(alert.id.clone(), alert.clone());
        alert
    }
}

/// Push `now` into the key's window, prune expired entries, return the count
fn record_failure(windows: &FailureWindows, key: &str, window: Duration) -> usize {
    let now = Instant::now();
    let mut map = windows.lock().unwrap_or_else(|e| e.into_inner());
    let entries = map.entry(key.to_string()).or_default();
    while let Some(front) = entries.front() {
        if now.duration_since(*front) > window {
            entries.pop_front();
        } else {
            break;
        }
    }
    entries.push_back(now);
    entries.len()
}

fn reset_key(windows: &FailureWindows, key: &str) {
    let mut map = windows.lock().unwrap_or_else(|e| e.into_inner());
    map.remove(key);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AlertEngine {
        AlertEngine::new(AlertConfig::default()).unwrap()
    }

    #[test]
    fn test_config_validation() {
        let bad = AlertConfig {
            failure_window: Duration::ZERO,
            ..Default::default()
        };
        assert!(AlertEngine::new(bad).is_err());

        let bad = AlertConfig {
            memory_alert_percent: 150.0,
            ..Default::default()
        };
        assert!(AlertEngine::new(bad).is_err());
    }

    #[test]
    fn test_create_and_list_alerts() {
        let engine = engine();
        let alert = engine.create_alert(
            AlertType::RateLimitExceeded,
            AuditSeverity::Warning,
            "Too many requests",
            Details::new(),
        );

        assert!(alert.id.starts_with("alr-"));
        assert!(!alert.resolved);
        assert_eq!(engine.get_alerts(false).len(), 1);
        assert!(engine.get_alerts(true).is_empty());
    }

    #[test]
    fn test_resolve_moves_alert_exactly_once() {
        let engine = engine();
        let alert = engine.create_alert(
            AlertType::HighErrorRate,
            AuditSeverity::Warning,
            "Errors",
            Details::new(),
        );

        engine.resolve_alert(&alert.id, "ops").unwrap();
        assert!(engine.get_alerts(false).is_empty());

        let resolved = engine.get_alerts(true);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].resolved_by.as_deref(), Some("ops"));
        assert!(resolved[0].resolved_at.is_some());
    }

    #[test]
    fn test_resolve_unknown_id_is_not_found() {
        let engine = engine();
        engine.create_alert(
            AlertType::HighErrorRate,
            AuditSeverity::Warning,
            "Errors",
            Details::new(),
        );

        let err = engine.resolve_alert("alr-nope", "ops").unwrap_err();
        assert!(matches!(err, VigilError::AlertNotFound(_)));
        // Both lists unchanged
        assert_eq!(engine.get_alerts(false).len(), 1);
        assert!(engine.get_alerts(true).is_empty());
    }

    #[test]
    fn test_double_resolve_overwrites_stamp() {
        let engine = engine();
        let alert = engine.create_alert(
            AlertType::HighErrorRate,
            AuditSeverity::Warning,
            "Errors",
            Details::new(),
        );

        engine.resolve_alert(&alert.id, "first").unwrap();
        engine.resolve_alert(&alert.id, "second").unwrap();

        let resolved = engine.get_alerts(true);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].resolved_by.as_deref(), Some("second"));
    }

    #[test]
    fn test_brute_force_scenario() {
        // Six failures with threshold 5 → one critical alert carrying the IP
        let engine = engine();
        for _ in 0..6 {
            engine.track_auth_failure("10.0.0.5", Some("user-1"));
        }

        let alerts = engine.get_alerts(false);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::BruteForceAttempt);
        assert_eq!(alerts[0].severity, AuditSeverity::Critical);
        assert_eq!(alerts[0].ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(alerts[0].user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_auth_failures_below_threshold_stay_quiet() {
        let engine = engine();
        for _ in 0..5 {
            engine.track_auth_failure("10.0.0.5", None);
        }
        assert!(engine.get_alerts(false).is_empty());
    }

    #[test]
    fn test_auth_failures_tracked_per_key() {
        let engine = engine();
        for _ in 0..4 {
            engine.track_auth_failure("10.0.0.1", None);
            engine.track_auth_failure("10.0.0.2", None);
        }
        // Neither IP crossed the threshold on its own
        assert!(engine.get_alerts(false).is_empty());
    }

    #[test]
    fn test_counter_resets_after_alert() {
        let engine = engine();
        for _ in 0..6 {
            engine.track_auth_failure("10.0.0.5", None);
        }
        assert_eq!(engine.get_alerts(false).len(), 1);

        // Window was reset — the next failure starts a fresh count
        engine.track_auth_failure("10.0.0.5", None);
        assert_eq!(engine.get_alerts(false).len(), 1);
    }

    #[test]
    fn test_rate_limit_tracker() {
        let engine = engine();
        for _ in 0..11 {
            engine.track_rate_limit_violation("10.1.1.1", "/api/verify");
        }
        let alerts = engine.get_alerts(false);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::RateLimitExceeded);
        assert_eq!(alerts[0].severity, AuditSeverity::Warning);
        assert_eq!(
            alerts[0].details["endpoint"],
            crate::event::DetailValue::Str("/api/verify".to_string())
        );
    }

    #[test]
    fn test_verification_tracker() {
        let engine = engine();
        for _ in 0..4 {
            engine.track_verification_failure("doc-9", Some("10.2.2.2"));
        }
        let alerts = engine.get_alerts(false);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::SuspiciousVerification);
        assert_eq!(alerts[0].severity, AuditSeverity::Critical);
        assert_eq!(alerts[0].ip_address.as_deref(), Some("10.2.2.2"));
    }

    #[test]
    fn test_evaluation_alerts_on_memory_breach() {
        let engine = engine();
        let metrics = MetricsRegistry::new();
        metrics.set_gauge("process_memory_percent", 95.0, &[]);

        engine.evaluate_thresholds(&metrics);
        let alerts = engine.get_alerts(false);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::HighMemoryUsage);
        assert_eq!(alerts[0].severity, AuditSeverity::Critical);
    }

    #[test]
    fn test_evaluation_quiet_below_thresholds() {
        let engine = engine();
        let metrics = MetricsRegistry::new();
        metrics.set_gauge("process_memory_percent", 50.0, &[]);
        metrics.set_gauge("process_threads", 12.0, &[]);

        engine.evaluate_thresholds(&metrics);
        assert!(engine.get_alerts(false).is_empty());
    }

    #[test]
    fn test_evaluation_emits_new_alert_each_breached_pass() {
        // No dedup: a sustained breach produces one alert per pass
        let engine = engine();
        let metrics = MetricsRegistry::new();
        metrics.set_gauge("process_memory_percent", 95.0, &[]);

        engine.evaluate_thresholds(&metrics);
        engine.evaluate_thresholds(&metrics);
        assert_eq!(engine.get_alerts(false).len(), 2);
    }

    #[test]
    fn test_evaluation_error_rate() {
        let engine = engine();
        let metrics = MetricsRegistry::new();
        for _ in 0..8 {
            metrics.track_request("GET", "/a", 200, Duration::from_millis(1));
        }
        for _ in 0..2 {
            metrics.track_request("GET", "/a", 500, Duration::from_millis(1));
        }

        // 20% errors > 10% threshold
        engine.evaluate_thresholds(&metrics);
        let alerts = engine.get_alerts(false);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::HighErrorRate);
    }

    #[test]
    fn test_unresolved_at_or_above() {
        let engine = engine();
        engine.create_alert(
            AlertType::HighErrorRate,
            AuditSeverity::Warning,
            "w",
            Details::new(),
        );
        let critical = engine.create_alert(
            AlertType::BruteForceAttempt,
            AuditSeverity::Critical,
            "c",
            Details::new(),
        );

        assert_eq!(engine.unresolved_at_or_above(AuditSeverity::Critical), 1);
        assert_eq!(engine.unresolved_at_or_above(AuditSeverity::Warning), 2);

        engine.resolve_alert(&critical.id, "ops").unwrap();
        assert_eq!(engine.unresolved_at_or_above(AuditSeverity::Critical), 0);
    }

    #[tokio::test]
    async fn test_evaluation_task_runs_and_stops() {
        let engine = Arc::new(
            AlertEngine::new(AlertConfig {
                check_interval: Duration::from_millis(10),
                ..Default::default()
            })
            .unwrap(),
        );
        let metrics = Arc::new(MetricsRegistry::new());
        metrics.set_gauge("process_memory_percent", 95.0, &[]);

        engine.start_evaluation(Arc::clone(&metrics));
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.close().await;

        assert!(!engine.get_alerts(false).is_empty());
    }
}
