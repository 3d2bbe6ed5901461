//! Asynchronous, durable audit logging
//!
//! Producers call the fire-and-forget `log_*` methods from anywhere; a
//! bounded queue feeds one background writer that serializes each event as a
//! JSON line into the rotating daily file. A second background task flushes
//! the buffered writer on an interval.
//!
//! Backpressure: when the queue is full the caller writes the event
//! synchronously in the same call instead of dropping it — latency is traded
//! for durability, and ordering against queued events becomes best-effort
//! (mixing the two paths can reorder one producer's events).
//!
//! Nothing in this pipeline propagates a runtime failure to the caller: a
//! record that won't serialize or write is dropped with a `tracing`
//! diagnostic and a counter bump.

use crate::error::Result;
use crate::event::{
    AuditEvent, AuditEventType, AuditSeverity, Details, EventContext, EventOutcome,
};
use crate::rotation::{ActiveLogFile, RetentionPolicy, RotationManager};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Configuration for the audit pipeline
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Directory holding the dated log files (created at startup, fatal on failure)
    pub log_dir: PathBuf,

    /// File name prefix (`<prefix>-YYYY-MM-DD.log`)
    pub file_prefix: String,

    /// Bounded queue capacity between producers and the writer
    pub queue_capacity: usize,

    /// How often buffered records are flushed to the OS
    pub flush_interval: Duration,

    /// Rotation and retention policy
    pub retention: RetentionPolicy,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            file_prefix: "audit".to_string(),
            queue_capacity: 1024,
            flush_interval: Duration::from_secs(5),
            retention: RetentionPolicy::default(),
        }
    }
}

impl AuditConfig {
    /// Validate configuration, failing fast on nonsense
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(crate::error::VigilError::Config(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(crate::error::VigilError::Config(
                "flush_interval must be greater than zero".to_string(),
            ));
        }
        if self.file_prefix.is_empty() {
            return Err(crate::error::VigilError::Config(
                "file_prefix must not be empty".to_string(),
            ));
        }
        self.retention.validate()
    }
}

/// Point-in-time view of the pipeline for the ops surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub queued: usize,
    pub queue_capacity: usize,
    pub events_written: u64,
    pub events_dropped: u64,
    pub fallback_writes: u64,
    pub current_file: Option<PathBuf>,
    pub current_file_size: u64,
    pub log_dir: PathBuf,
    pub max_file_size: u64,
    pub max_files: usize,
    pub max_age_days: u32,
    pub compress_old: bool,
}

/// Writer-side state: the rotation manager plus the active file handle.
///
/// Normally touched only by the writer task; the flush timer and the
/// queue-full fallback path take the same mutex, which is why the handle
/// sits behind one lock instead of being task-local.
struct WriterState {
    rotation: RotationManager,
    active: Option<ActiveLogFile>,
}

struct Shared {
    state: Mutex<WriterState>,
    written: AtomicU64,
    dropped: AtomicU64,
    fallback_writes: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    /// Serialize and append one event, rotating first when due
    fn write_event(&self, event: AuditEvent) {
        let bytes = match serde_json::to_vec(&event) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "Audit event serialization failed, record dropped");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let today = chrono::Utc::now().date_naive();
        if let Some(reason) = state.rotation.should_rotate(state.active.as_ref(), today) {
            let current = state.active.take();
            match state.rotation.rotate(current, today) {
                Ok(file) => {
                    tracing::info!(path = %file.path().display(), reason = %reason, "Audit log rotated");
                    state.active = Some(file);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Audit log rotation failed, record dropped");
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        // should_rotate(None) always demands a rotation, so active is set here
        if let Some(file) = state.active.as_mut() {
            match file.write_record(&bytes) {
                Ok(()) => {
                    self.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::error!(path = %file.path().display(), error = %e, "Audit write failed, record dropped");
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Flush buffered records to the OS
    fn flush(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = state.active.as_mut() {
            if let Err(e) = file.flush() {
                tracing::warn!(path = %file.path().display(), error = %e, "Audit flush failed");
            }
        }
    }
}

/// The audit pipeline: bounded queue, one writer task, one flush timer
///
/// Construct once per process and share via `Arc`. All `log_*` methods are
/// fire-and-forget and never fail the caller.
pub struct AuditLogger {
    tx: mpsc::Sender<AuditEvent>,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Validate the config, create the log directory, start the background
    /// writer and flush tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: AuditConfig) -> Result<Self> {
        config.validate()?;
        let rotation =
            RotationManager::new(&config.log_dir, &config.file_prefix, config.retention.clone())?;

        let shared = Arc::new(Shared {
            state: Mutex::new(WriterState {
                rotation,
                active: None,
            }),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            fallback_writes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        let writer = Self::spawn_writer(Arc::clone(&shared), rx, shutdown_tx.subscribe());
        let flusher = Self::spawn_flusher(
            Arc::clone(&shared),
            config.flush_interval,
            shutdown_tx.subscribe(),
        );

        Ok(Self {
            tx,
            shared,
            shutdown_tx,
            tasks: Mutex::new(vec![writer, flusher]),
        })
    }

    fn spawn_writer(
        shared: Arc<Shared>,
        mut rx: mpsc::Receiver<AuditEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(event) => shared.write_event(event),
                        None => break,
                    },
                    _ = shutdown_rx.changed() => {
                        // Drain everything still queued, then flush — no loss
                        // on clean shutdown
                        while let Ok(event) = rx.try_recv() {
                            shared.write_event(event);
                        }
                        shared.flush();
                        break;
                    }
                }
            }
        })
    }

    fn spawn_flusher(
        shared: Arc<Shared>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => shared.flush(),
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }

    /// Enqueue an event, falling back to a synchronous write when the queue
    /// is full. Fire-and-forget: never returns an error.
    pub fn log(&self, event: AuditEvent) {
        if self.shared.closed.load(Ordering::Acquire) {
            tracing::warn!(event_id = %event.id, "Audit logger closed, event dropped");
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.shared.fallback_writes.fetch_add(1, Ordering::Relaxed);
                self.shared.write_event(event);
                self.shared.flush();
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::warn!(event_id = %event.id, "Audit queue closed, event dropped");
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// General-purpose entry point used by the canonical helpers
    #[allow(clippy::too_many_arguments)]
    pub fn log_event(
        &self,
        ctx: &EventContext,
        event_type: AuditEventType,
        severity: AuditSeverity,
        resource: &str,
        action: &str,
        outcome: EventOutcome,
        message: &str,
        details: Details,
    ) {
        let event = AuditEvent::new(event_type, severity, resource, action, outcome, message)
            .with_context(ctx)
            .with_details(details);
        self.log(event);
    }

    /// Auth event; failures are recorded at Warning severity
    pub fn log_auth_event(&self, ctx: &EventContext, action: &str, success: bool, details: Details) {
        let (severity, outcome) = if success {
            (AuditSeverity::Info, EventOutcome::Success)
        } else {
            (AuditSeverity::Warning, EventOutcome::Failure)
        };
        let message = if success {
            format!("Auth {} succeeded", action)
        } else {
            format!("Auth {} failed", action)
        };
        self.log_event(
            ctx,
            AuditEventType::Auth,
            severity,
            "session",
            action,
            outcome,
            &message,
            details,
        );
    }

    /// Document lifecycle event (upload, download, sign, delete)
    pub fn log_document_event(
        &self,
        ctx: &EventContext,
        action: &str,
        document_id: &str,
        outcome: EventOutcome,
        details: Details,
    ) {
        let event = AuditEvent::new(
            AuditEventType::Document,
            AuditSeverity::Info,
            "document",
            action,
            outcome,
            format!("Document {} {}", document_id, action),
        )
        .with_context(ctx)
        .with_resource_id(document_id)
        .with_details(details);
        self.log(event);
    }

    /// Verification check; an invalid result is recorded at Warning severity
    pub fn log_verification_event(
        &self,
        ctx: &EventContext,
        document_id: &str,
        valid: bool,
        details: Details,
    ) {
        let (severity, outcome, message) = if valid {
            (
                AuditSeverity::Info,
                EventOutcome::Success,
                format!("Document {} verified", document_id),
            )
        } else {
            (
                AuditSeverity::Warning,
                EventOutcome::Failure,
                format!("Document {} failed verification", document_id),
            )
        };
        let event = AuditEvent::new(
            AuditEventType::Verification,
            severity,
            "document",
            "verify",
            outcome,
            message,
        )
        .with_context(ctx)
        .with_resource_id(document_id)
        .with_details(details);
        self.log(event);
    }

    /// Security event (detected or suspected abuse); outcome is Denied
    pub fn log_security_event(
        &self,
        ctx: &EventContext,
        severity: AuditSeverity,
        action: &str,
        message: &str,
        details: Details,
    ) {
        self.log_event(
            ctx,
            AuditEventType::Security,
            severity,
            "security",
            action,
            EventOutcome::Denied,
            message,
            details,
        );
    }

    /// System lifecycle event (no correlation context)
    pub fn log_system_event(&self, action: &str, outcome: EventOutcome, message: &str) {
        self.log_event(
            &EventContext::default(),
            AuditEventType::System,
            AuditSeverity::Info,
            "process",
            action,
            outcome,
            message,
            Details::new(),
        );
    }

    /// Buffer occupancy, counters, current file, and policy values
    pub fn stats(&self) -> AuditStats {
        let (current_file, current_file_size, log_dir, policy) = {
            let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            (
                state.active.as_ref().map(|f| f.path().to_path_buf()),
                state.active.as_ref().map(|f| f.size()).unwrap_or(0),
                state.rotation.dir().to_path_buf(),
                state.rotation.policy().clone(),
            )
        };

        AuditStats {
            queued: self.tx.max_capacity() - self.tx.capacity(),
            queue_capacity: self.tx.max_capacity(),
            events_written: self.shared.written.load(Ordering::Relaxed),
            events_dropped: self.shared.dropped.load(Ordering::Relaxed),
            fallback_writes: self.shared.fallback_writes.load(Ordering::Relaxed),
            current_file,
            current_file_size,
            log_dir,
            max_file_size: policy.max_file_size,
            max_files: policy.max_files,
            max_age_days: policy.max_age_days,
            compress_old: policy.compress_old,
        }
    }

    /// Two-phase shutdown: stop the timers, then drain and flush everything
    /// still queued. Guarantees no loss on clean shutdown (not on process
    /// kill). Idempotent; events logged after this call are dropped.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let handles = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *tasks)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Audit background task ended abnormally");
            }
        }
        tracing::debug!("Audit logger closed");
    }
}
