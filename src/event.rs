//! Audit event model
//!
//! All types use camelCase JSON serialization so on-disk records stay
//! grep/jq-friendly and stable across consumers. Events are immutable once
//! built — construction happens through `AuditEvent::new` and the `with_*`
//! builders, after which the record is only ever serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Maximum number of entries an event's detail map may carry.
///
/// Entries past the cap are dropped with a diagnostic rather than letting a
/// misbehaving producer grow records without bound.
pub const MAX_DETAIL_ENTRIES: usize = 32;

/// Severity of an audit event or alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Warning => "warning",
            AuditSeverity::Error => "error",
            AuditSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Category of an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Login, logout, token refresh, failed credentials
    Auth,
    /// Document upload, download, signing, deletion
    Document,
    /// Signature/hash verification checks
    Verification,
    /// Detected or suspected abuse
    Security,
    /// Process lifecycle and operational events
    System,
}

/// Outcome of the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Success,
    Failure,
    Denied,
}

/// Structured detail value
///
/// Replaces untyped `map[string]interface{}`-style payloads with a closed
/// union that serializes deterministically: strings, integers, floats, bools,
/// and nested maps (`BTreeMap` keeps key order stable). Durations are recorded
/// as fractional milliseconds via [`DetailValue::duration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetailValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(BTreeMap<String, DetailValue>),
}

impl DetailValue {
    /// Record a duration as fractional milliseconds
    pub fn duration(d: Duration) -> Self {
        DetailValue::Float(d.as_secs_f64() * 1000.0)
    }
}

impl From<&str> for DetailValue {
    fn from(v: &str) -> Self {
        DetailValue::Str(v.to_string())
    }
}

impl From<String> for DetailValue {
    fn from(v: String) -> Self {
        DetailValue::Str(v)
    }
}

impl From<i64> for DetailValue {
    fn from(v: i64) -> Self {
        DetailValue::Int(v)
    }
}

impl From<u64> for DetailValue {
    fn from(v: u64) -> Self {
        DetailValue::Int(v as i64)
    }
}

impl From<f64> for DetailValue {
    fn from(v: f64) -> Self {
        DetailValue::Float(v)
    }
}

impl From<bool> for DetailValue {
    fn from(v: bool) -> Self {
        DetailValue::Bool(v)
    }
}

/// Bounded detail map type used on events and alerts
pub type Details = BTreeMap<String, DetailValue>;

/// Optional correlation fields carried by producers
///
/// Populated by the calling layer (HTTP middleware, session handling) and
/// passed by reference into the `log_*` helpers. Absent fields are simply
/// omitted from the serialized record — absence is never an error.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl EventContext {
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }
}

/// A single audit record
///
/// One record per security/business-relevant action. Serialized as one JSON
/// object per line in the active log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Unique event identifier (aud-<uuid>)
    pub id: String,

    /// UTC timestamp (RFC 3339)
    pub timestamp: DateTime<Utc>,

    /// Event category
    pub event_type: AuditEventType,

    /// Severity
    pub severity: AuditSeverity,

    /// Correlation: acting user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Correlation: session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Correlation: request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Correlation: client IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    /// Correlation: user agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Resource kind the action touched (e.g. "document", "session")
    pub resource: String,

    /// Specific resource identifier, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// Action performed (e.g. "login", "upload", "verify")
    pub action: String,

    /// Outcome of the action
    pub outcome: EventOutcome,

    /// Human-readable summary
    pub message: String,

    /// Structured detail payload (bounded, see [`MAX_DETAIL_ENTRIES`])
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: Details,

    /// Duration of the action in milliseconds, when measured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error description on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new event with auto-generated id and timestamp
    pub fn new(
        event_type: AuditEventType,
        severity: AuditSeverity,
        resource: impl Into<String>,
        action: impl Into<String>,
        outcome: EventOutcome,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("aud-{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            event_type,
            severity,
            user_id: None,
            session_id: None,
            request_id: None,
            client_ip: None,
            user_agent: None,
            resource: resource.into(),
            resource_id: None,
            action: action.into(),
            outcome,
            message: message.into(),
            details: BTreeMap::new(),
            duration_ms: None,
            error: None,
        }
    }

    /// Attach correlation fields from a producer context
    pub fn with_context(mut self, ctx: &EventContext) -> Self {
        self.user_id = ctx.user_id.clone();
        self.session_id = ctx.session_id.clone();
        self.request_id = ctx.request_id.clone();
        self.client_ip = ctx.client_ip.clone();
        self.user_agent = ctx.user_agent.clone();
        self
    }

    /// Set the resource identifier
    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    /// Add a detail entry, dropping it if the map is at capacity
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<DetailValue>) -> Self {
        let key = key.into();
        if self.details.len() >= MAX_DETAIL_ENTRIES && !self.details.contains_key(&key) {
            tracing::debug!(key = %key, "Detail map at capacity, entry dropped");
            return self;
        }
        self.details.insert(key, value.into());
        self
    }

    /// Merge a prepared detail map, respecting the entry cap
    pub fn with_details(mut self, details: Details) -> Self {
        for (key, value) in details {
            if self.details.len() >= MAX_DETAIL_ENTRIES && !self.details.contains_key(&key) {
                tracing::debug!(key = %key, "Detail map at capacity, entry dropped");
                continue;
            }
            self.details.insert(key, value);
        }
        self
    }

    /// Record how long the action took
    pub fn with_duration(mut self, d: Duration) -> Self {
        self.duration_ms = Some(d.as_millis() as u64);
        self
    }

    /// Record an error description
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
