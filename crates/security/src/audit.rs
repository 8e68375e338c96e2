//! Audit logging: structured security event logging.
//!
//! Records security-relevant request outcomes. Events are kept in a bounded
//! in-process buffer and forwarded to every configured [`AuditSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Events retained in memory; older ones are dropped first.
pub const MAX_RETAINED_EVENTS: usize = 1024;

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub tenant_id: String,
    pub actor_key_id: String,
    pub action: String,
    pub resource: String,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(
        request_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        result: AuditResult,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            tenant_id: String::new(),
            actor_key_id: String::new(),
            action: action.into(),
            resource: resource.into(),
            result,
            reason: None,
            attributes: Map::new(),
        }
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn actor(mut self, key_id: impl Into<String>) -> Self {
        self.actor_key_id = key_id.into();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Allowed,
    Denied,
    Error,
    Success,
    Failure,
}

/// Where audit events are written.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Keeps recent events in memory and forwards every event to its sinks.
pub struct AuditLogger {
    events: Mutex<VecDeque<AuditEvent>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("event_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create an audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            sinks,
        }
    }

    /// Record an event.
    pub fn log(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.record(&event);
        }

        let mut events = self.lock();
        if events.len() == MAX_RETAINED_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn events_by_result(&self, result: AuditResult) -> Vec<AuditEvent> {
        self.lock()
            .iter()
            .filter(|e| e.result == result)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Logs events through `tracing`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: &AuditEvent) {
        tracing::info!(
            request_id = %event.request_id,
            tenant_id = %event.tenant_id,
            actor = %event.actor_key_id,
            action = %event.action,
            resource = %event.resource,
            result = ?event.result,
            reason = ?event.reason,
            "AUDIT"
        );
    }
}

/// Appends events as JSON lines to a local file (mode 0600 on Unix).
///
/// Writes are synchronous; async callers log from the blocking pool.
#[derive(Debug)]
pub struct JsonlFileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, event: &AuditEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(&self.path)?.write_all(&line)
    }
}

impl AuditSink for JsonlFileSink {
    fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(path = %self.path.display(), error = %e, "Audit write failed");
        }
    }
}
