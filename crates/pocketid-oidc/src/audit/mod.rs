//! Audit events emitted by the authorization flows.
//!
//! Services report events through the [`AuditSink`] seam. The default sink,
//! [`TracingAuditSink`], writes each event as a structured `tracing` record
//! on the `audit` target so it can be routed to its own log stream.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    /// A user authorized a client for the first time.
    NewClientAuthorization,
    /// A user re-authorized a client.
    ClientAuthorization,
    /// A user approved a device code for a client for the first time.
    NewDeviceCodeAuthorization,
    /// A user approved a device code for a known client.
    DeviceCodeAuthorization,
}

impl AuditEvent {
    /// Picks the first-time or repeat variant of a client authorization.
    #[must_use]
    pub fn client_authorization(first_time: bool) -> Self {
        if first_time {
            Self::NewClientAuthorization
        } else {
            Self::ClientAuthorization
        }
    }

    /// Picks the first-time or repeat variant of a device authorization.
    #[must_use]
    pub fn device_code_authorization(first_time: bool) -> Self {
        if first_time {
            Self::NewDeviceCodeAuthorization
        } else {
            Self::DeviceCodeAuthorization
        }
    }

    /// Stable event name, as persisted in audit logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewClientAuthorization => "NEW_CLIENT_AUTHORIZATION",
            Self::ClientAuthorization => "CLIENT_AUTHORIZATION",
            Self::NewDeviceCodeAuthorization => "NEW_DEVICE_CODE_AUTHORIZATION",
            Self::DeviceCodeAuthorization => "DEVICE_CODE_AUTHORIZATION",
        }
    }
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form event metadata (`clientName`, ...).
pub type AuditMetadata = BTreeMap<String, String>;

/// Receives audit events.
///
/// Recording is best effort: a sink must not fail the flow that reports it.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records `event` performed by `user_id`.
    async fn record(&self, event: AuditEvent, user_id: &str, metadata: AuditMetadata);
}

/// Writes audit events to `tracing` on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent, user_id: &str, metadata: AuditMetadata) {
        let metadata = serde_json::to_string(&metadata).unwrap_or_default();
        tracing::info!(target: "audit", event = %event, user_id = %user_id, metadata = %metadata);
    }
}

/// A recorded audit entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Event kind.
    pub event: AuditEvent,
    /// Acting user.
    pub user_id: String,
    /// Event metadata.
    pub metadata: AuditMetadata,
}

/// Keeps events in memory; useful for tests and embedders that forward
/// events themselves.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Events recorded so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent, user_id: &str, metadata: AuditMetadata) {
        if let Ok(mut records) = self.records.lock() {
            records.push(AuditRecord {
                event,
                user_id: user_id.to_string(),
                metadata,
            });
        }
    }
}

/// Metadata carrying the client's display name.
#[must_use]
pub fn client_metadata(client_name: &str) -> AuditMetadata {
    AuditMetadata::from([("clientName".to_string(), client_name.to_string())])
}
