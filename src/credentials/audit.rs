//! Audit trail for credential lifecycle events and observed requests.
//!
//! Records carry the service, operation, outcome and timestamp. Secret
//! material never reaches a sink: request records are built from the
//! sanitized representation only.

use std::sync::Mutex;
use std::time::SystemTime;

use crate::security::sanitizer::RequestRepr;

/// Credential operation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOperation {
    Store,
    Retrieve,
    Clear,
    Rotate,
    Rollback,
    Wipe,
    MemoryPressure,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Retrieve => "retrieve",
            Self::Clear => "clear",
            Self::Rotate => "rotate",
            Self::Rollback => "rollback",
            Self::Wipe => "wipe",
            Self::MemoryPressure => "memory_pressure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    /// Failure, carrying the error kind (never the message, which may echo input).
    Failure(&'static str),
}

/// One credential lifecycle event.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub service_id: String,
    pub operation: AuditOperation,
    pub outcome: AuditOutcome,
    pub timestamp: SystemTime,
}

impl AuditRecord {
    pub fn new(service_id: &str, operation: AuditOperation, outcome: AuditOutcome) -> Self {
        Self {
            service_id: service_id.to_string(),
            operation,
            outcome,
            timestamp: SystemTime::now(),
        }
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn credential_event(&self, record: AuditRecord);

    /// Receives the sanitized form of every outbound request.
    fn request_event(&self, request: &RequestRepr);
}

/// Writes audit records as structured `tracing` events under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn credential_event(&self, record: AuditRecord) {
        let timestamp = record
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        match record.outcome {
            AuditOutcome::Success => tracing::info!(
                target: "audit",
                service_id = %record.service_id,
                operation = record.operation.as_str(),
                timestamp,
                "Credential operation succeeded"
            ),
            AuditOutcome::Failure(kind) => tracing::warn!(
                target: "audit",
                service_id = %record.service_id,
                operation = record.operation.as_str(),
                error_kind = kind,
                timestamp,
                "Credential operation failed"
            ),
        }
    }

    fn request_event(&self, request: &RequestRepr) {
        tracing::debug!(
            target: "audit",
            method = %request.method,
            url = %request.url,
            headers = ?request.headers,
            body = request.body.as_deref().unwrap_or(""),
            "Outbound request"
        );
    }
}

/// Keeps every record in memory. Useful for hosts that ship audit logs in
/// batches, and for asserting on audit output.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    credential_events: Mutex<Vec<AuditRecord>>,
    request_events: Mutex<Vec<RequestRepr>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credential_events(&self) -> Vec<AuditRecord> {
        self.credential_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn request_events(&self) -> Vec<RequestRepr> {
        self.request_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn credential_event(&self, record: AuditRecord) {
        if let Ok(mut events) = self.credential_events.lock() {
            events.push(record);
        }
    }

    fn request_event(&self, request: &RequestRepr) {
        if let Ok(mut events) = self.request_events.lock() {
            events.push(request.clone());
        }
    }
}
