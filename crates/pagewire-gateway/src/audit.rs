//! Structured audit trail: one record per gateway operation.

use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// What kind of activity a record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    /// A page socket was admitted.
    Connect,
    /// A page socket closed.
    Disconnect,
    /// A caller-issued request finished.
    Request,
    /// The page published an event.
    Event,
    /// Something went wrong outside a request.
    Error,
}

/// Outcome of the audited activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// The activity succeeded.
    Ok,
    /// The activity failed.
    Error,
}

/// One audit record.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Correlates the records of one caller operation (e.g. its retries).
    pub trace_id: String,
    /// Kind of activity.
    pub operation: AuditOperation,
    /// Outcome.
    pub status: AuditStatus,
    /// Session involved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Invoked method, for `invokeMethod` requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
    /// Wall time of the operation, when timed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Free-form context such as error codes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AuditRecord {
    /// Record stamped now with a fresh trace id.
    pub fn new(operation: AuditOperation, status: AuditStatus) -> Self {
        Self {
            trace_id: uuid::Uuid::now_v7().to_string(),
            operation,
            status,
            session_id: None,
            method: None,
            timestamp: Utc::now(),
            duration_ms: None,
            details: None,
        }
    }

    /// Use an existing trace id.
    #[must_use]
    pub fn trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Set the session.
    #[must_use]
    pub fn session(mut self, session_id: Option<&str>) -> Self {
        self.session_id = session_id.map(str::to_owned);
        self
    }

    /// Set the method.
    #[must_use]
    pub fn method(mut self, method: Option<&str>) -> Self {
        self.method = method.map(str::to_owned);
        self
    }

    /// Set the elapsed time.
    #[must_use]
    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Attach extra context.
    #[must_use]
    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Receives audit records. Implementations must not block for long.
pub trait AuditSink: Send + Sync {
    /// Handle one record.
    fn record(&self, record: &AuditRecord);
}

impl<F> AuditSink for F
where
    F: Fn(&AuditRecord) + Send + Sync,
{
    fn record(&self, record: &AuditRecord) {
        self(record);
    }
}

/// Default sink: one JSON line per record on stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutAuditSink;

impl AuditSink for StdoutAuditSink {
    fn record(&self, record: &AuditRecord) {
        let Ok(line) = serde_json::to_string(record) else {
            return;
        };
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn record_serializes_camel_case() {
        let rec = AuditRecord::new(AuditOperation::Request, AuditStatus::Error)
            .trace("t-1")
            .session(Some("tab"))
            .method(Some("cart.addItem"))
            .duration(Duration::from_millis(42))
            .details(json!({"reason": "retry", "attempt": 1}));
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["traceId"], "t-1");
        assert_eq!(v["operation"], "request");
        assert_eq!(v["status"], "error");
        assert_eq!(v["sessionId"], "tab");
        assert_eq!(v["durationMs"], 42);
        assert_eq!(v["details"]["reason"], "retry");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn absent_fields_skipped() {
        let rec = AuditRecord::new(AuditOperation::Connect, AuditStatus::Ok);
        let v = serde_json::to_value(&rec).unwrap();
        assert!(v.get("method").is_none());
        assert!(v.get("durationMs").is_none());
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let sink: Arc<dyn AuditSink> = Arc::new(move |r: &AuditRecord| {
            seen2.lock().push(r.operation);
        });
        sink.record(&AuditRecord::new(AuditOperation::Event, AuditStatus::Ok));
        assert_eq!(*seen.lock(), vec![AuditOperation::Event]);
    }
}
