//! `Gateway`: the server-side broker composing sessions, correlation,
//! policy, and audit into the public operations.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use pagewire_protocol::envelope::payload_object;
use pagewire_protocol::types::{
    InvokeMethodPayload, InvokeMethodResult, ListMethodsPayload, ListMethodsResult, PingPayload,
    PingResult, SubscribeEventPayload, SubscribeEventResult, UnsubscribeEventPayload,
    UnsubscribeEventResult,
};
use pagewire_protocol::{MethodMatcher, RequestType, new_request_id, validate_method_descriptors};
use pagewire_settings::GatewaySettings;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{AuditOperation, AuditRecord, AuditSink, AuditStatus, StdoutAuditSink};
use crate::correlator::Correlator;
use crate::errors::GatewayError;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::server;
use crate::session::{SessionInfo, SessionRegistry};

/// Close code sent to every session on shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;

const PAGE_EVENT_CAPACITY: usize = 256;
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// An event published by a connected page.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEvent {
    /// Session that emitted the event.
    pub session_id: String,
    /// Event topic.
    pub topic: String,
    /// Event payload as sent by the page.
    pub payload: Value,
    /// Page-side timestamp in milliseconds.
    pub timestamp: u64,
}

/// State shared between the public handle, the HTTP server, and each
/// session task.
pub(crate) struct GatewayInner {
    pub(crate) settings: GatewaySettings,
    pub(crate) sessions: SessionRegistry,
    pub(crate) correlator: Correlator,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) events: broadcast::Sender<PageEvent>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) started_at: Instant,
    pub(crate) rate_limiter: RateLimiter,
    retry: RetryPolicy,
    allowlist: MethodMatcher,
    stopped: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayInner {
    /// Send a record to the sink and mirror it to tracing.
    pub(crate) fn audit(&self, record: &AuditRecord) {
        debug!(
            trace_id = %record.trace_id,
            operation = ?record.operation,
            status = ?record.status,
            session_id = ?record.session_id,
            method = ?record.method,
            "audit"
        );
        self.audit.record(record);
    }
}

/// Bookkeeping for one audited caller operation.
struct Call {
    trace_id: String,
    request_type: RequestType,
    method: Option<String>,
    session_id: Option<String>,
    started: Instant,
}

impl Call {
    fn new(request_type: RequestType, method: Option<&str>, session_id: Option<&str>) -> Self {
        Self {
            trace_id: new_request_id(),
            request_type,
            method: method.map(str::to_owned),
            session_id: session_id.map(str::to_owned),
            started: Instant::now(),
        }
    }
}

/// Server-side broker for browser page sessions.
///
/// Cheap to clone; all clones share one set of sessions.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Build a gateway that audits to stdout.
    pub fn new(settings: GatewaySettings) -> Result<Self, GatewayError> {
        Self::with_audit_sink(settings, Arc::new(StdoutAuditSink))
    }

    /// Build a gateway with a custom audit sink.
    pub fn with_audit_sink(
        settings: GatewaySettings,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, GatewayError> {
        let allowlist = MethodMatcher::compile(&settings.method_allowlist)
            .map_err(|e| GatewayError::Config(format!("methodAllowlist: {e}")))?;
        let mutations = MethodMatcher::from_patterns(&settings.mutation_method_patterns)
            .map_err(|e| GatewayError::Config(format!("mutationMethodPatterns: {e}")))?;
        let retry = RetryPolicy::new(
            settings.effective_retry_attempts(),
            settings.retry_mutating_methods,
            mutations,
        );
        let rate_limiter = RateLimiter::new(
            settings.max_invocations_per_minute,
            settings.method_rate_limits.clone(),
        );
        let (events, _) = broadcast::channel(PAGE_EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(GatewayInner {
                settings,
                sessions: SessionRegistry::new(),
                correlator: Correlator::new(),
                audit,
                events,
                shutdown: CancellationToken::new(),
                started_at: Instant::now(),
                rate_limiter,
                retry,
                allowlist,
                stopped: AtomicBool::new(false),
                local_addr: Mutex::new(None),
                server_task: Mutex::new(None),
            }),
        })
    }

    /// Bind the listener and start accepting page connections.
    ///
    /// Calling `start` on a running gateway returns the existing address.
    pub async fn start(&self) -> Result<SocketAddr, GatewayError> {
        self.ensure_running()?;
        if let Some(addr) = *self.inner.local_addr.lock() {
            return Ok(addr);
        }

        let bind = self.inner.settings.bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind).await?;
        let addr = listener.local_addr()?;

        let app = server::router(self.inner.clone());
        let token = self.inner.shutdown.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "gateway listener failed");
            }
        });

        *self.inner.local_addr.lock() = Some(addr);
        *self.inner.server_task.lock() = Some(task);
        info!(%addr, "gateway listening");
        Ok(addr)
    }

    /// Stop the gateway: reject pending requests, close every session,
    /// and wait for the listener to drain. A second call is a no-op.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let rejected = self.inner.correlator.reject_all(|| GatewayError::Stopped);
        let sessions = self.inner.sessions.drain();
        for conn in &sessions {
            conn.close(CLOSE_GOING_AWAY, "Gateway stopping");
        }
        self.inner.shutdown.cancel();

        let task = self.inner.server_task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(SERVER_DRAIN_TIMEOUT, task).await.is_err() {
                warn!("gateway listener did not drain in {SERVER_DRAIN_TIMEOUT:?}");
            }
        }
        info!(rejected, sessions = sessions.len(), "gateway stopped");
    }

    #[cfg(test)]
    pub(crate) fn inner_for_tests(&self) -> Arc<GatewayInner> {
        self.inner.clone()
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Connected session ids, oldest first.
    pub fn session_ids(&self) -> Vec<String> {
        self.inner.sessions.ids()
    }

    /// Snapshot of one session.
    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.inner.sessions.get(session_id).map(|c| c.info())
    }

    /// Requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Receive events published by any connected page.
    pub fn subscribe_page_events(&self) -> broadcast::Receiver<PageEvent> {
        self.inner.events.subscribe()
    }

    // ── Public operations ───────────────────────────────────────────

    /// List the methods a page exposes, optionally under `namespace`.
    pub async fn list_methods(
        &self,
        session_id: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<ListMethodsResult, GatewayError> {
        let mut call = Call::new(RequestType::ListMethods, None, session_id);
        let result = self.list_methods_inner(&mut call, namespace).await;
        self.finish(&call, &result);
        result
    }

    /// Invoke `method` on a page and return the handler's JSON result.
    pub async fn invoke_method(
        &self,
        method: &str,
        args: Option<Value>,
        session_id: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> Result<Value, GatewayError> {
        let mut call = Call::new(RequestType::InvokeMethod, Some(method), session_id);
        let result = self
            .invoke_method_inner(&mut call, method, args, timeout_ms)
            .await;
        self.finish(&call, &result);
        result
    }

    /// Subscribe to page event topics.
    pub async fn subscribe(
        &self,
        topics: Vec<String>,
        session_id: Option<&str>,
    ) -> Result<SubscribeEventResult, GatewayError> {
        let mut call = Call::new(RequestType::SubscribeEvent, None, session_id);
        let result = self
            .simple_request(&mut call, &SubscribeEventPayload { topics })
            .await;
        self.finish(&call, &result);
        result
    }

    /// Drop a subscription created by [`subscribe`](Self::subscribe).
    pub async fn unsubscribe(
        &self,
        subscription_id: &str,
        session_id: Option<&str>,
    ) -> Result<UnsubscribeEventResult, GatewayError> {
        let mut call = Call::new(RequestType::UnsubscribeEvent, None, session_id);
        let payload = UnsubscribeEventPayload {
            subscription_id: subscription_id.to_owned(),
        };
        let result = self.simple_request(&mut call, &payload).await;
        self.finish(&call, &result);
        result
    }

    /// Liveness round-trip to a page.
    pub async fn ping(&self, session_id: Option<&str>) -> Result<PingResult, GatewayError> {
        let mut call = Call::new(RequestType::Ping, None, session_id);
        let result = self.simple_request(&mut call, &PingPayload::default()).await;
        self.finish(&call, &result);
        result
    }

    async fn list_methods_inner(
        &self,
        call: &mut Call,
        namespace: Option<&str>,
    ) -> Result<ListMethodsResult, GatewayError> {
        let payload = payload_object(&ListMethodsPayload {
            namespace: namespace.map(str::to_owned),
            include_schemas: None,
        })?;
        let value = self.dispatch(call, payload, None).await?;
        let methods = value.get("methods").cloned().unwrap_or(Value::Null);
        let methods =
            validate_method_descriptors(&methods).map_err(GatewayError::InvalidDescriptors)?;
        Ok(ListMethodsResult { methods })
    }

    async fn invoke_method_inner(
        &self,
        call: &mut Call,
        method: &str,
        args: Option<Value>,
        timeout_ms: Option<u64>,
    ) -> Result<Value, GatewayError> {
        self.ensure_running()?;
        if !self.inner.allowlist.allows(method) {
            return Err(GatewayError::MethodBlocked {
                method: method.to_owned(),
            });
        }
        let target = self.resolve_session(call.session_id.as_deref())?;
        call.session_id = Some(target.clone());
        self.inner
            .rate_limiter
            .check(&target, method)
            .map_err(|limit| GatewayError::RateLimited {
                session_id: target.clone(),
                method: method.to_owned(),
                limit,
            })?;

        let payload = payload_object(&InvokeMethodPayload {
            method: method.to_owned(),
            args,
            timeout_ms,
        })?;
        let value = self.dispatch(call, payload, timeout_ms).await?;
        let result: InvokeMethodResult = serde_json::from_value(value)?;
        Ok(result.result)
    }

    /// Correlated request whose response payload decodes straight into `R`.
    async fn simple_request<P: Serialize, R: DeserializeOwned>(
        &self,
        call: &mut Call,
        payload: &P,
    ) -> Result<R, GatewayError> {
        let payload = payload_object(payload)?;
        let value = self.dispatch(call, payload, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn ensure_running(&self) -> Result<(), GatewayError> {
        if self.is_stopped() {
            Err(GatewayError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Apply the session selection rule.
    fn resolve_session(&self, requested: Option<&str>) -> Result<String, GatewayError> {
        if let Some(id) = requested {
            return if self.inner.sessions.get(id).is_some() {
                Ok(id.to_owned())
            } else {
                Err(GatewayError::SessionNotConnected {
                    session_id: id.to_owned(),
                })
            };
        }

        let mut ids = self.inner.sessions.ids();
        match ids.len() {
            0 => Err(GatewayError::NoSession),
            1 => Ok(ids.remove(0)),
            _ if self.inner.settings.require_explicit_session_when_multiple => {
                Err(GatewayError::AmbiguousSession { sessions: ids })
            }
            _ => Ok(ids.remove(0)),
        }
    }

    /// Resolve the session (unless already resolved) and run a
    /// correlated request with retries.
    async fn dispatch(
        &self,
        call: &mut Call,
        payload: Map<String, Value>,
        timeout_ms: Option<u64>,
    ) -> Result<Value, GatewayError> {
        self.ensure_running()?;
        let target = self.resolve_session(call.session_id.as_deref())?;
        call.session_id = Some(target.clone());
        let timeout = Duration::from_millis(
            timeout_ms.unwrap_or(self.inner.settings.default_timeout_ms),
        );
        self.request_with_retry(call, &target, payload, timeout).await
    }

    async fn request_with_retry(
        &self,
        call: &Call,
        session_id: &str,
        payload: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let method = call.method.as_deref();
        let max_attempts = self.inner.retry.attempts_for(call.request_type, method);
        let mut attempt = 1;
        loop {
            let result = match self.inner.sessions.get(session_id) {
                Some(conn) => {
                    self.inner
                        .correlator
                        .request(&conn, call.request_type, payload.clone(), timeout, method)
                        .await
                }
                None => Err(GatewayError::SessionNotConnected {
                    session_id: session_id.to_owned(),
                }),
            };

            match result {
                Err(err) if attempt < max_attempts && err.is_retryable() && !self.is_stopped() => {
                    warn!(
                        session_id,
                        ?method,
                        attempt,
                        max_attempts,
                        error = %err,
                        "request failed, retrying"
                    );
                    self.inner.audit(
                        &AuditRecord::new(AuditOperation::Request, AuditStatus::Error)
                            .trace(&call.trace_id)
                            .session(Some(session_id))
                            .method(method)
                            .duration(call.started.elapsed())
                            .details(json!({
                                "reason": "retry",
                                "type": call.request_type,
                                "attempt": attempt,
                                "maxAttempts": max_attempts,
                                "message": err.to_string(),
                            })),
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Emit the single audit record for a finished operation.
    fn finish<T>(&self, call: &Call, result: &Result<T, GatewayError>) {
        let (status, details) = match result {
            Ok(_) => (AuditStatus::Ok, json!({ "type": call.request_type })),
            Err(err) => (
                AuditStatus::Error,
                json!({
                    "type": call.request_type,
                    "code": err.code(),
                    "message": err.to_string(),
                }),
            ),
        };
        self.inner.audit(
            &AuditRecord::new(AuditOperation::Request, status)
                .trace(&call.trace_id)
                .session(call.session_id.as_deref())
                .method(call.method.as_deref())
                .duration(call.started.elapsed())
                .details(details),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Outbound, SessionConnection};
    use pagewire_protocol::{Envelope, ResponseEnvelope, parse_envelope};
    use tokio::sync::mpsc;

    fn collecting_gateway(
        settings: GatewaySettings,
    ) -> (Gateway, Arc<Mutex<Vec<AuditRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = records.clone();
        let gw = Gateway::with_audit_sink(
            settings,
            Arc::new(move |r: &AuditRecord| sink.lock().push(r.clone())),
        )
        .unwrap();
        (gw, records)
    }

    fn attach(gw: &Gateway, id: &str) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(SessionConnection::new(id.into(), None, None, tx));
        let _ = gw.inner.sessions.insert(conn);
        rx
    }

    /// Answer every request on `rx` with `respond`.
    fn fake_page(
        gw: &Gateway,
        id: &'static str,
        mut rx: mpsc::Receiver<Outbound>,
        respond: impl Fn(&pagewire_protocol::RequestEnvelope) -> Option<ResponseEnvelope>
        + Send
        + 'static,
    ) {
        let inner = gw.inner.clone();
        let _ = tokio::spawn(async move {
            while let Some(Outbound::Text(text)) = rx.recv().await {
                if let Ok(Envelope::Request(req)) = parse_envelope(&text) {
                    if let Some(resp) = respond(&req) {
                        let _ = inner.correlator.resolve(resp, id);
                    }
                }
            }
        });
    }

    #[test]
    fn bad_pattern_is_config_error() {
        let settings = GatewaySettings {
            mutation_method_patterns: vec!["(".into()],
            ..GatewaySettings::default()
        };
        assert!(matches!(
            Gateway::new(settings),
            Err(GatewayError::Config(_))
        ));
    }

    #[tokio::test]
    async fn no_session_fails_fast() {
        let (gw, records) = collecting_gateway(GatewaySettings::default());
        let err = gw.list_methods(None, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoSession));
        let recs = records.lock();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].status, AuditStatus::Error);
    }

    #[tokio::test]
    async fn ambiguous_session_unless_relaxed() {
        let (gw, _) = collecting_gateway(GatewaySettings::default());
        let _a = attach(&gw, "tab-a");
        let _b = attach(&gw, "tab-b");
        let err = gw.resolve_session(None).unwrap_err();
        assert!(err.to_string().contains("specify one of: tab-a, tab-b"));
        assert_eq!(gw.resolve_session(Some("tab-b")).unwrap(), "tab-b");
        assert!(matches!(
            gw.resolve_session(Some("tab-z")),
            Err(GatewayError::SessionNotConnected { .. })
        ));

        let (relaxed, _) = collecting_gateway(GatewaySettings {
            require_explicit_session_when_multiple: false,
            ..GatewaySettings::default()
        });
        let _a = attach(&relaxed, "tab-a");
        let _b = attach(&relaxed, "tab-b");
        assert_eq!(relaxed.resolve_session(None).unwrap(), "tab-a");
    }

    #[tokio::test]
    async fn allowlist_blocks_before_anything_else() {
        let (gw, records) = collecting_gateway(GatewaySettings {
            method_allowlist: vec!["user.getById".into()],
            ..GatewaySettings::default()
        });
        let err = gw.invoke_method("cart.addItem", None, None, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::MethodBlocked { .. }));
        assert_eq!(records.lock()[0].method.as_deref(), Some("cart.addItem"));
    }

    #[tokio::test]
    async fn invoke_returns_handler_result() {
        let (gw, records) = collecting_gateway(GatewaySettings::default());
        let rx = attach(&gw, "tab");
        fake_page(&gw, "tab", rx, |req| {
            Some(ResponseEnvelope::success(
                req,
                "tab",
                json!({"method": "user.getById", "result": {"id": "u-1", "name": "demo"}}),
            ))
        });
        let value = gw
            .invoke_method("user.getById", Some(json!(["u-1"])), None, None)
            .await
            .unwrap();
        assert_eq!(value, json!({"id": "u-1", "name": "demo"}));
        let recs = records.lock();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].session_id.as_deref(), Some("tab"));
        assert_eq!(recs[0].status, AuditStatus::Ok);
    }

    #[tokio::test]
    async fn mutating_method_gets_one_attempt() {
        let (gw, records) = collecting_gateway(GatewaySettings {
            retry_attempts: 3,
            ..GatewaySettings::default()
        });
        let rx = attach(&gw, "tab");
        let seen = Arc::new(Mutex::new(0_u32));
        let seen2 = seen.clone();
        fake_page(&gw, "tab", rx, move |req| {
            *seen2.lock() += 1;
            Some(ResponseEnvelope::failure(
                req,
                "tab",
                pagewire_protocol::ProtocolError::new("METHOD_EXECUTION_FAILED", "declined"),
            ))
        });
        let err = gw.invoke_method("cart.addItem", None, None, None).await.unwrap_err();
        assert_eq!(err.code(), "METHOD_EXECUTION_FAILED");
        assert_eq!(*seen.lock(), 1);
        assert_eq!(records.lock().len(), 1);
    }

    #[tokio::test]
    async fn non_mutating_retries_then_propagates_last_error() {
        let (gw, records) = collecting_gateway(GatewaySettings {
            retry_attempts: 3,
            ..GatewaySettings::default()
        });
        let rx = attach(&gw, "tab");
        let seen = Arc::new(Mutex::new(0_u32));
        let seen2 = seen.clone();
        fake_page(&gw, "tab", rx, move |req| {
            let mut n = seen2.lock();
            *n += 1;
            Some(ResponseEnvelope::failure(
                req,
                "tab",
                pagewire_protocol::ProtocolError::new("FLAKY", format!("attempt {n}")),
            ))
        });
        let err = gw.invoke_method("user.getById", None, None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "[FLAKY] attempt 3");
        assert_eq!(*seen.lock(), 3);

        let recs = records.lock();
        let retries: Vec<_> = recs
            .iter()
            .filter(|r| r.details.as_ref().is_some_and(|d| d["reason"] == "retry"))
            .collect();
        assert_eq!(retries.len(), 2);
        assert!(retries.iter().all(|r| r.trace_id == recs[2].trace_id));
    }

    #[tokio::test]
    async fn non_retryable_remote_error_stops_early() {
        let (gw, _) = collecting_gateway(GatewaySettings::default());
        let rx = attach(&gw, "tab");
        let seen = Arc::new(Mutex::new(0_u32));
        let seen2 = seen.clone();
        fake_page(&gw, "tab", rx, move |req| {
            *seen2.lock() += 1;
            Some(ResponseEnvelope::failure(
                req,
                "tab",
                pagewire_protocol::ProtocolError::new("NOPE", "x").with_retryable(false),
            ))
        });
        assert!(gw.invoke_method("user.getById", None, None, None).await.is_err());
        assert_eq!(*seen.lock(), 1);
    }

    #[tokio::test]
    async fn rate_limit_rejects_without_traffic() {
        let (gw, _) = collecting_gateway(GatewaySettings {
            max_invocations_per_minute: 1,
            retry_attempts: 1,
            ..GatewaySettings::default()
        });
        let mut rx = attach(&gw, "tab");
        let gw2 = gw.clone();
        let first = tokio::spawn(async move {
            gw2.invoke_method("user.getById", None, None, Some(50)).await
        });
        assert!(matches!(rx.recv().await, Some(Outbound::Text(_))));

        let err = gw.invoke_method("user.getById", None, None, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { limit: 1, .. }));
        let _ = first.await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let (gw, _) = collecting_gateway(GatewaySettings {
            retry_attempts: 1,
            ..GatewaySettings::default()
        });
        let _rx = attach(&gw, "tab");
        let err = gw
            .invoke_method("user.getById", None, None, Some(300))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { timeout_ms: 300, .. }));
        assert_eq!(gw.pending_count(), 0);
    }

    #[tokio::test]
    async fn invalid_descriptor_list_is_gateway_error() {
        let (gw, _) = collecting_gateway(GatewaySettings::default());
        let rx = attach(&gw, "tab");
        fake_page(&gw, "tab", rx, |req| {
            Some(ResponseEnvelope::success(req, "tab", json!({"methods": [{"name": ""}]})))
        });
        let err = gw.list_methods(None, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidDescriptors(_)));
    }

    #[tokio::test]
    async fn stop_rejects_pending_and_is_idempotent() {
        let (gw, _) = collecting_gateway(GatewaySettings::default());
        let mut rx = attach(&gw, "tab");
        let gw2 = gw.clone();
        let pending = tokio::spawn(async move { gw2.list_methods(None, None).await });
        assert!(matches!(rx.recv().await, Some(Outbound::Text(_))));

        gw.stop().await;
        gw.stop().await;
        assert!(matches!(pending.await.unwrap(), Err(GatewayError::Stopped)));
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Close { code: CLOSE_GOING_AWAY, .. })
        ));
        assert!(gw.session_ids().is_empty());
        assert!(matches!(
            gw.invoke_method("a.b", None, None, None).await,
            Err(GatewayError::Stopped)
        ));
    }
}
