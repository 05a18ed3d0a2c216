//! [`PageRuntime`]: answers gateway requests from the page's method registry.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use pagewire_protocol::errors::{INVALID_PAYLOAD, METHOD_NOT_ALLOWED, METHOD_NOT_FOUND};
use pagewire_protocol::types::{
    InvokeMethodPayload, InvokeMethodResult, ListMethodsPayload, ListMethodsResult, PingResult,
    SubscribeEventPayload, SubscribeEventResult, UnsubscribeEventPayload, UnsubscribeEventResult,
};
use pagewire_protocol::{
    Envelope, EventEnvelope, MethodMatcher, ProtocolError, RequestEnvelope, RequestType,
    ResponseEnvelope, new_request_id, now_ms, parse_envelope,
};
use pagewire_settings::RuntimeSettings;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::bindings::{BindingSpec, BindingTable};
use crate::errors::{HandlerError, RuntimeError, TransportError};
use crate::method::{InvocationContext, MethodRegistration, qualified_name};
use crate::registry::{CompositeDisposer, Disposer, MethodRegistry, validate_name};
use crate::transport::{
    ConnectOptions, Incoming, ReconnectPolicy, Transport, TransportEvent, WebSocketTransport,
};

/// Topics one caller subscribed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSubscription {
    /// Id returned to the subscriber.
    pub id: String,
    /// Topics this subscription receives.
    pub topics: Vec<String>,
}

struct Link {
    id: u64,
    transport: Arc<dyn Transport>,
    stop: CancellationToken,
}

struct RuntimeInner {
    settings: RuntimeSettings,
    session_id: String,
    registry: MethodRegistry,
    allowlist: MethodMatcher,
    subscriptions: RwLock<HashMap<String, EventSubscription>>,
    link: Mutex<Option<Link>>,
    next_link: AtomicU64,
    last_error: Mutex<Option<TransportError>>,
}

/// Page-side endpoint of the bridge.
///
/// Cheap to clone; clones share the registry, subscriptions, and transport.
#[derive(Clone)]
pub struct PageRuntime {
    inner: Arc<RuntimeInner>,
}

impl PageRuntime {
    /// Build a runtime. An empty `session_id` setting gets a generated id.
    pub fn new(settings: RuntimeSettings) -> Result<Self, RuntimeError> {
        let allowlist = MethodMatcher::compile(&settings.method_allowlist)
            .map_err(|e| RuntimeError::Config(format!("methodAllowlist: {e}")))?;
        let session_id = if settings.session_id.trim().is_empty() {
            new_request_id()
        } else {
            settings.session_id.clone()
        };
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                settings,
                session_id,
                registry: MethodRegistry::new(),
                allowlist,
                subscriptions: RwLock::new(HashMap::new()),
                link: Mutex::new(None),
                next_link: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
        })
    }

    /// Session id sent to the gateway.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Settings the runtime was built with.
    pub fn settings(&self) -> &RuntimeSettings {
        &self.inner.settings
    }

    /// The method registry.
    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.registry
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect to the configured gateway. No-op while already connected.
    pub fn start(&self) -> Result<(), RuntimeError> {
        if self.is_running() {
            return Ok(());
        }
        let options = ConnectOptions::from_settings(&self.inner.settings, &self.inner.session_id);
        let policy = ReconnectPolicy::from_settings(&self.inner.settings);
        let (transport, incoming) = WebSocketTransport::connect(options, policy)?;
        info!(
            session_id = %self.inner.session_id,
            url = %self.inner.settings.gateway_url,
            "page runtime starting"
        );
        self.attach(Arc::new(transport), incoming);
        Ok(())
    }

    /// Serve requests arriving on any transport. Replaces a previous one.
    pub fn attach(&self, transport: Arc<dyn Transport>, incoming: Incoming) {
        let stop = CancellationToken::new();
        let id = self.inner.next_link.fetch_add(1, Ordering::Relaxed);
        let previous = self.inner.link.lock().replace(Link {
            id,
            transport: transport.clone(),
            stop: stop.clone(),
        });
        if let Some(previous) = previous {
            previous.stop.cancel();
            previous.transport.close();
        }
        *self.inner.last_error.lock() = None;
        drop(tokio::spawn(run_loop(
            Arc::downgrade(&self.inner),
            id,
            transport,
            incoming,
            stop,
        )));
    }

    /// Close the transport. Registered methods and subscriptions are kept.
    pub fn stop(&self) {
        if let Some(link) = self.inner.link.lock().take() {
            link.stop.cancel();
            link.transport.close();
            info!(session_id = %self.inner.session_id, "page runtime stopped");
        }
    }

    /// Whether a transport is attached.
    pub fn is_running(&self) -> bool {
        self.inner.link.lock().is_some()
    }

    /// Terminal transport failure, if the transport gave up. A failed
    /// transport is detached, so [`start`](Self::start) connects afresh.
    pub fn last_error(&self) -> Option<TransportError> {
        self.inner.last_error.lock().clone()
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner
            .link
            .lock()
            .as_ref()
            .map(|link| link.transport.clone())
    }

    // ── Method management ────────────────────────────────────────────

    /// Expose one method. The returned disposer only removes this exact
    /// registration.
    pub fn register_method(
        &self,
        name: impl Into<String>,
        registration: impl Into<MethodRegistration>,
    ) -> Result<Disposer, RuntimeError> {
        self.inner.registry.register(name, registration.into())
    }

    /// Expose a batch of methods. Every name is checked first, so a
    /// rejected batch leaves the registry untouched.
    pub fn expose_methods<I, N, R>(&self, methods: I) -> Result<CompositeDisposer, RuntimeError>
    where
        I: IntoIterator<Item = (N, R)>,
        N: Into<String>,
        R: Into<MethodRegistration>,
    {
        let batch: Vec<(String, MethodRegistration)> = methods
            .into_iter()
            .map(|(name, registration)| (name.into(), registration.into()))
            .collect();
        for (name, _) in &batch {
            validate_name(name)?;
        }

        let mut parts = Vec::with_capacity(batch.len());
        for (name, registration) in batch {
            match self.register_method(name, registration) {
                Ok(disposer) => parts.push(disposer),
                Err(e) => {
                    let _ = CompositeDisposer::new(parts).dispose();
                    return Err(e);
                }
            }
        }
        Ok(CompositeDisposer::new(parts))
    }

    /// Expose methods under `namespace`. Bare names become `namespace.name`;
    /// names that already contain a `.` are kept as given.
    pub fn expose_in_namespace<I, N, R>(
        &self,
        namespace: &str,
        methods: I,
    ) -> Result<CompositeDisposer, RuntimeError>
    where
        I: IntoIterator<Item = (N, R)>,
        N: AsRef<str>,
        R: Into<MethodRegistration>,
    {
        let qualified: Vec<(String, MethodRegistration)> = methods
            .into_iter()
            .map(|(name, registration)| {
                let mut registration = registration.into();
                if registration.namespace.is_none() {
                    registration.namespace = Some(namespace.to_owned());
                }
                (qualified_name(name.as_ref(), Some(namespace)), registration)
            })
            .collect();
        self.expose_methods(qualified)
    }

    /// Expose entries of `table` as methods. Every spec must resolve, or
    /// nothing is registered.
    pub fn expose_bindings(
        &self,
        table: &BindingTable,
        specs: &[BindingSpec],
        namespace: Option<&str>,
    ) -> Result<CompositeDisposer, RuntimeError> {
        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            let handler = table
                .resolve(&spec.path)
                .ok_or_else(|| RuntimeError::UnresolvedBinding {
                    name: spec.name.clone(),
                    path: spec.path.clone(),
                })?;
            let mut registration = MethodRegistration::new(handler);
            registration.description.clone_from(&spec.description);
            registration.namespace = namespace.map(str::to_owned);
            resolved.push((qualified_name(&spec.name, namespace), registration));
        }
        self.expose_methods(resolved)
    }

    /// Remove `name` regardless of who registered it.
    pub fn unregister_method(&self, name: &str) -> bool {
        self.inner.registry.remove(name)
    }

    /// Returns how many of `names` were registered.
    pub fn unregister_methods<I, S>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter(|name| self.inner.registry.remove(name.as_ref()))
            .count()
    }

    /// Remove every method.
    pub fn clear_methods(&self) {
        self.inner.registry.clear();
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Current subscriptions.
    pub fn subscriptions(&self) -> Vec<EventSubscription> {
        self.inner.subscriptions.read().values().cloned().collect()
    }

    /// Publish an event. Sent only when some subscription includes `topic`;
    /// returns whether it was sent.
    pub fn emit_event(&self, topic: &str, payload: impl Serialize) -> Result<bool, RuntimeError> {
        let subscribed = self
            .inner
            .subscriptions
            .read()
            .values()
            .any(|sub| sub.topics.iter().any(|t| t == topic));
        if !subscribed {
            debug!(topic, "no subscriber, event dropped");
            return Ok(false);
        }
        let Some(transport) = self.transport() else {
            return Ok(false);
        };
        let payload = serde_json::to_value(payload).map_err(TransportError::from)?;
        let event = EventEnvelope::new(self.inner.session_id.clone(), topic, payload);
        transport.send(&event.into())?;
        Ok(true)
    }

    // ── Request handling ─────────────────────────────────────────────

    /// Answer one request. Never fails: every problem becomes a failure
    /// response, including a panicking handler.
    pub async fn handle_request(&self, request: RequestEnvelope) -> ResponseEnvelope {
        let outcome = AssertUnwindSafe(self.dispatch(&request))
            .catch_unwind()
            .await;
        let result = outcome.unwrap_or_else(|_| {
            error!(request_id = %request.request_id, "request handler panicked");
            Err(HandlerError::Panicked.to_protocol_error())
        });
        match result {
            Ok(payload) => ResponseEnvelope::success(&request, self.inner.session_id.clone(), payload),
            Err(error) => ResponseEnvelope::failure(&request, self.inner.session_id.clone(), error),
        }
    }

    async fn dispatch(&self, request: &RequestEnvelope) -> Result<Value, ProtocolError> {
        match request.request_type {
            RequestType::ListMethods => {
                let payload: ListMethodsPayload = decode(request)?;
                encode(&ListMethodsResult {
                    methods: self.inner.registry.descriptors(payload.namespace.as_deref()),
                })
            }
            RequestType::InvokeMethod => self.invoke(request).await,
            RequestType::SubscribeEvent => {
                let payload: SubscribeEventPayload = decode(request)?;
                let id = new_request_id();
                let _ = self.inner.subscriptions.write().insert(
                    id.clone(),
                    EventSubscription {
                        id: id.clone(),
                        topics: payload.topics.clone(),
                    },
                );
                encode(&SubscribeEventResult {
                    subscription_id: id,
                    accepted_topics: payload.topics,
                })
            }
            RequestType::UnsubscribeEvent => {
                let payload: UnsubscribeEventPayload = decode(request)?;
                let _ = self
                    .inner
                    .subscriptions
                    .write()
                    .remove(&payload.subscription_id);
                encode(&UnsubscribeEventResult { ok: true })
            }
            RequestType::Ping => encode(&PingResult {
                value: "pong".to_owned(),
                at: now_ms(),
            }),
        }
    }

    #[instrument(skip_all, fields(request_id = %request.request_id))]
    async fn invoke(&self, request: &RequestEnvelope) -> Result<Value, ProtocolError> {
        let payload: InvokeMethodPayload = decode(request)?;
        let method = payload.method;

        if !self.inner.allowlist.allows(&method) {
            return Err(ProtocolError::new(
                METHOD_NOT_ALLOWED,
                format!("Method blocked by allowlist: {method}"),
            ));
        }
        let Some(registration) = self.inner.registry.get(&method) else {
            return Err(ProtocolError::new(
                METHOD_NOT_FOUND,
                format!("Method not exposed: {method}"),
            ));
        };

        let args = payload.args.unwrap_or(Value::Null);
        if let Some(validate) = &registration.validator {
            validate(&args).map_err(|e| {
                debug!(method, error = %e, "argument validation failed");
                e.to_protocol_error()
            })?;
        }

        let ctx = InvocationContext {
            session_id: self.inner.session_id.clone(),
            request_id: request.request_id.clone(),
            method: method.clone(),
            timeout_ms: payload.timeout_ms,
        };
        let result = registration.handler.call(args, &ctx).await.map_err(|e| {
            debug!(method, error = %e, "method failed");
            e.to_protocol_error()
        })?;
        encode(&InvokeMethodResult { method, result })
    }
}

impl std::fmt::Debug for PageRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRuntime")
            .field("session_id", &self.inner.session_id)
            .field("methods", &self.inner.registry.len())
            .field("running", &self.is_running())
            .finish()
    }
}

fn decode<T: DeserializeOwned>(request: &RequestEnvelope) -> Result<T, ProtocolError> {
    request.decode_payload().map_err(|e| {
        ProtocolError::new(
            INVALID_PAYLOAD,
            format!("invalid {} payload: {e}", request.request_type),
        )
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| HandlerError::from(e).to_protocol_error())
}

async fn run_loop(
    runtime: Weak<RuntimeInner>,
    link_id: u64,
    transport: Arc<dyn Transport>,
    mut incoming: Incoming,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = stop.cancelled() => break,
            event = incoming.recv() => event,
        };
        let Some(event) = event else { break };
        let Some(inner) = runtime.upgrade() else { break };
        match event {
            TransportEvent::Frame(text) => {
                handle_frame(PageRuntime { inner }, &transport, &text);
            }
            TransportEvent::State(state) => debug!(?state, "transport state changed"),
            TransportEvent::Failed(err) => {
                error!(error = %err, session_id = %inner.session_id, "transport failed");
                detach_failed(&inner, link_id, err);
                break;
            }
        }
    }
}

/// Drop the link that failed, unless it was already replaced or stopped.
fn detach_failed(inner: &RuntimeInner, link_id: u64, err: TransportError) {
    let failed = {
        let mut link = inner.link.lock();
        if link.as_ref().is_some_and(|l| l.id == link_id) {
            link.take()
        } else {
            None
        }
    };
    if let Some(failed) = failed {
        failed.stop.cancel();
        failed.transport.close();
        *inner.last_error.lock() = Some(err);
    }
}

fn handle_frame(runtime: PageRuntime, transport: &Arc<dyn Transport>, text: &str) {
    let envelope = match parse_envelope(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(errors = ?e.errors, "ignoring invalid envelope");
            return;
        }
    };
    let request = match envelope {
        Envelope::Request(request) => request,
        other => {
            debug!(kind = other.kind(), "ignoring non-request envelope");
            return;
        }
    };

    let transport = transport.clone();
    drop(tokio::spawn(async move {
        let response = runtime.handle_request(request).await;
        if let Err(e) = transport.send(&response.into()) {
            warn!(error = %e, "failed to send response");
        }
    }));
}
