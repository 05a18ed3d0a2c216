//! Method handlers and the registration record that wraps them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use pagewire_protocol::MethodDescriptor;
use serde::Serialize;
use serde_json::Value;

use crate::errors::HandlerError;

/// What a handler knows about the call it is serving.
#[derive(Clone, Debug)]
pub struct InvocationContext {
    /// Session of the runtime serving the call.
    pub session_id: String,
    /// Id of the request envelope.
    pub request_id: String,
    /// Qualified method name.
    pub method: String,
    /// Caller-side timeout, if the caller sent one.
    pub timeout_ms: Option<u64>,
}

/// Trait implemented by every exposed method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Run the method. `args` is `null` when the caller sent none.
    async fn call(&self, args: Value, ctx: &InvocationContext) -> Result<Value, HandlerError>;
}

type BoxedFn =
    Box<dyn Fn(Value, InvocationContext) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

struct FnHandler {
    f: BoxedFn,
}

#[async_trait]
impl MethodHandler for FnHandler {
    async fn call(&self, args: Value, ctx: &InvocationContext) -> Result<Value, HandlerError> {
        (self.f)(args, ctx.clone()).await
    }
}

/// Handler from an async closure over raw JSON.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MethodHandler>
where
    F: Fn(Value, InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f: Box::new(move |args, ctx| f(args, ctx).boxed()),
    })
}

/// Handler from an async closure returning any serializable value.
pub fn json_handler<F, Fut, T>(f: F) -> Arc<dyn MethodHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    Arc::new(FnHandler {
        f: Box::new(move |args, _ctx| {
            let fut = f(args);
            async move {
                let out = fut.await?;
                Ok(serde_json::to_value(out)?)
            }
            .boxed()
        }),
    })
}

/// Runs before the handler; an `Err` fails the call without running it.
pub type ArgValidator = Arc<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

/// A handler plus the metadata published through `listMethods`.
#[derive(Clone)]
pub struct MethodRegistration {
    /// Runs the method.
    pub handler: Arc<dyn MethodHandler>,
    /// Checked before the handler runs.
    pub validator: Option<ArgValidator>,
    /// Human-readable summary.
    pub description: Option<String>,
    /// Namespace shown in the descriptor.
    pub namespace: Option<String>,
    /// JSON schema of the arguments.
    pub input_schema: Option<Value>,
    /// JSON schema of the result.
    pub output_schema: Option<Value>,
    /// Free-form labels.
    pub tags: Vec<String>,
    /// Whether callers must be authenticated.
    pub requires_auth: Option<bool>,
}

impl MethodRegistration {
    /// Registration with no metadata.
    pub fn new(handler: Arc<dyn MethodHandler>) -> Self {
        Self {
            handler,
            validator: None,
            description: None,
            namespace: None,
            input_schema: None,
            output_schema: None,
            tags: Vec::new(),
            requires_auth: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the input schema.
    #[must_use]
    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Set the output schema.
    #[must_use]
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Replace the tags.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the method as requiring auth.
    #[must_use]
    pub fn requires_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = Some(requires_auth);
        self
    }

    /// Attach an argument validator.
    #[must_use]
    pub fn validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validate));
        self
    }

    /// Public descriptor of this registration under `name`.
    pub fn descriptor(&self, name: &str) -> MethodDescriptor {
        MethodDescriptor {
            name: name.to_owned(),
            description: self.description.clone(),
            namespace: self.namespace.clone(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            tags: self.tags.clone(),
            requires_auth: self.requires_auth,
        }
    }
}

impl From<Arc<dyn MethodHandler>> for MethodRegistration {
    fn from(handler: Arc<dyn MethodHandler>) -> Self {
        Self::new(handler)
    }
}

impl fmt::Debug for MethodRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistration")
            .field("description", &self.description)
            .field("namespace", &self.namespace)
            .field("tags", &self.tags)
            .field("requires_auth", &self.requires_auth)
            .field("has_validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

/// `name` qualified with `namespace`, unless it is already qualified.
pub fn qualified_name(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() && !name.contains('.') => format!("{ns}.{name}"),
        _ => name.to_owned(),
    }
}
