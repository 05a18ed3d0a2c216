//! Request types, method descriptors, and the typed payloads carried inside
//! request and response envelopes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of request types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestType {
    /// Enumerate the methods the page currently exposes.
    ListMethods,
    /// Invoke one exposed method.
    InvokeMethod,
    /// Subscribe to page event topics.
    SubscribeEvent,
    /// Drop an event subscription.
    UnsubscribeEvent,
    /// Liveness probe.
    Ping,
}

impl RequestType {
    /// All request types, in wire order.
    pub const ALL: [Self; 5] = [
        Self::ListMethods,
        Self::InvokeMethod,
        Self::SubscribeEvent,
        Self::UnsubscribeEvent,
        Self::Ping,
    ];

    /// Wire name of this request type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListMethods => "listMethods",
            Self::InvokeMethod => "invokeMethod",
            Self::SubscribeEvent => "subscribeEvent",
            Self::UnsubscribeEvent => "unsubscribeEvent",
            Self::Ping => "ping",
        }
    }

    /// Parse a wire name; `None` for anything outside the closed set.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public description of one exposed method.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    /// Qualified name (`namespace.method`).
    pub name: String,
    /// Human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Namespace the method was exposed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// JSON schema of the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// JSON schema of the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Whether the method expects an authenticated caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_auth: Option<bool>,
}

impl MethodDescriptor {
    /// Descriptor carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// ── Request payloads ────────────────────────────────────────────────

/// Payload of a `listMethods` request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMethodsPayload {
    /// Only list methods under `namespace.`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Ask for input and output schemas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_schemas: Option<bool>,
}

/// Payload of an `invokeMethod` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeMethodPayload {
    /// Qualified method name.
    pub method: String,
    /// Arguments, passed to the handler as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Caller's deadline, informational for the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Payload of a `subscribeEvent` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeEventPayload {
    /// Topics to receive.
    pub topics: Vec<String>,
}

/// Payload of an `unsubscribeEvent` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeEventPayload {
    /// Identifier returned by the matching `subscribeEvent`.
    pub subscription_id: String,
}

/// Payload of a `ping` request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
    /// Optional value echoed back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

// ── Response payloads ───────────────────────────────────────────────

/// Result of `listMethods`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMethodsResult {
    /// Exposed methods.
    pub methods: Vec<MethodDescriptor>,
}

/// Result of `invokeMethod`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeMethodResult {
    /// Method that ran.
    pub method: String,
    /// JSON value returned by the handler.
    #[serde(default)]
    pub result: Value,
}

/// Result of `subscribeEvent`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeEventResult {
    /// Identifier to pass to `unsubscribeEvent`.
    pub subscription_id: String,
    /// Topics the page accepted.
    pub accepted_topics: Vec<String>,
}

/// Result of `unsubscribeEvent`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeEventResult {
    /// Always `true`.
    pub ok: bool,
}

/// Result of `ping`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    /// Always `"pong"`.
    pub value: String,
    /// Page timestamp in epoch milliseconds.
    pub at: u64,
}
