//! Envelope shapes: one complete protocol message per WebSocket frame.
//!
//! Every envelope carries `protocolVersion`, `requestId`, `sessionId`, and
//! `timestamp`; the `kind` tag selects request, response, or event.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;
use crate::types::RequestType;
use crate::{PROTOCOL_VERSION, new_request_id, now_ms};

/// One protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Envelope {
    /// Caller → page.
    Request(RequestEnvelope),
    /// Page → caller, correlated by `requestId`.
    Response(ResponseEnvelope),
    /// Page → caller, fire-and-forget.
    Event(EventEnvelope),
}

impl Envelope {
    /// Request id of any envelope kind.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Request(e) => &e.request_id,
            Self::Response(e) => &e.request_id,
            Self::Event(e) => &e.request_id,
        }
    }

    /// Session id of any envelope kind.
    pub fn session_id(&self) -> &str {
        match self {
            Self::Request(e) => &e.session_id,
            Self::Response(e) => &e.session_id,
            Self::Event(e) => &e.session_id,
        }
    }

    /// Wire name of the `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Event(_) => "event",
        }
    }

    /// Serialize to a single newline-free JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<RequestEnvelope> for Envelope {
    fn from(value: RequestEnvelope) -> Self {
        Self::Request(value)
    }
}

impl From<ResponseEnvelope> for Envelope {
    fn from(value: ResponseEnvelope) -> Self {
        Self::Response(value)
    }
}

impl From<EventEnvelope> for Envelope {
    fn from(value: EventEnvelope) -> Self {
        Self::Event(value)
    }
}

/// A request from the gateway to the page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Must equal [`PROTOCOL_VERSION`](crate::PROTOCOL_VERSION).
    pub protocol_version: String,
    /// Unique per request.
    pub request_id: String,
    /// Target session.
    pub session_id: String,
    /// Milliseconds since the Unix epoch.
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: u64,
    /// Operation requested.
    #[serde(rename = "type")]
    pub request_type: RequestType,
    /// Type-dependent payload; always a JSON object.
    pub payload: Map<String, Value>,
}

impl RequestEnvelope {
    /// Build a request with a freshly generated id.
    pub fn new(
        session_id: impl Into<String>,
        request_type: RequestType,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            request_id: new_request_id(),
            session_id: session_id.into(),
            timestamp: now_ms(),
            request_type,
            payload,
        }
    }

    /// Decode the payload into the typed shape for this request type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}

/// A response correlated to a request by `requestId`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// Echoes the request's version.
    pub protocol_version: String,
    /// Id of the request being answered.
    pub request_id: String,
    /// Session that answered.
    pub session_id: String,
    /// Milliseconds since the Unix epoch.
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: u64,
    /// Echoes the request's type.
    #[serde(rename = "type")]
    pub request_type: RequestType,
    /// Whether `payload` or `error` is set.
    pub success: bool,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

impl ResponseEnvelope {
    /// Successful response to `request`.
    pub fn success(request: &RequestEnvelope, session_id: impl Into<String>, payload: Value) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            request_id: request.request_id.clone(),
            session_id: session_id.into(),
            timestamp: now_ms(),
            request_type: request.request_type,
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Failed response to `request`.
    pub fn failure(
        request: &RequestEnvelope,
        session_id: impl Into<String>,
        error: ProtocolError,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            request_id: request.request_id.clone(),
            session_id: session_id.into(),
            timestamp: now_ms(),
            request_type: request.request_type,
            success: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Marker for the fixed `type: "event"` field of event envelopes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The only event kind.
    #[default]
    Event,
}

/// An event published by the page on a topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Protocol version of the sender.
    pub protocol_version: String,
    /// Fresh id for this event.
    pub request_id: String,
    /// Session that emitted the event.
    pub session_id: String,
    /// Milliseconds since the Unix epoch.
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: u64,
    /// Always [`EventKind::Event`].
    #[serde(rename = "type")]
    pub event_type: EventKind,
    /// Topic subscribers filter on.
    pub topic: String,
    /// Event body.
    #[serde(default)]
    pub payload: Value,
}

impl EventEnvelope {
    /// Build an event with a freshly generated id.
    pub fn new(session_id: impl Into<String>, topic: impl Into<String>, payload: Value) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            request_id: new_request_id(),
            session_id: session_id.into(),
            timestamp: now_ms(),
            event_type: EventKind::Event,
            topic: topic.into(),
            payload,
        }
    }
}

/// Serialize `value` and require the result to be a JSON object.
pub fn payload_object<T: Serialize>(value: &T) -> serde_json::Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "payload must serialize to an object, got {other}"
        ))),
    }
}

/// Accept any finite, non-negative JSON number as an epoch-millisecond timestamp.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn de_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() || raw < 0.0 {
        return Err(serde::de::Error::custom(
            "timestamp must be a finite, non-negative number",
        ));
    }
    Ok(raw.trunc() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> RequestEnvelope {
        let mut payload = Map::new();
        let _ = payload.insert("method".into(), json!("user.getById"));
        RequestEnvelope::new("sess-1", RequestType::InvokeMethod, payload)
    }

    #[test]
    fn request_serializes_with_kind_tag() {
        let env = Envelope::from(request());
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["kind"], "request");
        assert_eq!(v["type"], "invokeMethod");
        assert_eq!(v["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(v["sessionId"], "sess-1");
        assert!(v["timestamp"].is_u64());
    }

    #[test]
    fn response_mirrors_request_id_and_type() {
        let req = request();
        let resp = ResponseEnvelope::success(&req, "sess-1", json!({"ok": true}));
        assert_eq!(resp.request_id, req.request_id);
        assert_eq!(resp.request_type, RequestType::InvokeMethod);
        let v = serde_json::to_value(Envelope::from(resp)).unwrap();
        assert!(v.get("error").is_none());
    }

    #[test]
    fn failure_has_no_payload() {
        let req = request();
        let resp = ResponseEnvelope::failure(&req, "sess-1", ProtocolError::new("X", "boom"));
        let v = serde_json::to_value(Envelope::from(resp)).unwrap();
        assert_eq!(v["success"], false);
        assert!(v.get("payload").is_none());
        assert_eq!(v["error"]["code"], "X");
    }

    #[test]
    fn event_type_is_event() {
        let env = Envelope::from(EventEnvelope::new("s", "cart:updated", json!({"n": 1})));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["kind"], "event");
        assert_eq!(v["type"], "event");
        assert_eq!(v["topic"], "cart:updated");
    }

    #[test]
    fn fractional_timestamp_truncates() {
        let v = json!({
            "kind": "event", "protocolVersion": PROTOCOL_VERSION, "requestId": "r",
            "sessionId": "s", "timestamp": 1_700_000_000_000.75_f64, "type": "event",
            "topic": "t", "payload": null
        });
        let env: Envelope = serde_json::from_value(v).unwrap();
        let Envelope::Event(e) = env else { panic!("expected event") };
        assert_eq!(e.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn decode_payload_typed() {
        let p: crate::types::InvokeMethodPayload = request().decode_payload().unwrap();
        assert_eq!(p.method, "user.getById");
    }

    #[test]
    fn payload_object_rejects_scalars() {
        assert!(payload_object(&json!(3)).is_err());
        assert!(payload_object(&json!({"a": 1})).is_ok());
    }
}
