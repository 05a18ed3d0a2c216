//! Structural validation of untrusted JSON.
//!
//! Validators are total: they never panic and report every problem they find
//! as a human-readable string. The one exception to error collection is the
//! protocol version, which is checked first and short-circuits.

use serde_json::Value;

use crate::PROTOCOL_VERSION;
use crate::envelope::Envelope;
use crate::types::{MethodDescriptor, RequestType};

/// One or more structural problems with an inbound message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid envelope: {}", .errors.join("; "))]
pub struct ValidationError {
    /// Individual problems, in discovery order.
    pub errors: Vec<String>,
}

impl ValidationError {
    fn single(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}

/// Parse a text frame and validate it.
pub fn parse_envelope(text: &str) -> Result<Envelope, ValidationError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ValidationError::single(format!("invalid JSON: {e}")))?;
    validate_envelope(&value)
}

/// Validate an untrusted JSON value and convert it to a typed [`Envelope`].
pub fn validate_envelope(raw: &Value) -> Result<Envelope, ValidationError> {
    let Some(obj) = raw.as_object() else {
        return Err(ValidationError::single("envelope must be a JSON object"));
    };

    match obj.get("protocolVersion").and_then(Value::as_str) {
        Some(PROTOCOL_VERSION) => {}
        Some(other) => {
            return Err(ValidationError::single(format!(
                "unsupported protocolVersion {other:?}, expected {PROTOCOL_VERSION:?}"
            )));
        }
        None => return Err(ValidationError::single("protocolVersion must be a string")),
    }

    let mut errors = Vec::new();
    for field in ["requestId", "sessionId"] {
        if !obj.get(field).is_some_and(Value::is_string) {
            errors.push(format!("{field} must be a string"));
        }
    }
    match obj.get("timestamp").and_then(Value::as_f64) {
        Some(ts) if ts.is_finite() && ts >= 0.0 => {}
        Some(_) => errors.push("timestamp must be finite and non-negative".to_owned()),
        None => errors.push("timestamp must be a number".to_owned()),
    }

    let type_field = obj.get("type").and_then(Value::as_str);
    match obj.get("kind").and_then(Value::as_str) {
        Some("request") => {
            check_request_type(type_field, &mut errors);
            if !obj.get("payload").is_some_and(Value::is_object) {
                errors.push("request payload must be an object".to_owned());
            }
        }
        Some("response") => {
            check_request_type(type_field, &mut errors);
            if !obj.get("success").is_some_and(Value::is_boolean) {
                errors.push("response success must be a boolean".to_owned());
            }
        }
        Some("event") => {
            if type_field != Some("event") {
                errors.push("event type must be \"event\"".to_owned());
            }
            if !obj.get("topic").is_some_and(Value::is_string) {
                errors.push("event topic must be a string".to_owned());
            }
        }
        Some(other) => errors.push(format!("unknown kind {other:?}")),
        None => errors.push("kind must be a string".to_owned()),
    }

    if !errors.is_empty() {
        return Err(ValidationError { errors });
    }

    serde_json::from_value(raw.clone()).map_err(|e| ValidationError::single(e.to_string()))
}

fn check_request_type(value: Option<&str>, errors: &mut Vec<String>) {
    match value {
        Some(t) if RequestType::parse(t).is_some() => {}
        Some(t) => errors.push(format!("unknown request type {t:?}")),
        None => errors.push("type must be a string".to_owned()),
    }
}

/// Validate a method descriptor list returned by a page.
pub fn validate_method_descriptors(raw: &Value) -> Result<Vec<MethodDescriptor>, ValidationError> {
    let Some(items) = raw.as_array() else {
        return Err(ValidationError::single("methods must be an array"));
    };

    let mut errors = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let named = item
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|n| !n.trim().is_empty());
        if !named {
            errors.push(format!("methods[{i}].name must be a non-empty string"));
        }
    }
    if !errors.is_empty() {
        return Err(ValidationError { errors });
    }

    serde_json::from_value(raw.clone()).map_err(|e| ValidationError::single(e.to_string()))
}
