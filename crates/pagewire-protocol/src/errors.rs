//! Wire error codes and the error body carried by failed responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Error code constants ────────────────────────────────────────────

/// No method is registered under the requested name.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// The page's own allow-list rejected the method.
pub const METHOD_NOT_ALLOWED: &str = "METHOD_NOT_ALLOWED";
/// Argument validation or the handler itself failed.
pub const METHOD_EXECUTION_FAILED: &str = "METHOD_EXECUTION_FAILED";
/// The request payload did not match the shape its type requires.
pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
/// A failed response arrived without an error body.
pub const BRIDGE_ERROR: &str = "BRIDGE_ERROR";

/// Structured failure carried by a response with `success: false`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct ProtocolError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Whether the sender considers a retry safe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ProtocolError {
    /// Error with a code and message only.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark whether retrying is safe.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Placeholder for a failed response that carried no error body.
    pub fn unknown() -> Self {
        Self::new(BRIDGE_ERROR, "Unknown bridge error")
    }
}
