//! Runtime, transport, and handler errors.

use pagewire_protocol::ProtocolError;
use pagewire_protocol::errors::METHOD_EXECUTION_FAILED;
use serde_json::Value;

// ── Error code constants ────────────────────────────────────────────

/// A method name was empty.
pub const INVALID_METHOD_NAME: &str = "INVALID_METHOD_NAME";
/// A binding spec pointed at a path missing from its table.
pub const UNRESOLVED_BINDING: &str = "UNRESOLVED_BINDING";
/// Runtime settings could not be applied.
pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
/// The transport is closed.
pub const TRANSPORT_CLOSED: &str = "TRANSPORT_CLOSED";
/// Opening the socket failed.
pub const CONNECT_FAILED: &str = "CONNECT_FAILED";
/// Writing to the socket failed.
pub const SEND_FAILED: &str = "SEND_FAILED";
/// Reconnection gave up.
pub const RECONNECT_EXHAUSTED: &str = "RECONNECT_EXHAUSTED";
/// An envelope could not be encoded.
pub const ENCODE_FAILED: &str = "ENCODE_FAILED";

/// Failure raised by a method handler or argument validator.
///
/// Every variant reaches the caller as a `METHOD_EXECUTION_FAILED` response.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Argument validation rejected the call.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The handler reported a failure.
    #[error("{message}")]
    Failed {
        /// Message shown to the caller.
        message: String,
        /// Optional structured details.
        details: Option<Value>,
    },

    /// The handler's result could not be turned into JSON.
    #[error("result is not JSON-serializable: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The handler panicked.
    #[error("handler panicked")]
    Panicked,
}

impl HandlerError {
    /// Handler failure with a message only.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            details: None,
        }
    }

    /// Argument validation failure.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs(message.into())
    }

    /// Wire form of this failure.
    pub fn to_protocol_error(&self) -> ProtocolError {
        let err = ProtocolError::new(METHOD_EXECUTION_FAILED, self.to_string());
        match self {
            Self::Failed {
                details: Some(details),
                ..
            } => err.with_details(details.clone()),
            _ => err,
        }
    }
}

/// Transport-level failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport was closed, or gave up earlier.
    #[error("transport is closed")]
    Closed,

    /// Opening the connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reconnection was abandoned.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted {
        /// Reconnect attempts made.
        attempts: u32,
    },

    /// An outbound envelope could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl TransportError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Closed => TRANSPORT_CLOSED,
            Self::Connect(_) => CONNECT_FAILED,
            Self::Send(_) => SEND_FAILED,
            Self::ReconnectExhausted { .. } => RECONNECT_EXHAUSTED,
            Self::Encode(_) => ENCODE_FAILED,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

/// Errors returned by [`crate::PageRuntime`] operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Method names must be non-empty.
    #[error("method name must be a non-empty string")]
    InvalidMethodName,

    /// A binding spec named a path the table does not contain.
    #[error("binding {name} points at unknown path {path}")]
    UnresolvedBinding {
        /// Method name the binding would expose.
        name: String,
        /// Missing path.
        path: String,
    },

    /// Settings were rejected.
    #[error("invalid runtime configuration: {0}")]
    Config(String),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RuntimeError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMethodName => INVALID_METHOD_NAME,
            Self::UnresolvedBinding { .. } => UNRESOLVED_BINDING,
            Self::Config(_) => INVALID_CONFIG,
            Self::Transport(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handler_errors_share_execution_code() {
        for err in [
            HandlerError::invalid_args("id must be a string"),
            HandlerError::failed("boom"),
            HandlerError::Panicked,
        ] {
            assert_eq!(err.to_protocol_error().code, METHOD_EXECUTION_FAILED);
        }
    }

    #[test]
    fn failed_details_are_forwarded() {
        let err = HandlerError::Failed {
            message: "out of stock".into(),
            details: Some(json!({"sku": "A-1"})),
        };
        let wire = err.to_protocol_error();
        assert_eq!(wire.message, "out of stock");
        assert_eq!(wire.details.unwrap()["sku"], "A-1");
    }

    #[test]
    fn runtime_codes() {
        let err = RuntimeError::UnresolvedBinding {
            name: "profile".into(),
            path: "legacyApi.account.getProfile".into(),
        };
        assert_eq!(err.code(), UNRESOLVED_BINDING);
        let err = RuntimeError::from(TransportError::ReconnectExhausted { attempts: 3 });
        assert_eq!(err.code(), RECONNECT_EXHAUSTED);
        assert_eq!(err.to_string(), "gave up reconnecting after 3 attempts");
    }
}
