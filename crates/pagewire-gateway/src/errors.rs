//! Gateway error codes and error type.

use pagewire_protocol::{ProtocolError, RequestType, ValidationError};

// ── Error code constants ────────────────────────────────────────────

/// No page session is connected.
pub const NO_SESSION: &str = "NO_SESSION";
/// Several sessions are connected and none was named.
pub const AMBIGUOUS_SESSION: &str = "AMBIGUOUS_SESSION";
/// The named session is not connected.
pub const SESSION_NOT_CONNECTED: &str = "SESSION_NOT_CONNECTED";
/// The method is not on the gateway allow-list.
pub const METHOD_BLOCKED: &str = "METHOD_BLOCKED";
/// The per-minute invocation limit was reached.
pub const RATE_LIMITED: &str = "RATE_LIMITED";
/// No response arrived in time.
pub const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
/// The gateway shut down with the request outstanding.
pub const GATEWAY_STOPPED: &str = "GATEWAY_STOPPED";
/// The session's socket closed with the request outstanding.
pub const SESSION_DISCONNECTED: &str = "SESSION_DISCONNECTED";
/// The request could not be queued on the session's socket.
pub const SEND_FAILED: &str = "SEND_FAILED";
/// A page returned a structurally invalid method list.
pub const INVALID_DESCRIPTORS: &str = "INVALID_DESCRIPTORS";
/// Encoding a request or decoding a response payload failed.
pub const CODEC_ERROR: &str = "CODEC_ERROR";
/// Settings could not be turned into a working gateway.
pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
/// Socket-level I/O failure (e.g. bind).
pub const IO_ERROR: &str = "IO_ERROR";

/// Errors surfaced to gateway callers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No session is connected.
    #[error("no browser session is connected")]
    NoSession,

    /// More than one session is connected and none was specified.
    #[error("multiple browser sessions connected, specify one of: {}", .sessions.join(", "))]
    AmbiguousSession {
        /// Connected session ids, in registration order.
        sessions: Vec<String>,
    },

    /// The requested session is not connected.
    #[error("session {session_id} is not connected")]
    SessionNotConnected {
        /// Requested session.
        session_id: String,
    },

    /// Blocked by the method allow-list.
    #[error("method {method} is not allowed by gateway policy")]
    MethodBlocked {
        /// Rejected method.
        method: String,
    },

    /// Rate limit exceeded for `(session_id, method)`.
    #[error("rate limit exceeded for {method} on session {session_id} ({limit}/min)")]
    RateLimited {
        /// Session whose window is full.
        session_id: String,
        /// Limited method.
        method: String,
        /// Effective per-minute limit.
        limit: i64,
    },

    /// No response within the timeout.
    #[error("{request_type} request timed out after {timeout_ms}ms")]
    Timeout {
        /// Type of the timed-out request.
        request_type: RequestType,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The gateway is stopped or stopping.
    #[error("gateway stopped")]
    Stopped,

    /// The session disconnected while the request was pending.
    #[error("session {session_id} disconnected")]
    SessionDisconnected {
        /// Session that went away.
        session_id: String,
    },

    /// The page answered with a failure.
    #[error("{0}")]
    Remote(ProtocolError),

    /// The request could not be handed to the session's writer.
    #[error("failed to send to session {session_id}")]
    Send {
        /// Target session.
        session_id: String,
    },

    /// The page's method list failed validation.
    #[error("invalid method descriptors: {0}")]
    InvalidDescriptors(#[source] ValidationError),

    /// Payload (de)serialization failed.
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Settings rejected at construction.
    #[error("invalid gateway configuration: {0}")]
    Config(String),

    /// Listener I/O failure.
    #[error("gateway I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::NoSession => NO_SESSION,
            Self::AmbiguousSession { .. } => AMBIGUOUS_SESSION,
            Self::SessionNotConnected { .. } => SESSION_NOT_CONNECTED,
            Self::MethodBlocked { .. } => METHOD_BLOCKED,
            Self::RateLimited { .. } => RATE_LIMITED,
            Self::Timeout { .. } => REQUEST_TIMEOUT,
            Self::Stopped => GATEWAY_STOPPED,
            Self::SessionDisconnected { .. } => SESSION_DISCONNECTED,
            Self::Remote(err) => &err.code,
            Self::Send { .. } => SEND_FAILED,
            Self::InvalidDescriptors(_) => INVALID_DESCRIPTORS,
            Self::Codec(_) => CODEC_ERROR,
            Self::Config(_) => INVALID_CONFIG,
            Self::Io(_) => IO_ERROR,
        }
    }

    /// Whether another attempt of the same request may succeed.
    ///
    /// Remote failures are retryable unless the page marked them
    /// `retryable: false`. Local policy and shutdown errors never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(err) => err.retryable != Some(false),
            Self::Timeout { .. }
            | Self::Send { .. }
            | Self::SessionNotConnected { .. }
            | Self::SessionDisconnected { .. } => true,
            _ => false,
        }
    }

    /// Wire-format body for callers that forward gateway errors as JSON.
    pub fn to_protocol_error(&self) -> ProtocolError {
        match self {
            Self::Remote(err) => err.clone(),
            other => ProtocolError::new(other.code(), other.to_string())
                .with_retryable(other.is_retryable()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_lists_sessions() {
        let err = GatewayError::AmbiguousSession {
            sessions: vec!["tab-a".into(), "tab-b".into()],
        };
        assert_eq!(err.code(), AMBIGUOUS_SESSION);
        assert!(err.to_string().ends_with("specify one of: tab-a, tab-b"));
    }

    #[test]
    fn remote_uses_page_code() {
        let err = GatewayError::Remote(ProtocolError::new("METHOD_NOT_FOUND", "nope"));
        assert_eq!(err.code(), "METHOD_NOT_FOUND");
        assert!(err.is_retryable());
    }

    #[test]
    fn remote_non_retryable_respected() {
        let err = GatewayError::Remote(ProtocolError::new("X", "y").with_retryable(false));
        assert!(!err.is_retryable());
    }

    #[test]
    fn policy_and_shutdown_not_retryable() {
        assert!(!GatewayError::Stopped.is_retryable());
        assert!(
            !GatewayError::MethodBlocked {
                method: "a".into()
            }
            .is_retryable()
        );
        assert!(
            GatewayError::Timeout {
                request_type: RequestType::Ping,
                timeout_ms: 5
            }
            .is_retryable()
        );
    }

    #[test]
    fn timeout_message() {
        let err = GatewayError::Timeout {
            request_type: RequestType::InvokeMethod,
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "invokeMethod request timed out after 250ms");
        assert_eq!(err.to_protocol_error().code, REQUEST_TIMEOUT);
    }
}
