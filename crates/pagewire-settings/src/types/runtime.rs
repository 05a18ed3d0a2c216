//! Page runtime connection settings.

use pagewire_protocol::MethodRule;
use serde::{Deserialize, Serialize};

/// Smallest reconnect backoff honored.
pub const MIN_RECONNECT_BACKOFF_MS: u64 = 100;

/// Page runtime settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Gateway WebSocket URL.
    pub gateway_url: String,
    /// Session id announced to the gateway. Empty generates one per runtime.
    pub session_id: String,
    /// Application id announced on connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// Bearer token, sent as an `auth.` subprotocol entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Reconnects tried after a drop before giving up.
    pub reconnect_attempts: u32,
    /// Linear backoff base; the n-th retry waits `base * n`.
    pub reconnect_backoff_ms: u64,
    /// Methods the page agrees to run. Empty allows all.
    pub method_allowlist: Vec<MethodRule>,
}

impl RuntimeSettings {
    /// `reconnect_backoff_ms`, never below [`MIN_RECONNECT_BACKOFF_MS`].
    pub fn effective_backoff_ms(&self) -> u64 {
        self.reconnect_backoff_ms.max(MIN_RECONNECT_BACKOFF_MS)
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            gateway_url: "ws://127.0.0.1:8787".to_string(),
            session_id: String::new(),
            app_id: None,
            auth_token: None,
            reconnect_attempts: 3,
            reconnect_backoff_ms: 500,
            method_allowlist: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = RuntimeSettings::default();
        assert_eq!(s.gateway_url, "ws://127.0.0.1:8787");
        assert_eq!(s.reconnect_attempts, 3);
        assert_eq!(s.effective_backoff_ms(), 500);
    }

    #[test]
    fn backoff_is_clamped() {
        let s = RuntimeSettings {
            reconnect_backoff_ms: 10,
            ..RuntimeSettings::default()
        };
        assert_eq!(s.effective_backoff_ms(), MIN_RECONNECT_BACKOFF_MS);
    }
}
