//! Gateway listener, admission, and dispatch policy settings.

use std::collections::HashMap;

use pagewire_protocol::MethodRule;
use pagewire_protocol::rules::default_mutation_patterns;
use serde::{Deserialize, Serialize};

/// Session gateway settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Bind address.
    pub host: String,
    /// Listen port; `0` picks an ephemeral port.
    pub port: u16,
    /// Shared-secret bearer token. `None` admits every connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Accept the token from the `token` query parameter.
    pub allow_query_token: bool,
    /// Origins allowed to connect. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Methods callers may invoke. Empty allows all.
    pub method_allowlist: Vec<MethodRule>,
    /// Per-request timeout when the caller gives none.
    pub default_timeout_ms: u64,
    /// Attempts per request for non-mutating methods.
    pub retry_attempts: u32,
    /// Let mutating methods use `retry_attempts` too.
    pub retry_mutating_methods: bool,
    /// Regex sources classifying a method name as mutating.
    pub mutation_method_patterns: Vec<String>,
    /// Fail instead of picking a session when several are connected.
    pub require_explicit_session_when_multiple: bool,
    /// Default per-(session, method) limit. `<= 0` disables limiting.
    pub max_invocations_per_minute: i64,
    /// Per-method overrides of `max_invocations_per_minute`.
    pub method_rate_limits: HashMap<String, i64>,
    /// Largest inbound WebSocket message accepted.
    pub max_payload_bytes: usize,
    /// Reject a session's pending requests as soon as its socket closes.
    pub fail_pending_on_disconnect: bool,
}

impl GatewaySettings {
    /// `retry_attempts`, never below one.
    pub fn effective_retry_attempts(&self) -> u32 {
        self.retry_attempts.max(1)
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            auth_token: None,
            allow_query_token: true,
            allowed_origins: Vec::new(),
            method_allowlist: Vec::new(),
            default_timeout_ms: 10_000,
            retry_attempts: 2,
            retry_mutating_methods: false,
            mutation_method_patterns: default_mutation_patterns(),
            require_explicit_session_when_multiple: true,
            max_invocations_per_minute: 60,
            method_rate_limits: HashMap::new(),
            max_payload_bytes: 1_000_000,
            fail_pending_on_disconnect: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let s = GatewaySettings::default();
        assert_eq!(s.bind_addr(), "127.0.0.1:8787");
        assert_eq!(s.default_timeout_ms, 10_000);
        assert_eq!(s.retry_attempts, 2);
        assert!(!s.retry_mutating_methods);
        assert!(s.require_explicit_session_when_multiple);
        assert_eq!(s.max_invocations_per_minute, 60);
        assert_eq!(s.max_payload_bytes, 1_000_000);
        assert_eq!(s.mutation_method_patterns.len(), 14);
    }

    #[test]
    fn retry_attempts_floor_is_one() {
        let s = GatewaySettings {
            retry_attempts: 0,
            ..GatewaySettings::default()
        };
        assert_eq!(s.effective_retry_attempts(), 1);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: GatewaySettings = serde_json::from_value(json!({
            "port": 9000,
            "methodAllowlist": ["user.getById", {"pattern": "^cart\\."}],
            "methodRateLimits": {"cart.checkout": 1}
        }))
        .unwrap();
        assert_eq!(s.port, 9000);
        assert_eq!(s.host, "127.0.0.1");
        assert_eq!(s.method_allowlist.len(), 2);
        assert_eq!(s.method_rate_limits["cart.checkout"], 1);
    }
}
