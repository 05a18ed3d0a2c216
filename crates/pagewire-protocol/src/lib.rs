//! # pagewire-protocol
//!
//! Shared vocabulary between the session gateway and the page runtime.
//!
//! - [`envelope`]: request / response / event envelopes and their constructors
//! - [`validation`]: structural validation of untrusted JSON before it is trusted
//! - [`types`]: request types, method descriptors, and per-type payloads
//! - [`errors`]: wire error codes and the `ProtocolError` body
//! - [`rules`]: exact-or-pattern method matching used by allow-lists

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod rules;
pub mod types;
pub mod validation;

pub use envelope::{Envelope, EventEnvelope, EventKind, RequestEnvelope, ResponseEnvelope};
pub use errors::ProtocolError;
pub use rules::{MethodMatcher, MethodRule};
pub use types::{MethodDescriptor, RequestType};
pub use validation::{ValidationError, parse_envelope, validate_envelope, validate_method_descriptors};

/// Protocol version both sides must agree on exactly.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Application subprotocol offered by the page runtime and echoed by the gateway.
pub const SUBPROTOCOL: &str = "pagewire.v1";

/// Prefix of the subprotocol entry carrying a base64url-encoded bearer token.
pub const AUTH_SUBPROTOCOL_PREFIX: &str = "auth.";

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Generate a fresh request / subscription identifier.
pub fn new_request_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
    }

    #[test]
    fn now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
