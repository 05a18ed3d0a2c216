//! # pagewire-gateway
//!
//! Server-side broker between external callers and live browser pages.
//!
//! Pages connect over WebSocket and register under a session id. Callers use
//! [`Gateway`] to list and invoke the methods those pages expose; each call is
//! correlated by request id, bounded by a timeout, retried when safe, rate
//! limited per `(session, method)`, and recorded in the audit trail.
//!
//! - [`gateway`]: the [`Gateway`] handle and its public operations
//! - [`server`]: axum router, admission (token and origin checks), `/health`
//! - [`connection`]: per-socket reader/writer tasks
//! - [`session`]: connected sessions and their registry
//! - [`correlator`]: pending requests awaiting responses
//! - [`rate_limit`], [`retry`]: local policy consulted before dispatch
//! - [`audit`]: structured audit records and sinks

#![deny(unsafe_code)]

pub mod audit;
pub mod connection;
pub mod correlator;
pub mod errors;
pub mod gateway;
pub mod rate_limit;
pub mod retry;
pub mod server;
pub mod session;

pub use audit::{AuditOperation, AuditRecord, AuditSink, AuditStatus, StdoutAuditSink};
pub use errors::GatewayError;
pub use gateway::{Gateway, PageEvent};
pub use session::SessionInfo;
