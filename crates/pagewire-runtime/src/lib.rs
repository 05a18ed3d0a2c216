//! # pagewire-runtime
//!
//! The page side of the bridge. A [`PageRuntime`] holds the methods a page
//! exposes, answers `listMethods` / `invokeMethod` / subscription / `ping`
//! requests from the gateway, and publishes events to subscribed topics.
//!
//! - [`runtime`]: request handling, method management, events
//! - [`registry`]: registrations with identity-checked disposers
//! - [`method`]: the handler trait and registration builder
//! - [`bindings`]: explicit path tables for pre-existing page functions
//! - [`transport`]: the transport trait, a reconnecting WebSocket transport,
//!   and an in-memory transport

#![deny(unsafe_code)]

pub mod bindings;
pub mod errors;
pub mod method;
pub mod registry;
pub mod runtime;
pub mod transport;

pub use bindings::{BindingSpec, BindingTable};
pub use errors::{HandlerError, RuntimeError, TransportError};
pub use method::{
    ArgValidator, InvocationContext, MethodHandler, MethodRegistration, handler_fn, json_handler,
    qualified_name,
};
pub use registry::{CompositeDisposer, Disposer, MethodRegistry};
pub use runtime::{EventSubscription, PageRuntime};
pub use transport::{
    ConnectOptions, ConnectionState, Incoming, MemoryPeer, MemoryTransport, ReconnectPolicy,
    Transport, TransportEvent, WebSocketTransport,
};
