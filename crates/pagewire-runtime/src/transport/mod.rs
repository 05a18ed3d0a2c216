//! Transport contract between the page runtime and the gateway.
//!
//! A transport sends envelopes and delivers inbound frames, state changes,
//! and a final failure on an [`Incoming`] channel.

pub mod memory;
pub mod websocket;

use pagewire_protocol::Envelope;
use tokio::sync::mpsc;

use crate::errors::TransportError;

pub use memory::{MemoryPeer, MemoryTransport};
pub use websocket::{ConnectOptions, ReconnectPolicy, WebSocketTransport};

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress.
    Connecting,
    /// Socket connected.
    Open,
    /// Waiting to retry.
    Reconnecting {
        /// Counts from 1.
        attempt: u32,
    },
    /// Close requested, close frame in flight.
    Closing,
    /// No socket and no further attempts.
    Closed,
}

/// Something a transport reports to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame, not yet validated.
    Frame(String),
    /// The connection moved to a new state.
    State(ConnectionState),
    /// Terminal failure. Nothing follows it.
    Failed(TransportError),
}

/// Receiving half handed out with every transport.
pub type Incoming = mpsc::UnboundedReceiver<TransportEvent>;

/// Outbound half of a transport.
pub trait Transport: Send + Sync {
    /// Queue one envelope. Envelopes queued while disconnected go out in
    /// order once the connection opens.
    fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Close for good. No reconnection follows.
    fn close(&self);
}
