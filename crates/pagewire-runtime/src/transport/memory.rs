//! Channel-backed transport for tests and custom bridges.

use std::sync::atomic::{AtomicBool, Ordering};

use pagewire_protocol::{Envelope, parse_envelope};
use tokio::sync::mpsc;

use super::{ConnectionState, Incoming, Transport, TransportEvent};
use crate::errors::TransportError;

/// In-process transport. The other end is a [`MemoryPeer`].
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
}

/// The gateway side of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryPeer {
    from_runtime: mpsc::UnboundedReceiver<String>,
    to_runtime: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryTransport {
    /// Open a connected transport, its event stream, and the peer end.
    pub fn pair() -> (Self, Incoming, MemoryPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let _ = ev_tx.send(TransportEvent::State(ConnectionState::Open));
        let transport = Self {
            outbound: out_tx,
            events: ev_tx.clone(),
            closed: AtomicBool::new(false),
        };
        let peer = MemoryPeer {
            from_runtime: out_rx,
            to_runtime: ev_tx,
        };
        (transport, ev_rx, peer)
    }

    /// Whether [`close`](Transport::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Transport for MemoryTransport {
    fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let text = envelope.to_json()?;
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self
                .events
                .send(TransportEvent::State(ConnectionState::Closed));
        }
    }
}

impl MemoryPeer {
    /// Deliver an envelope to the runtime.
    pub fn send(&self, envelope: impl Into<Envelope>) -> Result<(), TransportError> {
        let text = envelope.into().to_json()?;
        self.send_text(text)
    }

    /// Deliver a raw frame to the runtime, valid or not.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.to_runtime
            .send(TransportEvent::Frame(text.into()))
            .map_err(|_| TransportError::Closed)
    }

    /// Report a terminal failure to the runtime.
    pub fn fail(&self, error: TransportError) {
        let _ = self.to_runtime.send(TransportEvent::Failed(error));
    }

    /// Next raw frame the runtime sent.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_runtime.recv().await
    }

    /// Next frame the runtime sent, parsed. Invalid frames are skipped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        while let Some(text) = self.from_runtime.recv().await {
            if let Ok(env) = parse_envelope(&text) {
                return Some(env);
            }
        }
        None
    }

    /// A frame the runtime already sent, without waiting.
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.from_runtime.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewire_protocol::EventEnvelope;
    use serde_json::json;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (transport, mut incoming, mut peer) = MemoryTransport::pair();
        assert_eq!(
            incoming.recv().await,
            Some(TransportEvent::State(ConnectionState::Open))
        );

        let event = EventEnvelope::new("tab", "cart.updated", json!({"count": 1}));
        transport.send(&event.clone().into()).unwrap();
        assert_eq!(peer.recv().await, Some(Envelope::Event(event)));

        peer.send_text("not json").unwrap();
        assert_eq!(
            incoming.recv().await,
            Some(TransportEvent::Frame("not json".into()))
        );
    }

    #[tokio::test]
    async fn closed_transport_refuses_sends() {
        let (transport, mut incoming, _peer) = MemoryTransport::pair();
        let _ = incoming.recv().await;
        transport.close();
        transport.close();
        assert_eq!(
            incoming.recv().await,
            Some(TransportEvent::State(ConnectionState::Closed))
        );
        let event = EventEnvelope::new("tab", "t", json!(null));
        assert_eq!(
            transport.send(&event.into()),
            Err(TransportError::Closed)
        );
    }
}
