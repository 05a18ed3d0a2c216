//! Matches response envelopes back to waiting callers by request id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use pagewire_protocol::{Envelope, ProtocolError, RequestEnvelope, RequestType, ResponseEnvelope};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::GatewayError;
use crate::session::SessionConnection;

type PendingTx = oneshot::Sender<Result<Value, GatewayError>>;

struct PendingRequest {
    request_type: RequestType,
    session_id: String,
    method: Option<String>,
    started_at: Instant,
    tx: PendingTx,
}

/// Removes its request from the pending map when the waiting future ends,
/// however it ends. Removing an already resolved id is a no-op.
struct PendingEntry<'a> {
    pending: &'a Mutex<HashMap<String, PendingRequest>>,
    request_id: &'a str,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if self.pending.lock().remove(self.request_id).is_some() {
            debug!(request_id = %self.request_id, "pending request released");
        }
    }
}

/// Outstanding requests keyed by request id.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Send one request over `conn` and wait for its response or the timeout.
    pub async fn request(
        &self,
        conn: &SessionConnection,
        request_type: RequestType,
        payload: Map<String, Value>,
        timeout: Duration,
        method: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let envelope = RequestEnvelope::new(conn.session_id.clone(), request_type, payload);
        let request_id = envelope.request_id.clone();
        let text = Envelope::Request(envelope).to_json()?;

        let (tx, rx) = oneshot::channel();
        let _ = self.pending.lock().insert(
            request_id.clone(),
            PendingRequest {
                request_type,
                session_id: conn.session_id.clone(),
                method: method.map(str::to_owned),
                started_at: Instant::now(),
                tx,
            },
        );
        let _entry = PendingEntry {
            pending: &self.pending,
            request_id: &request_id,
        };

        if !conn.send(text) {
            return Err(GatewayError::Send {
                session_id: conn.session_id.clone(),
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::Stopped),
            Err(_) => {
                debug!(%request_id, %request_type, ?method, "request timed out");
                Err(GatewayError::Timeout {
                    request_type,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Deliver a response received on `from_session`'s socket.
    ///
    /// Unknown ids, foreign sessions, and type mismatches are dropped and
    /// leave any pending entry untouched. Returns whether a caller was woken.
    pub fn resolve(&self, response: ResponseEnvelope, from_session: &str) -> bool {
        let pending = {
            let mut map = self.pending.lock();
            let matches = match map.get(&response.request_id) {
                None => {
                    debug!(request_id = %response.request_id, "response for unknown request dropped");
                    false
                }
                Some(p) if p.session_id != from_session => {
                    debug!(request_id = %response.request_id, from_session, "response from foreign session dropped");
                    false
                }
                Some(p) if p.request_type != response.request_type => {
                    debug!(
                        request_id = %response.request_id,
                        expected = %p.request_type,
                        got = %response.request_type,
                        "response type mismatch dropped"
                    );
                    false
                }
                Some(_) => true,
            };
            if !matches {
                return false;
            }
            map.remove(&response.request_id)
        };
        let Some(pending) = pending else {
            return false;
        };

        debug!(
            request_id = %response.request_id,
            method = ?pending.method,
            elapsed_ms = pending.started_at.elapsed().as_millis(),
            success = response.success,
            "response correlated"
        );
        let result = if response.success {
            Ok(response.payload.unwrap_or(Value::Null))
        } else {
            Err(GatewayError::Remote(
                response.error.unwrap_or_else(ProtocolError::unknown),
            ))
        };
        let _ = pending.tx.send(result);
        true
    }

    /// Reject every pending request. Returns how many were rejected.
    pub fn reject_all(&self, make_err: impl Fn() -> GatewayError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, p) in drained {
            let _ = p.tx.send(Err(make_err()));
        }
        count
    }

    /// Reject the pending requests of one session.
    pub fn reject_session(&self, session_id: &str, make_err: impl Fn() -> GatewayError) -> usize {
        let drained: Vec<_> = {
            let mut map = self.pending.lock();
            let ids: Vec<String> = map
                .iter()
                .filter(|(_, p)| p.session_id == session_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| map.remove(&id)).collect()
        };
        let count = drained.len();
        for p in drained {
            let _ = p.tx.send(Err(make_err()));
        }
        count
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
