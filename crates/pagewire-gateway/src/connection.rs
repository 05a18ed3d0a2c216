//! Lifecycle of one accepted page socket, from registration to disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use pagewire_protocol::{Envelope, parse_envelope};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditOperation, AuditRecord, AuditStatus};
use crate::errors::GatewayError;
use crate::gateway::{CLOSE_GOING_AWAY, GatewayInner, PageEvent};
use crate::session::{Outbound, SessionConnection};

/// Interval between server-initiated Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of each session's outbound queue.
const OUTBOUND_CAPACITY: usize = 1024;

/// How long the writer gets to flush its close frame on shutdown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Identity of a connection that passed admission.
#[derive(Clone, Debug)]
pub struct Admitted {
    /// Resolved session id.
    pub session_id: String,
    /// Application id the page announced.
    pub app_id: Option<String>,
    /// `Origin` header of the upgrade request.
    pub origin: Option<String>,
}

/// Run a page session until its socket closes or the gateway stops.
#[instrument(skip_all, fields(session_id = %admitted.session_id))]
pub(crate) async fn run_session(socket: WebSocket, inner: Arc<GatewayInner>, admitted: Admitted) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);
    let conn = Arc::new(SessionConnection::new(
        admitted.session_id.clone(),
        admitted.app_id.clone(),
        admitted.origin.clone(),
        tx,
    ));
    let session_id = conn.session_id.clone();

    if let Some(previous) = inner.sessions.insert(conn.clone()) {
        info!(replaced = %previous.connection_id, "session re-registered by a new connection");
    }
    inner.audit(
        &AuditRecord::new(AuditOperation::Connect, AuditStatus::Ok)
            .session(Some(&session_id))
            .details(json!({
                "connectionId": conn.connection_id,
                "appId": conn.app_id,
                "origin": conn.origin,
            })),
    );

    // Outbound writer with periodic Ping frames.
    let shutdown = inner.shutdown.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(Outbound::Text(text)) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = ws_tx.send(close_message(code, &reason)).await;
                        break;
                    }
                    None => break,
                },
                () = shutdown.cancelled() => {
                    let _ = ws_tx.send(close_message(CLOSE_GOING_AWAY, "Gateway stopping")).await;
                    break;
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound frames.
    let shutdown = inner.shutdown.clone();
    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = shutdown.cancelled() => break,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!(error = %e, "socket error");
                inner.audit(
                    &AuditRecord::new(AuditOperation::Error, AuditStatus::Error)
                        .session(Some(&session_id))
                        .details(json!({ "reason": "socket", "message": e.to_string() })),
                );
                break;
            }
            None => break,
        };
        conn.touch();

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "non-UTF8 binary frame ignored");
                    continue;
                }
            },
            Message::Close(_) => {
                debug!("page sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        handle_text(&inner, &conn, &text);
    }

    if inner.shutdown.is_cancelled() {
        if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
            writer.abort();
        }
    } else {
        writer.abort();
    }

    if inner
        .sessions
        .remove_if_same(&session_id, &conn.connection_id)
    {
        info!("page disconnected");
        inner.audit(
            &AuditRecord::new(AuditOperation::Disconnect, AuditStatus::Ok)
                .session(Some(&session_id))
                .details(json!({ "connectionId": conn.connection_id })),
        );
        let _ = inner.rate_limiter.forget_session(&session_id);
        if inner.settings.fail_pending_on_disconnect {
            let failed = inner.correlator.reject_session(&session_id, || {
                GatewayError::SessionDisconnected {
                    session_id: session_id.clone(),
                }
            });
            if failed > 0 {
                info!(failed, "rejected pending requests of disconnected session");
            }
        }
    } else {
        debug!("superseded connection closed");
    }
}

/// Validate one inbound frame and route it.
fn handle_text(inner: &GatewayInner, conn: &SessionConnection, text: &str) {
    let envelope = match parse_envelope(text) {
        Ok(env) => env,
        Err(e) => {
            warn!(errors = ?e.errors, "dropping invalid envelope");
            inner.audit(
                &AuditRecord::new(AuditOperation::Error, AuditStatus::Error)
                    .session(Some(&conn.session_id))
                    .details(json!({ "reason": "invalid_envelope", "errors": e.errors })),
            );
            return;
        }
    };

    match envelope {
        Envelope::Response(resp) => {
            let _ = inner.correlator.resolve(resp, &conn.session_id);
        }
        Envelope::Event(event) => {
            inner.audit(
                &AuditRecord::new(AuditOperation::Event, AuditStatus::Ok)
                    .session(Some(&conn.session_id))
                    .details(json!({ "topic": event.topic })),
            );
            let _ = inner.events.send(PageEvent {
                session_id: conn.session_id.clone(),
                topic: event.topic,
                payload: event.payload,
                timestamp: event.timestamp,
            });
        }
        Envelope::Request(req) => {
            debug!(request_id = %req.request_id, "page-originated request ignored");
        }
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}
