//! Reconnecting WebSocket transport.
//!
//! A background driver task owns the socket. Outbound frames go through an
//! unbounded FIFO queue, so frames sent while disconnected are delivered in
//! order after the next successful open. After a drop the driver waits
//! `backoff * n` before the n-th reconnect; the counter resets on every open.
//! Once `max_attempts` reconnects have failed the transport gives up and
//! reports [`TransportError::ReconnectExhausted`].

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::{SinkExt, StreamExt};
use pagewire_protocol::{AUTH_SUBPROTOCOL_PREFIX, Envelope, SUBPROTOCOL};
use pagewire_settings::RuntimeSettings;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{ConnectionState, Incoming, Transport, TransportEvent};
use crate::errors::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where and as whom to connect.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Gateway URL, e.g. `ws://127.0.0.1:8787`.
    pub url: String,
    /// Sent as the `sessionId` query parameter.
    pub session_id: String,
    /// Sent as the `appId` query parameter.
    pub app_id: Option<String>,
    /// Sent as an `auth.` subprotocol entry.
    pub auth_token: Option<String>,
}

impl ConnectOptions {
    /// Options for `session_id` from runtime settings.
    pub fn from_settings(settings: &RuntimeSettings, session_id: impl Into<String>) -> Self {
        Self {
            url: settings.gateway_url.clone(),
            session_id: session_id.into(),
            app_id: settings.app_id.clone(),
            auth_token: settings.auth_token.clone(),
        }
    }

    /// Gateway URL with `sessionId` and `appId` query parameters.
    pub fn endpoint(&self) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| TransportError::Connect(format!("invalid gateway url {}: {e}", self.url)))?;
        {
            let mut query = url.query_pairs_mut();
            let _ = query.append_pair("sessionId", &self.session_id);
            if let Some(app_id) = &self.app_id {
                let _ = query.append_pair("appId", app_id);
            }
        }
        Ok(url)
    }

    /// `Sec-WebSocket-Protocol` value: the application subprotocol, plus
    /// `auth.<base64url token>` when a token is set.
    pub fn protocols(&self) -> String {
        match &self.auth_token {
            Some(token) => format!(
                "{SUBPROTOCOL}, {AUTH_SUBPROTOCOL_PREFIX}{}",
                URL_SAFE_NO_PAD.encode(token)
            ),
            None => SUBPROTOCOL.to_owned(),
        }
    }

    fn request(&self) -> Result<Request, TransportError> {
        let mut request = self
            .endpoint()?
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let protocols = HeaderValue::from_str(&self.protocols())
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let _ = request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocols);
        Ok(request)
    }
}

/// Linear reconnect backoff with a cap on attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts before giving up. Zero never retries.
    pub max_attempts: u32,
    /// Base delay, multiplied by the attempt number.
    pub backoff: Duration,
}

impl ReconnectPolicy {
    /// Policy from runtime settings.
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            max_attempts: settings.reconnect_attempts,
            backoff: Duration::from_millis(settings.effective_backoff_ms()),
        }
    }

    /// Delay before reconnect number `attempts_made + 1`, or `None` to give up.
    pub fn next_delay(&self, attempts_made: u32) -> Option<Duration> {
        (attempts_made < self.max_attempts).then(|| self.backoff * (attempts_made + 1))
    }
}

/// Transport over one persistent, automatically reconnected WebSocket.
#[derive(Debug)]
pub struct WebSocketTransport {
    queue: mpsc::UnboundedSender<String>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Start connecting in the background. Must run inside a Tokio runtime.
    pub fn connect(
        options: ConnectOptions,
        policy: ReconnectPolicy,
    ) -> Result<(Self, Incoming), TransportError> {
        // Reject a malformed URL before spawning.
        let _ = options.request()?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        let reporter = Reporter {
            state: state_tx,
            events: events_tx,
        };
        let driver = tokio::spawn(drive(options, policy, queue_rx, reporter, cancel.clone()));

        Ok((
            Self {
                queue: queue_tx,
                state: state_rx,
                cancel,
                driver,
            },
            events_rx,
        ))
    }

    /// Observe connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Whether the driver task has exited.
    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let text = envelope.to_json()?;
        self.queue.send(text).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Reporter {
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Reporter {
    fn state(&self, state: ConnectionState) {
        let _ = self.state.send_replace(state);
        let _ = self.events.send(TransportEvent::State(state));
    }

    fn frame(&self, text: String) {
        let _ = self.events.send(TransportEvent::Frame(text));
    }

    fn fail(&self, error: TransportError) {
        let _ = self.state.send_replace(ConnectionState::Closed);
        let _ = self.events.send(TransportEvent::Failed(error));
    }
}

enum PumpExit {
    /// Closed on purpose; stop.
    Closed,
    /// Connection lost; reconnect per policy.
    Dropped(String),
}

async fn drive(
    options: ConnectOptions,
    policy: ReconnectPolicy,
    mut queue: mpsc::UnboundedReceiver<String>,
    reporter: Reporter,
    cancel: CancellationToken,
) {
    let mut attempts: u32 = 0;
    // Frame whose write failed; goes out first on the next connection.
    let mut carry: Option<String> = None;

    loop {
        let request = match options.request() {
            Ok(request) => request,
            Err(e) => {
                reporter.fail(e);
                return;
            }
        };
        let connected = tokio::select! {
            result = connect_async(request) => result,
            () = cancel.cancelled() => break,
        };
        match connected {
            Ok((ws, _)) => {
                attempts = 0;
                info!(session_id = %options.session_id, "connected to gateway");
                reporter.state(ConnectionState::Open);
                match pump(ws, &mut queue, &reporter, &cancel, &mut carry).await {
                    PumpExit::Closed => break,
                    PumpExit::Dropped(reason) => warn!(reason, "gateway connection lost"),
                }
            }
            Err(e) => warn!(error = %e, attempts, "gateway connect failed"),
        }
        if cancel.is_cancelled() {
            break;
        }

        let Some(delay) = policy.next_delay(attempts) else {
            error!(attempts, "giving up on gateway connection");
            cancel.cancel();
            reporter.fail(TransportError::ReconnectExhausted { attempts });
            return;
        };
        attempts += 1;
        debug!(attempt = attempts, delay_ms = delay.as_millis(), "reconnecting");
        reporter.state(ConnectionState::Reconnecting { attempt: attempts });
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => break,
        }
    }

    reporter.state(ConnectionState::Closed);
}

async fn pump(
    ws: WsStream,
    queue: &mut mpsc::UnboundedReceiver<String>,
    reporter: &Reporter,
    cancel: &CancellationToken,
    carry: &mut Option<String>,
) -> PumpExit {
    let (mut sink, mut stream) = ws.split();

    if let Some(text) = carry.take() {
        if let Err(e) = sink.send(Message::Text(text.clone().into())).await {
            *carry = Some(text);
            return PumpExit::Dropped(e.to_string());
        }
    }

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                reporter.state(ConnectionState::Closing);
                let _ = sink.send(Message::Close(None)).await;
                return PumpExit::Closed;
            }
            outbound = queue.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.clone().into())).await {
                        *carry = Some(text);
                        return PumpExit::Dropped(e.to_string());
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return PumpExit::Closed;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => reporter.frame(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => reporter.frame(text),
                    Err(_) => debug!(len = data.len(), "non-UTF8 binary frame ignored"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map_or_else(
                        || "closed by gateway".to_owned(),
                        |f| format!("closed by gateway ({}: {})", u16::from(f.code), f.reason.as_str()),
                    );
                    return PumpExit::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpExit::Dropped(e.to_string()),
                None => return PumpExit::Dropped("stream ended".to_owned()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewire_protocol::{EventEnvelope, parse_envelope};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{
        ErrorResponse, Request as ServerRequest, Response as ServerResponse,
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn options(url: String) -> ConnectOptions {
        ConnectOptions {
            url,
            session_id: "checkout-tab".into(),
            app_id: Some("shop".into()),
            auth_token: None,
        }
    }

    #[test]
    fn linear_backoff_with_cap() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.next_delay(0), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(1500)));
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn zero_attempts_never_reconnects() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.next_delay(0), None);
    }

    #[test]
    fn policy_from_settings_clamps_backoff() {
        let settings = RuntimeSettings {
            reconnect_backoff_ms: 5,
            ..RuntimeSettings::default()
        };
        let policy = ReconnectPolicy::from_settings(&settings);
        assert_eq!(policy.backoff, Duration::from_millis(100));
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn endpoint_carries_identity() {
        let url = options("ws://127.0.0.1:8787/ws".into()).endpoint().unwrap();
        assert_eq!(url.query(), Some("sessionId=checkout-tab&appId=shop"));
    }

    #[test]
    fn token_travels_as_subprotocol() {
        let mut opts = options("ws://127.0.0.1:8787".into());
        assert_eq!(opts.protocols(), SUBPROTOCOL);
        opts.auth_token = Some("s3cret".into());
        let expected = format!("{SUBPROTOCOL}, auth.{}", URL_SAFE_NO_PAD.encode("s3cret"));
        assert_eq!(opts.protocols(), expected);
    }

    #[tokio::test]
    async fn malformed_url_fails_fast() {
        let err = WebSocketTransport::connect(options("not a url".into()), ReconnectPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        })
        .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let policy = ReconnectPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(10),
        };
        let (transport, mut incoming) =
            WebSocketTransport::connect(options(format!("ws://{addr}")), policy).unwrap();

        let mut seen = Vec::new();
        let failure = tokio::time::timeout(WAIT, async {
            loop {
                match incoming.recv().await {
                    Some(TransportEvent::State(s)) => seen.push(s),
                    Some(TransportEvent::Failed(e)) => return e,
                    other => panic!("unexpected {other:?}"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(failure, TransportError::ReconnectExhausted { attempts: 2 });
        assert_eq!(
            seen,
            vec![
                ConnectionState::Reconnecting { attempt: 1 },
                ConnectionState::Reconnecting { attempt: 2 },
            ]
        );
        assert_eq!(*transport.state().borrow(), ConnectionState::Closed);
        let event = EventEnvelope::new("checkout-tab", "t", json!(null));
        assert_eq!(transport.send(&event.into()), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn queued_frames_flush_in_order_on_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (uri_tx, uri_rx) = oneshot::channel::<String>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |req: &ServerRequest,
                                 mut resp: ServerResponse|
                  -> Result<ServerResponse, ErrorResponse> {
                let _ = uri_tx.send(req.uri().to_string());
                let _ = resp
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            let mut topics = Vec::new();
            while topics.len() < 3 {
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    if let Ok(Envelope::Event(e)) = parse_envelope(text.as_str()) {
                        topics.push(e.topic);
                    }
                }
            }
            topics
        });

        let policy = ReconnectPolicy {
            max_attempts: 0,
            backoff: Duration::from_millis(100),
        };
        let (transport, _incoming) =
            WebSocketTransport::connect(options(format!("ws://{addr}")), policy).unwrap();
        for topic in ["a", "b", "c"] {
            let event = EventEnvelope::new("checkout-tab", topic, json!(null));
            transport.send(&event.into()).unwrap();
        }

        let topics = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
        assert_eq!(topics, vec!["a", "b", "c"]);
        let uri = uri_rx.await.unwrap();
        assert!(uri.contains("sessionId=checkout-tab"), "{uri}");
    }

    #[tokio::test]
    async fn manual_close_suppresses_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let policy = ReconnectPolicy {
            max_attempts: 100,
            backoff: Duration::from_millis(50),
        };
        let (transport, mut incoming) =
            WebSocketTransport::connect(options(format!("ws://{addr}")), policy).unwrap();
        transport.close();

        let last = tokio::time::timeout(WAIT, async {
            let mut last = None;
            while let Some(event) = incoming.recv().await {
                assert!(!matches!(event, TransportEvent::Failed(_)));
                last = Some(event);
            }
            last
        })
        .await
        .unwrap();
        assert_eq!(last, Some(TransportEvent::State(ConnectionState::Closed)));
    }
}
