//! HTTP surface: the WebSocket endpoint pages connect to, plus `/health`.

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::SinkExt;
use pagewire_protocol::{AUTH_SUBPROTOCOL_PREFIX, SUBPROTOCOL, new_request_id};
use pagewire_settings::GatewaySettings;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::connection::{Admitted, run_session};
use crate::gateway::GatewayInner;

/// Close code for a missing or wrong token.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Close code for an origin outside the allow-list.
pub const CLOSE_ORIGIN_REJECTED: u16 = 4003;
/// Header carrying the bearer token for non-browser clients.
pub const TOKEN_HEADER: &str = "x-pagewire-token";

/// Connection-establishment query parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Requested session id.
    pub session_id: Option<String>,
    /// Application id.
    pub app_id: Option<String>,
    /// Shared-secret token, when query tokens are allowed.
    pub token: Option<String>,
}

/// Why a connection was turned away.
#[derive(Debug, PartialEq, Eq)]
pub struct Rejection {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason sent to the page.
    pub reason: &'static str,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: &'static str,
    /// Seconds since the gateway started.
    pub uptime_secs: u64,
    /// Connected sessions.
    pub sessions: usize,
}

pub(crate) fn router(inner: Arc<GatewayInner>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(inner)
}

async fn health_handler(State(inner): State<Arc<GatewayInner>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: inner.started_at.elapsed().as_secs(),
        sessions: inner.sessions.len(),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(inner): State<Arc<GatewayInner>>,
) -> Response {
    let decision = admit(&inner.settings, &params, &headers);
    let ws = ws
        .protocols([SUBPROTOCOL])
        .max_message_size(inner.settings.max_payload_bytes);

    match decision {
        Ok(admitted) => ws
            .on_upgrade(move |socket| run_session(socket, inner, admitted))
            .into_response(),
        Err(rejection) => {
            warn!(
                code = rejection.code,
                reason = rejection.reason,
                session_id = ?params.session_id,
                "rejecting page connection"
            );
            ws.on_upgrade(move |mut socket| async move {
                let frame = CloseFrame {
                    code: rejection.code,
                    reason: rejection.reason.into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
            })
            .into_response()
        }
    }
}

/// Decide whether a connection may register, and under which session id.
pub fn admit(
    settings: &GatewaySettings,
    params: &ConnectParams,
    headers: &HeaderMap,
) -> Result<Admitted, Rejection> {
    if let Some(expected) = settings.auth_token.as_deref() {
        let presented = subprotocol_token(headers)
            .or_else(|| {
                params
                    .token
                    .clone()
                    .filter(|_| settings.allow_query_token)
            })
            .or_else(|| header_str(headers, TOKEN_HEADER).map(str::to_owned));
        if presented.as_deref() != Some(expected) {
            return Err(Rejection {
                code: CLOSE_UNAUTHORIZED,
                reason: "Unauthorized",
            });
        }
    }

    let origin = header_str(headers, "origin").map(str::to_owned);
    if !settings.allowed_origins.is_empty()
        && !origin
            .as_deref()
            .is_some_and(|o| settings.allowed_origins.iter().any(|a| a == o))
    {
        return Err(Rejection {
            code: CLOSE_ORIGIN_REJECTED,
            reason: "Origin not allowlisted",
        });
    }

    let session_id = params
        .session_id
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(new_request_id);
    info!(session_id, app_id = ?params.app_id, ?origin, "page connection admitted");
    Ok(Admitted {
        session_id,
        app_id: params.app_id.clone(),
        origin,
    })
}

/// Token from an `auth.<base64url>` entry of `Sec-WebSocket-Protocol`.
fn subprotocol_token(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "sec-websocket-protocol")?
        .split(',')
        .map(str::trim)
        .find_map(|p| p.strip_prefix(AUTH_SUBPROTOCOL_PREFIX))
        .and_then(|encoded| URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request, StatusCode};
    use tower::ServiceExt;

    fn secured() -> GatewaySettings {
        GatewaySettings {
            auth_token: Some("s3cret".into()),
            ..GatewaySettings::default()
        }
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            let _ = h.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        h
    }

    #[test]
    fn open_gateway_generates_session_id() {
        let a = admit(&GatewaySettings::default(), &ConnectParams::default(), &HeaderMap::new())
            .unwrap();
        assert!(!a.session_id.is_empty());
    }

    #[test]
    fn session_and_app_ids_from_query() {
        let params = ConnectParams {
            session_id: Some("checkout-tab".into()),
            app_id: Some("shop".into()),
            token: None,
        };
        let a = admit(&GatewaySettings::default(), &params, &HeaderMap::new()).unwrap();
        assert_eq!(a.session_id, "checkout-tab");
        assert_eq!(a.app_id.as_deref(), Some("shop"));
    }

    #[test]
    fn missing_token_is_unauthorized() {
        let err = admit(&secured(), &ConnectParams::default(), &HeaderMap::new()).unwrap_err();
        assert_eq!(err.code, CLOSE_UNAUTHORIZED);
    }

    #[test]
    fn subprotocol_token_accepted() {
        let encoded = URL_SAFE_NO_PAD.encode("s3cret");
        let h = headers(&[(
            "sec-websocket-protocol",
            &format!("{SUBPROTOCOL}, auth.{encoded}"),
        )]);
        assert!(admit(&secured(), &ConnectParams::default(), &h).is_ok());
    }

    #[test]
    fn query_token_respects_policy() {
        let params = ConnectParams {
            token: Some("s3cret".into()),
            ..ConnectParams::default()
        };
        assert!(admit(&secured(), &params, &HeaderMap::new()).is_ok());

        let strict = GatewaySettings {
            allow_query_token: false,
            ..secured()
        };
        assert_eq!(
            admit(&strict, &params, &HeaderMap::new()).unwrap_err().code,
            CLOSE_UNAUTHORIZED
        );
    }

    #[test]
    fn header_token_accepted_and_wrong_token_rejected() {
        let ok = headers(&[(TOKEN_HEADER, "s3cret")]);
        assert!(admit(&secured(), &ConnectParams::default(), &ok).is_ok());
        let bad = headers(&[(TOKEN_HEADER, "guess")]);
        assert!(admit(&secured(), &ConnectParams::default(), &bad).is_err());
    }

    #[test]
    fn origin_allowlist() {
        let settings = GatewaySettings {
            allowed_origins: vec!["https://shop.example".into()],
            ..GatewaySettings::default()
        };
        let good = headers(&[("origin", "https://shop.example")]);
        assert!(admit(&settings, &ConnectParams::default(), &good).is_ok());

        let bad = headers(&[("origin", "https://evil.example")]);
        let err = admit(&settings, &ConnectParams::default(), &bad).unwrap_err();
        assert_eq!(err.code, CLOSE_ORIGIN_REJECTED);
        assert!(admit(&settings, &ConnectParams::default(), &HeaderMap::new()).is_err());
    }

    #[tokio::test]
    async fn health_reports_sessions() {
        let gw = crate::Gateway::with_audit_sink(
            GatewaySettings::default(),
            Arc::new(|_: &crate::AuditRecord| {}),
        )
        .unwrap();
        let app = router(gw.inner_for_tests());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["sessions"], 0);
        assert!(parsed["uptimeSecs"].is_number());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let gw = crate::Gateway::with_audit_sink(
            GatewaySettings::default(),
            Arc::new(|_: &crate::AuditRecord| {}),
        )
        .unwrap();
        let resp = router(gw.inner_for_tests())
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
