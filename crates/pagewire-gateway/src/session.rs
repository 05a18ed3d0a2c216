//! Connected page sessions and the registry that owns them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;

/// Frames queued for a session's socket writer.
#[derive(Debug)]
pub enum Outbound {
    /// One serialized envelope.
    Text(String),
    /// Send a close frame and stop writing.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// One accepted page connection.
pub struct SessionConnection {
    /// Session key.
    pub session_id: String,
    /// Identity of this socket; distinguishes a reload from the socket it replaced.
    pub connection_id: String,
    /// Application id the page announced.
    pub app_id: Option<String>,
    /// `Origin` header of the upgrade request.
    pub origin: Option<String>,
    /// When the socket was admitted.
    pub connected_at: DateTime<Utc>,
    seq: u64,
    last_seen_at: Mutex<DateTime<Utc>>,
    tx: mpsc::Sender<Outbound>,
}

impl SessionConnection {
    /// Create a connection with a fresh connection id.
    pub fn new(
        session_id: String,
        app_id: Option<String>,
        origin: Option<String>,
        tx: mpsc::Sender<Outbound>,
    ) -> Self {
        static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);
        let now = Utc::now();
        Self {
            session_id,
            connection_id: uuid::Uuid::now_v7().to_string(),
            app_id,
            origin,
            connected_at: now,
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            last_seen_at: Mutex::new(now),
            tx,
        }
    }

    /// Queue a text frame. Returns `false` if the writer is full or gone.
    pub fn send(&self, text: String) -> bool {
        self.tx.try_send(Outbound::Text(text)).is_ok()
    }

    /// Ask the writer to close the socket.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.try_send(Outbound::Close {
            code,
            reason: reason.to_owned(),
        });
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_seen_at.lock() = Utc::now();
    }

    /// Time of the last inbound frame.
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        *self.last_seen_at.lock()
    }

    /// Snapshot for introspection.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            app_id: self.app_id.clone(),
            origin: self.origin.clone(),
            connected_at: self.connected_at,
            last_seen_at: self.last_seen_at(),
        }
    }
}

/// Serializable view of a [`SessionConnection`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session id.
    pub session_id: String,
    /// Application id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// Origin header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// When the socket was admitted.
    pub connected_at: DateTime<Utc>,
    /// Last inbound frame of any kind.
    pub last_seen_at: DateTime<Utc>,
}

/// One live connection per session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionConnection>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn`, returning the connection it replaced, if any.
    pub fn insert(&self, conn: Arc<SessionConnection>) -> Option<Arc<SessionConnection>> {
        self.sessions.write().insert(conn.session_id.clone(), conn)
    }

    /// Remove `session_id` only if it still maps to `connection_id`.
    pub fn remove_if_same(&self, session_id: &str, connection_id: &str) -> bool {
        let mut sessions = self.sessions.write();
        let same = sessions
            .get(session_id)
            .is_some_and(|c| c.connection_id == connection_id);
        if same {
            let _ = sessions.remove(session_id);
        }
        same
    }

    /// Look up a session.
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionConnection>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Connected session ids, oldest registration first.
    pub fn ids(&self) -> Vec<String> {
        let sessions = self.sessions.read();
        let mut conns: Vec<_> = sessions.values().collect();
        conns.sort_by_key(|c| c.seq);
        conns.into_iter().map(|c| c.session_id.clone()).collect()
    }

    /// Number of connected sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Remove and return every session.
    pub fn drain(&self) -> Vec<Arc<SessionConnection>> {
        self.sessions.write().drain().map(|(_, c)| c).collect()
    }
}
