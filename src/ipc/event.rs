use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

/// Receiving end of a registered live session.
///
/// `targeted` carries events addressed to this session's identity;
/// `broadcasts` carries events addressed to everyone. Both deliver
/// ready-to-send JSON-RPC notification strings.
pub struct SessionHandle {
    pub id: Uuid,
    pub user_id: String,
    pub targeted: mpsc::UnboundedReceiver<String>,
    pub broadcasts: broadcast::Receiver<String>,
}

/// Delivers asynchronous events to live sessions.
///
/// Two delivery scopes: `broadcast` reaches every connected session;
/// `send_to_user` reaches only the sessions registered under one identity
/// (all of that identity's concurrently connected devices/tabs). Publish is
/// fire-and-forget — an event with no live recipient is dropped, and a
/// lagging broadcast subscriber skips messages rather than blocking the
/// publisher.
///
/// Owned by the process composition root and injected into the lifecycle
/// engine; there is no global registry.
pub struct EventFanout {
    broadcast_tx: broadcast::Sender<String>,
    sessions: RwLock<HashMap<String, HashMap<Uuid, mpsc::UnboundedSender<String>>>>,
}

impl Default for EventFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFanout {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            broadcast_tx,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn notification_json(method: &str, params: Value) -> String {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        serde_json::to_string(&notification).unwrap_or_default()
    }

    /// Send an event to all connected sessions.
    pub fn broadcast(&self, event: &str, params: Value) {
        // Ignore errors — no subscribers is fine
        let _ = self.broadcast_tx.send(Self::notification_json(event, params));
    }

    /// Send an event to every session registered for one identity.
    /// Silently drops the event if that identity has no live session.
    pub async fn send_to_user(&self, user_id: &str, event: &str, params: Value) {
        let sessions = self.sessions.read().await;
        if let Some(senders) = sessions.get(user_id) {
            let msg = Self::notification_json(event, params);
            for tx in senders.values() {
                // A closed receiver means the connection is tearing down;
                // unregister_session will reap it.
                let _ = tx.send(msg.clone());
            }
        }
    }

    /// Register a live session for `user_id`. The identity is fixed for the
    /// life of the session.
    pub async fn register_session(&self, user_id: &str) -> SessionHandle {
        let (tx, targeted) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.sessions
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert(id, tx);
        SessionHandle {
            id,
            user_id: user_id.to_string(),
            targeted,
            broadcasts: self.broadcast_tx.subscribe(),
        }
    }

    pub async fn unregister_session(&self, user_id: &str, session_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if let Some(senders) = sessions.get_mut(user_id) {
            senders.remove(&session_id);
            if senders.is_empty() {
                sessions.remove(user_id);
            }
        }
    }

    /// Total live sessions across all identities.
    pub async fn connected_sessions(&self) -> usize {
        self.sessions.read().await.values().map(HashMap::len).sum()
    }

    /// Subscribe to the broadcast scope without registering an identity.
    /// Used by tests to observe published events.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.broadcast_tx.subscribe()
    }
}
