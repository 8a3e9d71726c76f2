use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use livenb_core::protocol::GroupKey;
use livenb_core::types::Timestamp;
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// One attached WebSocket connection.
pub struct WsConnection {
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    pub connected_at: Timestamp,
}

/// Process-local pub/sub fan-out keyed by group name.
///
/// A group is `"{role}-{notebook_id}-{session_id}"`. Delivery is
/// fire-and-forget: a send to a closed channel is skipped and the
/// connection is removed by its own receive loop.
pub struct GroupManager {
    groups: RwLock<HashMap<String, HashMap<String, WsConnection>>>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a connection to a group.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn join(&self, key: &GroupKey, conn_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            sender: tx,
            connected_at: chrono::Utc::now(),
        };
        self.groups
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(conn_id, conn);
        rx
    }

    /// Detach a connection. Empty groups are dropped.
    pub async fn leave(&self, key: &GroupKey, conn_id: &str) {
        let name = key.to_string();
        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(&name) {
            members.remove(conn_id);
            if members.is_empty() {
                groups.remove(&name);
            }
        }
    }

    /// Send `message` to every member of the group.
    ///
    /// Returns the number of members the message was handed to.
    pub async fn broadcast(&self, key: &GroupKey, message: Message) -> usize {
        let groups = self.groups.read().await;
        let Some(members) = groups.get(&key.to_string()) else {
            return 0;
        };
        members
            .values()
            .filter(|conn| conn.sender.send(message.clone()).is_ok())
            .count()
    }

    /// Broadcast a text frame.
    pub async fn broadcast_text(&self, key: &GroupKey, text: impl Into<String>) -> usize {
        self.broadcast(key, Message::Text(text.into().into())).await
    }

    pub async fn group_size(&self, key: &GroupKey) -> usize {
        self.groups
            .read()
            .await
            .get(&key.to_string())
            .map_or(0, HashMap::len)
    }

    /// Total number of attached connections across all groups.
    pub async fn connection_count(&self) -> usize {
        self.groups.read().await.values().map(HashMap::len).sum()
    }

    /// Send a Close frame to every connection, then clear all groups.
    pub async fn shutdown_all(&self) {
        let mut groups = self.groups.write().await;
        let count: usize = groups.values().map(HashMap::len).sum();
        for conn in groups.values().flat_map(HashMap::values) {
            let _ = conn.sender.send(Message::Close(None));
        }
        groups.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connection.
    pub async fn ping_all(&self) {
        let groups = self.groups.read().await;
        for conn in groups.values().flat_map(HashMap::values) {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for GroupManager {
    fn default() -> Self {
        Self::new()
    }
}
