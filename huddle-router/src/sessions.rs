//! Per-user connection registry.
//!
//! A user may hold several simultaneous connections (tabs, devices).
//! Each gets its own connection id and writer channel; registration
//! accumulates rather than replaces, and routing fans out to every
//! connection a user currently holds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use tokio::sync::{RwLock, mpsc};

/// Registry mapping user ids to their active connections.
pub struct SessionRegistry {
    /// user id -> connection id -> writer channel.
    connections: RwLock<HashMap<String, HashMap<u64, mpsc::UnboundedSender<Message>>>>,
    /// Allocator for connection ids, unique across all users.
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection for `user_id`, returning its
    /// connection id.
    pub async fn register(&self, user_id: &str, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut conns = self.connections.write().await;
        conns
            .entry(user_id.to_string())
            .or_default()
            .insert(conn_id, sender);
        conn_id
    }

    /// Removes one connection. Returns `true` if it was registered.
    pub async fn unregister(&self, user_id: &str, conn_id: u64) -> bool {
        let mut conns = self.connections.write().await;
        let Some(user_conns) = conns.get_mut(user_id) else {
            return false;
        };
        let removed = user_conns.remove(&conn_id).is_some();
        if user_conns.is_empty() {
            conns.remove(user_id);
        }
        removed
    }

    /// Writer channels for every connection `user_id` currently holds.
    pub async fn senders_for(&self, user_id: &str) -> Vec<mpsc::UnboundedSender<Message>> {
        let conns = self.connections.read().await;
        conns
            .get(user_id)
            .map(|user_conns| user_conns.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Writer channel for one specific connection, if still registered.
    pub async fn sender_for(
        &self,
        user_id: &str,
        conn_id: u64,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        let conns = self.connections.read().await;
        conns.get(user_id).and_then(|c| c.get(&conn_id)).cloned()
    }

    /// Number of active connections for `user_id`.
    pub async fn connection_count(&self, user_id: &str) -> usize {
        let conns = self.connections.read().await;
        conns.get(user_id).map_or(0, |user_conns| user_conns.len())
    }

    /// Send a WebSocket Close frame to every connected peer.
    ///
    /// Each writer task forwards the close frame, so clients observe a
    /// server-initiated disconnect. Used for graceful shutdown and for
    /// exercising client reconnection in tests.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (user_id, user_conns) in conns.iter() {
            for sender in user_conns.values() {
                tracing::info!(user = %user_id, "sending close frame");
                let _ = sender.send(Message::Close(None));
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
