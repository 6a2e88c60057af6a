//! Connection manager for WebSocket server
//!
//! Registry of live connections, used by the accept loop for admission
//! control and by applications for lookup and broadcast.

use crate::connection::ConnectionHandle;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Connection manager statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Total number of active connections
    pub active_connections: usize,
    /// Total number of connections since server start
    pub total_connections: u64,
    /// Peak number of concurrent connections
    pub peak_connections: usize,
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<u64, ConnectionHandle>,
    stats: ManagerStats,
}

/// Connection manager; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    inner: Arc<Mutex<Inner>>,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection
    pub async fn add(&self, handle: ConnectionHandle) {
        let mut inner = self.inner.lock().await;
        inner.connections.insert(handle.id(), handle);

        let active = inner.connections.len();
        let stats = &mut inner.stats;
        stats.active_connections = active;
        stats.total_connections += 1;
        stats.peak_connections = stats.peak_connections.max(active);
    }

    /// Deregister a connection
    pub async fn remove(&self, id: u64) -> Option<ConnectionHandle> {
        let mut inner = self.inner.lock().await;
        let removed = inner.connections.remove(&id);
        inner.stats.active_connections = inner.connections.len();
        removed
    }

    /// Get connection by ID
    pub async fn get(&self, id: u64) -> Option<ConnectionHandle> {
        self.inner.lock().await.connections.get(&id).cloned()
    }

    /// Get all active connections
    pub async fn all(&self) -> Vec<ConnectionHandle> {
        self.inner.lock().await.connections.values().cloned().collect()
    }

    /// Get current connection count
    pub async fn count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Get connection manager statistics
    pub async fn stats(&self) -> ManagerStats {
        self.inner.lock().await.stats.clone()
    }

    /// Queue `text` on every open connection, returning how many accepted it
    pub async fn broadcast_text(&self, text: &str) -> usize {
        self.all()
            .await
            .iter()
            .filter(|handle| handle.send_text(text).is_ok())
            .count()
    }

    /// Queue `data` on every open connection, returning how many accepted it
    pub async fn broadcast_binary(&self, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        self.all()
            .await
            .iter()
            .filter(|handle| handle.send_binary(data.clone()).is_ok())
            .count()
    }

    /// Start the close handshake on every connection
    pub async fn close_all(&self, code: u16, reason: &str) {
        for handle in self.all().await {
            let _ = handle.close(code, reason);
        }
    }
}
