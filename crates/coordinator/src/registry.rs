//! Active connection registry
//!
//! Maps each live connection's identifier to its outbox, the single place a
//! result addressed to that connection can be delivered. Owned by the
//! multiplexer; entries exist exactly as long as the connection does.

use parking_lot::RwLock;
use quill_common::METRICS;
use quill_proto::ConnectionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Receiving half of a connection's outbox
pub type Outbox = mpsc::UnboundedReceiver<String>;

/// Registry of live connections
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<String>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection under a fresh identifier
    pub fn register(&self) -> (ConnectionId, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut connections = self.connections.write();

        let mut id = ConnectionId::generate();
        while connections.contains_key(&id) {
            id = ConnectionId::generate();
        }
        connections.insert(id, tx);

        METRICS.coordinator.active_connections.set(connections.len() as i64);
        (id, rx)
    }

    /// Remove a connection; returns whether it was registered
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let removed = connections.remove(id).is_some();
        METRICS.coordinator.active_connections.set(connections.len() as i64);
        removed
    }

    /// Queue `payload` on the outbox of `id`.
    ///
    /// Returns `false` when the connection is gone; the payload is dropped.
    pub fn deliver(&self, id: &ConnectionId, payload: String) -> bool {
        match self.connections.read().get(id) {
            Some(outbox) => outbox.send(payload).is_ok(),
            None => false,
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

/// Unregisters its connection when dropped, whatever path the connection task exits by
pub struct ConnectionGuard {
    registry: ConnectionRegistry,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn new(registry: ConnectionRegistry, id: ConnectionId) -> Self {
        Self { registry, id }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.registry.unregister(&self.id) {
            info!("[ws disconnect] {} ({} connections)", self.id, self.registry.len());
        } else {
            debug!("Connection {} was already unregistered", self.id);
        }
    }
}
