//! Streaming client registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Unique identifier for a streaming client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection id.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Set of connected clients and their outbound channels.
///
/// Each client has a bounded channel drained by its own writer task. A
/// client whose channel is full or closed has stopped keeping up and is
/// detached; it cannot back-pressure the publisher.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, mpsc::Sender<Arc<str>>>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client's outbound channel.
    pub fn register(&self, id: ConnectionId, sender: mpsc::Sender<Arc<str>>) {
        self.clients.insert(id, sender);
        debug!(%id, total = self.clients.len(), "client registered");
    }

    /// Removes a client; dropping its sender ends the writer task.
    pub fn unregister(&self, id: ConnectionId) {
        self.clients.remove(&id);
        debug!(%id, total = self.clients.len(), "client unregistered");
    }

    /// Returns the number of connected clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true when no clients are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Delivers one serialized message to every client, detaching those
    /// that fail the write.
    pub fn broadcast(&self, message: &Arc<str>) {
        let mut stale: Vec<ConnectionId> = Vec::new();

        for entry in &self.clients {
            if entry.value().try_send(Arc::clone(message)).is_err() {
                stale.push(*entry.key());
            }
        }

        for id in stale {
            debug!(%id, "detaching slow or closed client");
            self.unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let registry = ClientRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.register(ConnectionId::generate(), tx_a);
        registry.register(ConnectionId::generate(), tx_b);

        let message: Arc<str> = Arc::from("{\"type\":\"stats\"}");
        registry.broadcast(&message);

        assert_eq!(rx_a.recv().await.unwrap().as_ref(), message.as_ref());
        assert_eq!(rx_b.recv().await.unwrap().as_ref(), message.as_ref());
    }

    #[tokio::test]
    async fn test_slow_client_detached() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = ConnectionId::generate();
        registry.register(id, tx);

        let message: Arc<str> = Arc::from("payload");
        registry.broadcast(&message);
        assert_eq!(registry.len(), 1, "first write fits the channel");

        registry.broadcast(&message);
        assert_eq!(registry.len(), 0, "full channel detaches the client");
    }

    #[tokio::test]
    async fn test_closed_client_detached() {
        let registry = ClientRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        registry.register(ConnectionId::generate(), tx);

        registry.broadcast(&Arc::from("payload"));
        assert!(registry.is_empty());
    }
}
