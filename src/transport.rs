use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// The duplex connection layer the adapter delivers through.
///
/// Connections are owned by the transport; the adapter only ever handles
/// their ids. The transport invokes the adapter's `connected`, `disconnect`,
/// `join` and `leave` entry points as lifecycle and membership events arrive.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ids of every connection currently resident in a namespace.
    async fn connections_in(&self, namespace: &str) -> Vec<String>;

    /// Hand payload bytes to one local connection. Non-blocking from the
    /// adapter's perspective; delivery failures are the transport's concern.
    async fn send(&self, namespace: &str, connection_id: &str, payload: &[u8]);
}

/// In-memory transport for development and testing: each connection is an
/// unbounded channel the test side reads delivered payloads from.
pub struct InMemoryTransport {
    // namespace -> connection id -> outbound sender
    connections: RwLock<HashMap<String, HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_connection(
        &self,
        namespace: &str,
        connection_id: &str,
        sender: mpsc::UnboundedSender<Vec<u8>>,
    ) {
        let mut connections = self.connections.write().await;
        connections
            .entry(namespace.to_string())
            .or_default()
            .insert(connection_id.to_string(), sender);
    }

    pub async fn remove_connection(&self, namespace: &str, connection_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(in_namespace) = connections.get_mut(namespace) {
            in_namespace.remove(connection_id);
            if in_namespace.is_empty() {
                connections.remove(namespace);
            }
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connections_in(&self, namespace: &str) -> Vec<String> {
        let connections = self.connections.read().await;
        connections
            .get(namespace)
            .map(|in_namespace| in_namespace.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn send(&self, namespace: &str, connection_id: &str, payload: &[u8]) {
        let connections = self.connections.read().await;
        if let Some(sender) = connections
            .get(namespace)
            .and_then(|in_namespace| in_namespace.get(connection_id))
        {
            let _ = sender.send(payload.to_vec());
        } else {
            debug!(
                namespace = %namespace,
                connection_id = %connection_id,
                "Dropping delivery to unknown connection"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sends_reach_only_the_addressed_connection() {
        let transport = InMemoryTransport::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        transport.add_connection("/nsp", "a", tx_a).await;
        transport.add_connection("/nsp", "b", tx_b).await;

        transport.send("/nsp", "a", b"hi").await;

        assert_eq!(rx_a.recv().await.unwrap(), b"hi");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn enumeration_is_scoped_to_the_namespace() {
        let transport = InMemoryTransport::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        transport.add_connection("/nsp", "a", tx_a).await;
        transport.add_connection("/", "b", tx_b).await;

        let mut in_nsp = transport.connections_in("/nsp").await;
        in_nsp.sort();
        assert_eq!(in_nsp, vec!["a"]);
        assert_eq!(transport.connections_in("/other").await.len(), 0);
    }

    #[tokio::test]
    async fn removed_connections_no_longer_receive() {
        let transport = InMemoryTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.add_connection("/nsp", "a", tx).await;
        transport.remove_connection("/nsp", "a").await;

        transport.send("/nsp", "a", b"late").await;

        assert!(rx.try_recv().is_err());
        assert!(transport.connections_in("/nsp").await.is_empty());
    }
}
