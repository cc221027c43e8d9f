use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Errors from the underlying pub/sub bus.
///
/// A bus failure never invalidates local membership bookkeeping; the
/// triggering mutation is kept and the error is reported to the caller.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish to {channel:?} failed: {reason}")]
    Publish { channel: String, reason: String },

    #[error("subscribe to {channel:?} failed: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("unsubscribe from {channel:?} failed: {reason}")]
    Unsubscribe { channel: String, reason: String },
}

/// One message received from the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub bytes: Vec<u8>,
}

/// Client handle onto the shared pub/sub bus, one per process.
///
/// The bus is assumed to deliver a published message to every current
/// subscriber of the channel - including, potentially, the publisher
/// itself. The adapter suppresses those self-loops by origin id.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish bytes to a channel.
    async fn publish(&self, channel: &str, bytes: Vec<u8>) -> Result<(), BusError>;

    /// Subscribe to a channel; matching messages are pushed into `inbox`.
    async fn subscribe(
        &self,
        channel: &str,
        inbox: mpsc::UnboundedSender<BusMessage>,
    ) -> Result<(), BusError>;

    /// Drop this client's subscription to a channel.
    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError>;
}

/// In-process bus hub for development and testing.
///
/// Each participating process takes its own [`InMemoryBusClient`] handle via
/// [`InMemoryBusHub::client`]. Publishes fan out to every subscribed client,
/// the publisher included, matching the echo behavior of a real bus.
pub struct InMemoryBusHub {
    // channel -> client id -> inbox
    subscribers: RwLock<HashMap<String, HashMap<Uuid, mpsc::UnboundedSender<BusMessage>>>>,
}

impl InMemoryBusHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
        })
    }

    /// Creates a client handle bound to this hub.
    pub fn client(self: &Arc<Self>) -> InMemoryBusClient {
        InMemoryBusClient {
            id: Uuid::new_v4(),
            hub: Arc::clone(self),
        }
    }

    /// Number of live subscriptions on a channel. Mirrors the subscriber
    /// introspection diagnostic tooling runs against a real bus.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let subscribers = self.subscribers.read().await;
        subscribers
            .get(channel)
            .map(|inboxes| inboxes.values().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

/// Per-process handle onto an [`InMemoryBusHub`].
pub struct InMemoryBusClient {
    id: Uuid,
    hub: Arc<InMemoryBusHub>,
}

#[async_trait]
impl Bus for InMemoryBusClient {
    async fn publish(&self, channel: &str, bytes: Vec<u8>) -> Result<(), BusError> {
        let subscribers = self.hub.subscribers.read().await;
        if let Some(inboxes) = subscribers.get(channel) {
            let message = BusMessage {
                channel: channel.to_string(),
                bytes,
            };
            for inbox in inboxes.values() {
                // A closed inbox means the subscriber is gone; skip it.
                let _ = inbox.send(message.clone());
            }
            debug!(channel = %channel, receivers = inboxes.len(), "Bus message published");
        } else {
            debug!(channel = %channel, "Bus message published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        inbox: mpsc::UnboundedSender<BusMessage>,
    ) -> Result<(), BusError> {
        let mut subscribers = self.hub.subscribers.write().await;
        subscribers
            .entry(channel.to_string())
            .or_default()
            .insert(self.id, inbox);
        debug!(channel = %channel, client = %self.id, "Subscribed to bus channel");
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        let mut subscribers = self.hub.subscribers.write().await;
        if let Some(inboxes) = subscribers.get_mut(channel) {
            inboxes.remove(&self.id);
            // Absence of a key is the unsubscribed state; never keep an
            // empty entry around.
            if inboxes.is_empty() {
                subscribers.remove(channel);
            }
        }
        debug!(channel = %channel, client = %self.id, "Unsubscribed from bus channel");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers_including_publisher() {
        let hub = InMemoryBusHub::new();
        let publisher = hub.client();
        let other = hub.client();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        publisher.subscribe("chan", tx_a).await.unwrap();
        other.subscribe("chan", tx_b).await.unwrap();

        publisher.publish("chan", b"payload".to_vec()).await.unwrap();

        let echoed = rx_a.recv().await.unwrap();
        let delivered = rx_b.recv().await.unwrap();
        assert_eq!(echoed.bytes, b"payload");
        assert_eq!(delivered.channel, "chan");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_drops_count_to_zero() {
        let hub = InMemoryBusHub::new();
        let client = hub.client();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client.subscribe("chan", tx).await.unwrap();
        assert_eq!(hub.subscriber_count("chan").await, 1);

        client.unsubscribe("chan").await.unwrap();
        assert_eq!(hub.subscriber_count("chan").await, 0);

        client.publish("chan", b"late".to_vec()).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn clients_only_receive_channels_they_subscribed_to() {
        let hub = InMemoryBusHub::new();
        let publisher = hub.client();
        let subscriber = hub.client();

        let (tx, mut rx) = mpsc::unbounded_channel();
        subscriber.subscribe("chan-a", tx).await.unwrap();

        publisher.publish("chan-b", b"other".to_vec()).await.unwrap();
        assert!(rx.try_recv().is_err());

        publisher.publish("chan-a", b"mine".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().bytes, b"mine");
    }
}
