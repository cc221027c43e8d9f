use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bus::{Bus, BusError, BusMessage};
use crate::channel::ChannelScheme;

/// Owns this process's bus subscriptions, keyed by refcounts over local
/// membership.
///
/// Room channels are refcounted by room occupancy: a 0->1 transition
/// subscribes, 1->0 unsubscribes. Namespace channels (for whole-namespace
/// broadcasts) follow the set of connection ids present in the namespace,
/// so a repeated `connected` for the same id cannot inflate the count.
///
/// On a bus failure the refcount is kept, not rolled back - local membership
/// truth must not depend on bus reachability. A stale subscription only costs
/// extra filtered deliveries; a missing count would lose them.
///
/// Not internally synchronized; the adapter serializes calls together with
/// the room registry so refcount transitions stay atomic.
pub struct SubscriptionManager {
    scheme: ChannelScheme,
    bus: Arc<dyn Bus>,
    inbox: mpsc::UnboundedSender<BusMessage>,
    room_refs: HashMap<(String, String), usize>,
    // namespace -> connection ids present in it
    namespace_presence: HashMap<String, HashSet<String>>,
}

impl SubscriptionManager {
    pub fn new(
        scheme: ChannelScheme,
        bus: Arc<dyn Bus>,
        inbox: mpsc::UnboundedSender<BusMessage>,
    ) -> Self {
        Self {
            scheme,
            bus,
            inbox,
            room_refs: HashMap::new(),
            namespace_presence: HashMap::new(),
        }
    }

    /// A local connection joined a room; subscribe on the 0->1 transition.
    pub async fn on_join(&mut self, namespace: &str, room: &str) -> Result<(), BusError> {
        let key = (namespace.to_string(), room.to_string());
        let count = self.room_refs.entry(key).or_insert(0);
        *count += 1;
        if *count == 1 {
            let channel = self.scheme.room_channel(namespace, room);
            debug!(channel = %channel, "First room member, subscribing");
            self.bus.subscribe(&channel, self.inbox.clone()).await?;
        }
        Ok(())
    }

    /// A local connection left a room; unsubscribe on the 1->0 transition.
    /// Calls without a tracked refcount are ignored rather than driven below
    /// zero; the registry's idempotent leave keeps the pairing 1:1 with real
    /// membership transitions.
    pub async fn on_leave(&mut self, namespace: &str, room: &str) -> Result<(), BusError> {
        let key = (namespace.to_string(), room.to_string());
        let Some(count) = self.room_refs.get_mut(&key) else {
            warn!(
                namespace = %namespace,
                room = %room,
                "Ignoring leave for untracked room subscription"
            );
            return Ok(());
        };
        *count -= 1;
        if *count > 0 {
            return Ok(());
        }
        self.room_refs.remove(&key);
        let channel = self.scheme.room_channel(namespace, room);
        debug!(channel = %channel, "Last room member gone, unsubscribing");
        self.bus.unsubscribe(&channel).await
    }

    /// A connection arrived in a namespace; the namespace channel stays
    /// subscribed as long as any connection exists in it. Presence is keyed
    /// by connection id, so announcing the same connection twice is a no-op.
    pub async fn on_connected(
        &mut self,
        namespace: &str,
        connection_id: &str,
    ) -> Result<(), BusError> {
        let present = self
            .namespace_presence
            .entry(namespace.to_string())
            .or_default();
        if !present.insert(connection_id.to_string()) {
            warn!(
                namespace = %namespace,
                connection_id = %connection_id,
                "Ignoring duplicate connected announcement"
            );
            return Ok(());
        }
        if present.len() == 1 {
            let channel = self.scheme.namespace_channel(namespace);
            debug!(channel = %channel, "First namespace connection, subscribing");
            self.bus.subscribe(&channel, self.inbox.clone()).await?;
        }
        Ok(())
    }

    /// A connection left a namespace; unsubscribe its channel when the last
    /// one disconnects. A disconnect for an unknown connection is ignored.
    pub async fn on_disconnected(
        &mut self,
        namespace: &str,
        connection_id: &str,
    ) -> Result<(), BusError> {
        let Some(present) = self.namespace_presence.get_mut(namespace) else {
            warn!(
                namespace = %namespace,
                "Ignoring disconnect for untracked namespace subscription"
            );
            return Ok(());
        };
        if !present.remove(connection_id) {
            warn!(
                namespace = %namespace,
                connection_id = %connection_id,
                "Ignoring disconnect for unknown connection"
            );
            return Ok(());
        }
        if !present.is_empty() {
            return Ok(());
        }
        self.namespace_presence.remove(namespace);
        let channel = self.scheme.namespace_channel(namespace);
        debug!(channel = %channel, "Last namespace connection gone, unsubscribing");
        self.bus.unsubscribe(&channel).await
    }
}
