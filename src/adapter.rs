use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{Bus, BusError, BusMessage};
use crate::channel::{validate_identifier, ChannelScheme};
use crate::envelope::Envelope;
use crate::registry::RoomRegistry;
use crate::shared::AdapterError;
use crate::subscription::SubscriptionManager;
use crate::transport::Transport;

/// Registry and subscription refcounts behind one lock, so membership
/// mutations and their 0<->1 subscription transitions stay atomic under
/// concurrent join/leave/disconnect.
struct AdapterState {
    registry: RoomRegistry,
    subscriptions: SubscriptionManager,
}

/// The distributed broadcast adapter.
///
/// One adapter per server process. It tracks which local connections are in
/// which rooms, keeps the process subscribed to exactly the bus channels its
/// occupancy justifies, and relays broadcasts: local delivery through the
/// transport plus one envelope published to the bus for every other process.
/// Inbound bus messages are decoded, checked against this process's identity
/// to suppress echoes of its own publishes, and fanned out locally.
pub struct RoomAdapter {
    server_id: Uuid,
    scheme: ChannelScheme,
    bus: Arc<dyn Bus>,
    transport: Arc<dyn Transport>,
    state: Mutex<AdapterState>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<BusMessage>>>,
}

impl RoomAdapter {
    /// Creates an adapter with the default channel naming.
    pub fn new(bus: Arc<dyn Bus>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::with_scheme(bus, transport, ChannelScheme::default())
    }

    /// Creates an adapter with a caller-supplied channel naming override.
    pub fn with_scheme(
        bus: Arc<dyn Bus>,
        transport: Arc<dyn Transport>,
        scheme: ChannelScheme,
    ) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let subscriptions =
            SubscriptionManager::new(scheme.clone(), Arc::clone(&bus), inbox_tx);
        Arc::new(Self {
            server_id: Uuid::new_v4(),
            scheme,
            bus,
            transport,
            state: Mutex::new(AdapterState {
                registry: RoomRegistry::new(),
                subscriptions,
            }),
            inbox_rx: Mutex::new(Some(inbox_rx)),
        })
    }

    /// Identity attached to every envelope this process publishes.
    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    /// Starts the inbox pump - a background task draining bus messages into
    /// [`Self::on_message`]. Call once after construction.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            let receiver = adapter.inbox_rx.lock().await.take();
            let Some(mut receiver) = receiver else {
                warn!(server_id = %adapter.server_id, "Adapter inbox pump already started");
                return;
            };

            info!(server_id = %adapter.server_id, "Adapter inbox pump started");
            while let Some(message) = receiver.recv().await {
                adapter.on_message(&message.channel, &message.bytes).await;
            }
            warn!(server_id = %adapter.server_id, "Adapter inbox pump ended - no more messages");
        })
    }

    /// A connection arrived in a namespace. Invoked by the transport on its
    /// `connected` lifecycle event; keeps the namespace channel subscribed
    /// while any connection exists in the namespace.
    pub async fn connected(
        &self,
        namespace: &str,
        connection_id: &str,
    ) -> Result<(), AdapterError> {
        validate_identifier(namespace)?;
        validate_identifier(connection_id)?;

        let mut state = self.state.lock().await;
        state
            .subscriptions
            .on_connected(namespace, connection_id)
            .await?;
        Ok(())
    }

    /// Adds a connection to a room. The returned result is the completion
    /// signal: registry membership is updated first and survives a bus
    /// subscribe failure, which is reported here.
    pub async fn join(
        &self,
        namespace: &str,
        connection_id: &str,
        room: &str,
    ) -> Result<(), AdapterError> {
        validate_identifier(namespace)?;
        validate_identifier(connection_id)?;
        validate_identifier(room)?;

        let mut state = self.state.lock().await;
        if state.registry.join(namespace, connection_id, room) {
            state.subscriptions.on_join(namespace, room).await?;
        }
        Ok(())
    }

    /// Removes a connection from a room. Leaving a room never joined is a
    /// no-op; the subscription refcount only moves on real transitions.
    pub async fn leave(
        &self,
        namespace: &str,
        connection_id: &str,
        room: &str,
    ) -> Result<(), AdapterError> {
        validate_identifier(namespace)?;
        validate_identifier(connection_id)?;
        validate_identifier(room)?;

        let mut state = self.state.lock().await;
        if state.registry.leave(namespace, connection_id, room) {
            state.subscriptions.on_leave(namespace, room).await?;
        }
        Ok(())
    }

    /// A connection disconnected: leave every room it was in and release its
    /// namespace channel reference. Bus failures along the way are logged and
    /// the first one reported, but cleanup always runs to completion.
    pub async fn disconnect(
        &self,
        namespace: &str,
        connection_id: &str,
    ) -> Result<(), AdapterError> {
        validate_identifier(namespace)?;
        validate_identifier(connection_id)?;

        let mut state = self.state.lock().await;
        let vacated = state.registry.remove_connection(namespace, connection_id);
        debug!(
            namespace = %namespace,
            connection_id = %connection_id,
            vacated_rooms = vacated.len(),
            "Connection disconnected"
        );

        let mut first_error: Option<BusError> = None;
        for room in &vacated {
            if let Err(error) = state.subscriptions.on_leave(namespace, room).await {
                warn!(
                    namespace = %namespace,
                    room = %room,
                    error = %error,
                    "Bus unsubscribe failed during disconnect"
                );
                first_error.get_or_insert(error);
            }
        }
        if let Err(error) = state
            .subscriptions
            .on_disconnected(namespace, connection_id)
            .await
        {
            warn!(
                namespace = %namespace,
                error = %error,
                "Namespace channel release failed during disconnect"
            );
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Broadcasts a payload to a room, or to a whole namespace when `room`
    /// is `None`, skipping the excluded connection ids everywhere in the
    /// cluster.
    ///
    /// Local delivery is issued before the publish, so a connection can only
    /// ever see its own broadcast through the local path - which the
    /// exclusion set removes - never through the bus. A publish failure
    /// leaves the broadcast local-only and is reported.
    pub async fn broadcast(
        &self,
        namespace: &str,
        room: Option<&str>,
        except: &HashSet<String>,
        payload: &[u8],
    ) -> Result<(), AdapterError> {
        validate_identifier(namespace)?;
        if let Some(room) = room {
            validate_identifier(room)?;
        }
        for connection_id in except {
            validate_identifier(connection_id)?;
        }

        self.deliver_local(namespace, room, except, payload).await;

        let envelope = Envelope {
            namespace: namespace.to_string(),
            room: room.map(str::to_string),
            except: except.clone(),
            origin: self.server_id,
            payload: payload.to_vec(),
        };
        let channel = match room {
            Some(room) => self.scheme.room_channel(namespace, room),
            None => self.scheme.namespace_channel(namespace),
        };
        let bytes = envelope.encode()?;

        if let Err(error) = self.bus.publish(&channel, bytes).await {
            warn!(
                channel = %channel,
                error = %error,
                "Publish failed, broadcast degraded to local-only delivery"
            );
            return Err(error.into());
        }
        debug!(channel = %channel, "Broadcast published");
        Ok(())
    }

    /// Handles one message from the bus: decode, suppress self-loops, then
    /// deliver locally. Never republished - the originating process already
    /// put it on the bus once.
    async fn on_message(&self, channel: &str, bytes: &[u8]) {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(channel = %channel, error = %error, "Dropping undecodable bus message");
                return;
            }
        };

        if envelope.origin == self.server_id {
            debug!(channel = %channel, "Dropping echo of own broadcast");
            return;
        }

        // Defensive cross-check only; the envelope stays authoritative.
        if let Some(target) = self.scheme.parse(channel) {
            if target.namespace != envelope.namespace
                || target.room.as_deref() != envelope.room.as_deref()
            {
                debug!(
                    channel = %channel,
                    namespace = %envelope.namespace,
                    "Dropping bus message whose channel disagrees with its envelope"
                );
                return;
            }
        }

        self.deliver_local(
            &envelope.namespace,
            envelope.room.as_deref(),
            &envelope.except,
            &envelope.payload,
        )
        .await;
    }

    /// Resolves the local target set and hands the payload to the transport
    /// for each match.
    async fn deliver_local(
        &self,
        namespace: &str,
        room: Option<&str>,
        except: &HashSet<String>,
        payload: &[u8],
    ) {
        let targets = match room {
            Some(room) => {
                let state = self.state.lock().await;
                state.registry.members_of(namespace, room)
            }
            None => self.transport.connections_in(namespace).await,
        };

        let deliveries = targets
            .iter()
            .filter(|connection_id| !except.contains(connection_id.as_str()))
            .map(|connection_id| self.transport.send(namespace, connection_id, payload));
        futures::future::join_all(deliveries).await;
    }
}
