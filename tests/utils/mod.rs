use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{timeout, Duration};

use roomcast::{InMemoryBusHub, InMemoryTransport, RoomAdapter, Transport};

/// One simulated server process: an adapter wired to its own transport and
/// its own client handle onto the shared bus hub.
pub struct ServerProcess {
    pub adapter: Arc<RoomAdapter>,
    pub transport: Arc<InMemoryTransport>,
}

impl ServerProcess {
    pub fn start(hub: &Arc<InMemoryBusHub>) -> Self {
        // Opt-in log output for debugging test runs: RUST_LOG=debug cargo test
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let transport = Arc::new(InMemoryTransport::new());
        let adapter = RoomAdapter::new(Arc::new(hub.client()), Arc::clone(&transport) as Arc<dyn Transport>);
        adapter.start();
        Self { adapter, transport }
    }

    /// Registers a connection with the transport and announces it to the
    /// adapter, returning the client's receive side.
    pub async fn connect(&self, namespace: &str, connection_id: &str) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        self.transport
            .add_connection(namespace, connection_id, tx)
            .await;
        self.adapter
            .connected(namespace, connection_id)
            .await
            .expect("connected should succeed");
        TestClient {
            namespace: namespace.to_string(),
            connection_id: connection_id.to_string(),
            rx,
        }
    }
}

/// The client-visible end of one connection.
pub struct TestClient {
    pub namespace: String,
    pub connection_id: String,
    rx: UnboundedReceiver<Vec<u8>>,
}

impl TestClient {
    pub async fn join(&self, server: &ServerProcess, room: &str) {
        server
            .adapter
            .join(&self.namespace, &self.connection_id, room)
            .await
            .expect("join should succeed");
    }

    pub async fn leave(&self, server: &ServerProcess, room: &str) {
        server
            .adapter
            .leave(&self.namespace, &self.connection_id, room)
            .await
            .expect("leave should succeed");
    }

    pub async fn disconnect(&self, server: &ServerProcess) {
        server
            .transport
            .remove_connection(&self.namespace, &self.connection_id)
            .await;
        server
            .adapter
            .disconnect(&self.namespace, &self.connection_id)
            .await
            .expect("disconnect should succeed");
    }

    /// Waits for the next delivered payload and asserts its content.
    pub async fn expect_payload(&mut self, expected: &[u8]) {
        let payload = timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "connection {:?} in {:?} expected a delivery but got none",
                    self.connection_id, self.namespace
                )
            })
            .expect("transport channel closed");
        assert_eq!(payload, expected);
    }

    /// Asserts no payload arrives within the propagation window.
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(payload)) = timeout(Duration::from_millis(150), self.rx.recv()).await {
            panic!(
                "connection {:?} in {:?} unexpectedly received {:?}",
                self.connection_id, self.namespace, payload
            );
        }
    }
}

pub fn except(ids: &[&str]) -> HashSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}
