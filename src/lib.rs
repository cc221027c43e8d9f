// Library crate for the roomcast distributed broadcast adapter
// This file exposes the public API for embedding servers and integration tests

pub mod adapter;
pub mod bus;
pub mod channel;
pub mod envelope;
pub mod registry;
pub mod shared;
pub mod subscription;
pub mod transport;

// Re-export commonly used types for easier access in tests
pub use adapter::RoomAdapter;
pub use bus::{Bus, BusError, BusMessage, InMemoryBusClient, InMemoryBusHub};
pub use channel::{ChannelScheme, ChannelTarget, DEFAULT_PREFIX, DELIMITER};
pub use envelope::{CodecError, Envelope};
pub use registry::RoomRegistry;
pub use shared::AdapterError;
pub use subscription::SubscriptionManager;
pub use transport::{InMemoryTransport, Transport};
