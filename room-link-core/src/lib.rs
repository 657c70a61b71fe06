//! Room link protocol: a door (access-control) node and a room power node, paired over a
//! short-range datagram link with authenticated fixed-size frames.
//! Host-driven: no I/O; hosts inject the transport, store, clock, sensor and relay.

pub mod dispatch;
pub mod error;
pub mod host;
pub mod initiator;
pub mod keys;
pub mod node;
pub mod pairing;
pub mod power;
pub mod protocol;
pub mod responder;
pub mod sequence;
pub mod state;
pub mod store;
pub mod wire;

#[cfg(test)]
mod testing;

pub use dispatch::{MessageDispatcher, Outbound, Routed};
pub use error::{
    CommandError, LinkCryptoError, PersistenceError, ProtocolError, RoomIdError, TransportError,
};
pub use host::{
    Clock, CredentialVerifier, KeyValueStore, MemoryStore, PowerRelay, PresenceSensor, SystemClock,
    Transport,
};
pub use initiator::InitiatorNode;
pub use keys::{derive_link_key, open_link, seal_link, LinkKey, SharedSecret};
pub use node::{NodeConfig, PairingStatusReport};
pub use power::{PowerPhase, RoomPowerController, RoomPowerState};
pub use protocol::{HwAddr, MessageType, RoomId, PROTOCOL_VERSION};
pub use responder::ResponderNode;
pub use state::{NodeSnapshot, NodeState, SharedNodeState};
pub use wire::{WireMessage, FRAME_LEN};
