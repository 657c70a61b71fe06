//! Error types. Protocol errors are drop reasons: the inbound path never answers them.

/// Reason an inbound frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame length {0} does not match the fixed frame size")]
    WrongLength(usize),
    #[error("protocol version {0} not supported")]
    VersionMismatch(u8),
    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),
    #[error("frame is for another room")]
    RoomMismatch,
    #[error("message authentication failed")]
    MacInvalid,
    #[error("sequence number {0} rejected by replay window")]
    ReplayDetected(u32),
    #[error("control frame received while unpaired")]
    NotPaired,
    #[error("control frame from an address other than the bound peer")]
    ForeignPeer,
    #[error("shared state busy; frame skipped")]
    StateBusy,
}

/// Send or peer-registration failure reported by the host transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    Send(String),
    #[error("peer registration failed: {0}")]
    RegisterPeer(String),
    #[error("no route to peer {0}")]
    UnknownPeer(crate::protocol::HwAddr),
}

/// Durable store failure. In-memory state stays authoritative when a write fails.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored value for `{key}` is malformed")]
    Malformed { key: &'static str },
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomIdError {
    #[error("room id is empty")]
    Empty,
    #[error("room id is {len} bytes; at most {max} allowed")]
    TooLong { len: usize, max: usize },
    #[error("room id contains a NUL byte")]
    InteriorNul,
}

/// Transport-level link encryption failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkCryptoError {
    #[error("sealed frame too short")]
    Truncated,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

/// Failure of a command issued through the node command surface.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    RoomId(#[from] RoomIdError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("shared state busy; command not applied")]
    StateBusy,
}
