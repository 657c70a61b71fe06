//! Framing: one fixed-size binary frame per datagram, authenticated with a truncated HMAC-SHA256.
//!
//! Layout (42 bytes):
//!
//! | offset | len | field     |
//! |--------|-----|-----------|
//! | 0      | 1   | version   |
//! | 1      | 16  | room id   |
//! | 17     | 1   | type      |
//! | 18     | 4   | seq       |
//! | 22     | 4   | timestamp |
//! | 26     | 8   | payload   |
//! | 34     | 8   | mac       |
//!
//! Integers are written in the native byte order of the node. Both nodes of a pair run on the
//! same architecture; the format is not portable across hosts with different endianness.

use hmac::Mac;

use crate::error::ProtocolError;
use crate::keys::SharedSecret;
use crate::protocol::{MessageType, RoomId, PAYLOAD_LEN, PROTOCOL_VERSION, ROOM_ID_LEN};

/// Truncated tag width (64-bit MAC).
pub const MAC_LEN: usize = 8;

const OFF_ROOM: usize = 1;
const OFF_TYPE: usize = OFF_ROOM + ROOM_ID_LEN;
const OFF_SEQ: usize = OFF_TYPE + 1;
const OFF_TIMESTAMP: usize = OFF_SEQ + 4;
const OFF_PAYLOAD: usize = OFF_TIMESTAMP + 4;
/// Bytes covered by the MAC.
pub const MAC_OFFSET: usize = OFF_PAYLOAD + PAYLOAD_LEN;
/// Exact size of every frame on the link.
pub const FRAME_LEN: usize = MAC_OFFSET + MAC_LEN;

/// Decoded frame. Constructed per send/receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub version: u8,
    pub room: RoomId,
    pub msg_type: MessageType,
    pub seq: u32,
    /// Epoch seconds; advisory only.
    pub timestamp: u32,
    pub payload: [u8; PAYLOAD_LEN],
    pub mac: [u8; MAC_LEN],
}

impl WireMessage {
    /// New frame at the current protocol version with an empty payload and no MAC yet.
    pub fn new(room: RoomId, msg_type: MessageType, seq: u32, timestamp: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            room,
            msg_type,
            seq,
            timestamp,
            payload: [0u8; PAYLOAD_LEN],
            mac: [0u8; MAC_LEN],
        }
    }

    pub fn with_payload(mut self, payload: [u8; PAYLOAD_LEN]) -> Self {
        self.payload = payload;
        self
    }

    /// Serialize all fields in the fixed layout.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[..MAC_OFFSET].copy_from_slice(&self.authenticated_bytes());
        out[MAC_OFFSET..].copy_from_slice(&self.mac);
        out
    }

    /// Everything preceding the MAC field.
    fn authenticated_bytes(&self) -> [u8; MAC_OFFSET] {
        let mut out = [0u8; MAC_OFFSET];
        out[0] = self.version;
        out[OFF_ROOM..OFF_TYPE].copy_from_slice(self.room.as_wire());
        out[OFF_TYPE] = self.msg_type as u8;
        out[OFF_SEQ..OFF_TIMESTAMP].copy_from_slice(&self.seq.to_ne_bytes());
        out[OFF_TIMESTAMP..OFF_PAYLOAD].copy_from_slice(&self.timestamp.to_ne_bytes());
        out[OFF_PAYLOAD..MAC_OFFSET].copy_from_slice(&self.payload);
        out
    }

    /// HMAC-SHA256 over the authenticated bytes, truncated to the first 8 bytes.
    pub fn compute_mac(&self, secret: &SharedSecret) -> [u8; MAC_LEN] {
        let mut mac = secret.hmac();
        mac.update(&self.authenticated_bytes());
        let full = mac.finalize().into_bytes();
        let mut tag = [0u8; MAC_LEN];
        tag.copy_from_slice(&full[..MAC_LEN]);
        tag
    }

    /// Compute and store the MAC.
    pub fn sign(&mut self, secret: &SharedSecret) {
        self.mac = self.compute_mac(secret);
    }

    /// Constant-time check of the stored MAC against a recomputed one.
    pub fn verify_mac(&self, secret: &SharedSecret) -> bool {
        let mut mac = secret.hmac();
        mac.update(&self.authenticated_bytes());
        mac.verify_truncated_left(&self.mac).is_ok()
    }

    /// Parse a received frame. Length is checked before any field is read and the version
    /// before the rest of the frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != FRAME_LEN {
            return Err(ProtocolError::WrongLength(bytes.len()));
        }
        if bytes[0] != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch(bytes[0]));
        }
        let msg_type = MessageType::try_from(bytes[OFF_TYPE])?;
        let mut room = [0u8; ROOM_ID_LEN];
        room.copy_from_slice(&bytes[OFF_ROOM..OFF_TYPE]);
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&bytes[OFF_PAYLOAD..MAC_OFFSET]);
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&bytes[MAC_OFFSET..]);
        Ok(Self {
            version: bytes[0],
            room: RoomId::from_wire(room),
            msg_type,
            seq: read_u32(&bytes[OFF_SEQ..OFF_TIMESTAMP]),
            timestamp: read_u32(&bytes[OFF_TIMESTAMP..OFF_PAYLOAD]),
            payload,
            mac,
        })
    }
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_ne_bytes([b[0], b[1], b[2], b[3]])
}

/// Type code of a raw frame, unvalidated. Lets a transport tell handshake frames apart.
pub fn peek_type(bytes: &[u8]) -> Option<MessageType> {
    bytes
        .get(OFF_TYPE)
        .and_then(|b| MessageType::try_from(*b).ok())
}

/// Build, sign and encode a frame in one step.
pub fn encode_signed(
    room: RoomId,
    msg_type: MessageType,
    seq: u32,
    timestamp: u32,
    payload: [u8; PAYLOAD_LEN],
    secret: &SharedSecret,
) -> [u8; FRAME_LEN] {
    let mut msg = WireMessage::new(room, msg_type, seq, timestamp).with_payload(payload);
    msg.sign(secret);
    msg.encode()
}
