//! Room link protocol: message types, version, addresses and room identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProtocolError, RoomIdError};

/// Current protocol version. Frames carrying any other value are dropped before parsing.
pub const PROTOCOL_VERSION: u8 = 2;

/// Width of the room identifier buffer on the wire.
pub const ROOM_ID_LEN: usize = 16;

/// Longest room identifier accepted; the last buffer byte stays zero.
pub const ROOM_ID_MAX_LEN: usize = ROOM_ID_LEN - 1;

/// Opaque payload width carried by every frame.
pub const PAYLOAD_LEN: usize = 8;

/// All wire message types. Codes are fixed by the frame format (see wire module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Discovery: unpaired responder advertises its room.
    Beacon = 0x01,
    /// Initiator asks the beaconing responder to bind.
    PairRequest = 0x02,
    /// Responder confirms the binding.
    PairAck = 0x03,
    /// Pre-energize room power (sent on access grant).
    Wake = 0x10,
    /// Link keep-alive.
    Heartbeat = 0x11,
    /// Generic acknowledgment.
    Ack = 0xFF,
}

impl MessageType {
    /// Handshake frames are routed to pairing regardless of pairing status and skip the replay window.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            MessageType::Beacon | MessageType::PairRequest | MessageType::PairAck
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(MessageType::Beacon),
            0x02 => Ok(MessageType::PairRequest),
            0x03 => Ok(MessageType::PairAck),
            0x10 => Ok(MessageType::Wake),
            0x11 => Ok(MessageType::Heartbeat),
            0xFF => Ok(MessageType::Ack),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// 6-byte radio hardware address. Serialized as `AA:BB:CC:DD:EE:FF`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HwAddr(pub [u8; 6]);

impl HwAddr {
    /// Unaddressed destination used for beacons.
    pub const BROADCAST: HwAddr = HwAddr([0xFF; 6]);

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HwAddr({self})")
    }
}

/// Parse `AA:BB:CC:DD:EE:FF` (also accepts `-` separators).
impl FromStr for HwAddr {
    type Err = ParseHwAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in out.iter_mut() {
            let part = parts.next().ok_or(ParseHwAddrError)?;
            if part.len() != 2 {
                return Err(ParseHwAddrError);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseHwAddrError)?;
        }
        if parts.next().is_some() {
            return Err(ParseHwAddrError);
        }
        Ok(HwAddr(out))
    }
}

impl Serialize for HwAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HwAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hardware address (expected AA:BB:CC:DD:EE:FF)")]
pub struct ParseHwAddrError;

/// Room identifier as carried on the wire: zero-padded fixed buffer.
/// Equality compares the whole buffer, padding included. Serialized as the room name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId([u8; ROOM_ID_LEN]);

impl RoomId {
    pub fn new(name: &str) -> Result<Self, RoomIdError> {
        if name.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if name.len() > ROOM_ID_MAX_LEN {
            return Err(RoomIdError::TooLong {
                len: name.len(),
                max: ROOM_ID_MAX_LEN,
            });
        }
        if name.as_bytes().contains(&0) {
            return Err(RoomIdError::InteriorNul);
        }
        let mut buf = [0u8; ROOM_ID_LEN];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        Ok(RoomId(buf))
    }

    /// Raw buffer as it appears on the wire.
    pub fn from_wire(buf: [u8; ROOM_ID_LEN]) -> Self {
        RoomId(buf)
    }

    pub fn as_wire(&self) -> &[u8; ROOM_ID_LEN] {
        &self.0
    }

    /// Significant bytes (up to the first zero). Used as the key-derivation message.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(ROOM_ID_LEN);
        &self.0[..end]
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Debug for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoomId({:?})", self.name())
    }
}

impl FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomId::new(s)
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RoomId::new(&s).map_err(serde::de::Error::custom)
    }
}
