//! Durable pairing record over a [`KeyValueStore`]: `paired`, `peer_addr`, `room_id`.

use crate::error::PersistenceError;
use crate::host::KeyValueStore;
use crate::protocol::{HwAddr, RoomId};

pub const KEY_PAIRED: &str = "paired";
pub const KEY_PEER_ADDR: &str = "peer_addr";
pub const KEY_ROOM_ID: &str = "room_id";

/// What survives a reboot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredPairing {
    pub room: Option<RoomId>,
    /// Bound peer; `None` when unpaired.
    pub peer: Option<HwAddr>,
}

/// Load the record. Missing keys mean "not set"; malformed values are errors.
pub fn load(store: &dyn KeyValueStore) -> Result<StoredPairing, PersistenceError> {
    let room = match store.get(KEY_ROOM_ID)? {
        Some(raw) => {
            let name = std::str::from_utf8(&raw)
                .map_err(|_| PersistenceError::Malformed { key: KEY_ROOM_ID })?;
            Some(RoomId::new(name).map_err(|_| PersistenceError::Malformed { key: KEY_ROOM_ID })?)
        }
        None => None,
    };
    let paired = match store.get(KEY_PAIRED)?.as_deref() {
        Some([1]) => true,
        Some([0]) | None => false,
        Some(_) => return Err(PersistenceError::Malformed { key: KEY_PAIRED }),
    };
    let peer = if paired {
        let raw = store
            .get(KEY_PEER_ADDR)?
            .ok_or(PersistenceError::Malformed { key: KEY_PEER_ADDR })?;
        let bytes: [u8; 6] = raw
            .as_slice()
            .try_into()
            .map_err(|_| PersistenceError::Malformed { key: KEY_PEER_ADDR })?;
        Some(HwAddr(bytes))
    } else {
        None
    };
    Ok(StoredPairing { room, peer })
}

/// Persist a completed pairing. The peer address is written before the flag so a torn write
/// reads back as unpaired.
pub fn save_pairing(store: &dyn KeyValueStore, peer: HwAddr) -> Result<(), PersistenceError> {
    store.set(KEY_PEER_ADDR, peer.as_bytes())?;
    store.set(KEY_PAIRED, &[1])
}

/// Clear the pairing; the room id is kept.
pub fn clear_pairing(store: &dyn KeyValueStore) -> Result<(), PersistenceError> {
    store.set(KEY_PAIRED, &[0])?;
    store.remove(KEY_PEER_ADDR)
}

pub fn save_room(store: &dyn KeyValueStore, room: &RoomId) -> Result<(), PersistenceError> {
    store.set(KEY_ROOM_ID, room.name_bytes())
}
