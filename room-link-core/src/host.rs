//! Host collaborators. The core performs no I/O; hosts implement these and inject them.

use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{PersistenceError, TransportError};
use crate::keys::LinkKey;
use crate::protocol::HwAddr;

/// Short-range datagram link. Sends are fire-and-forget; callers log failures and move on.
pub trait Transport: Send + Sync {
    fn send(&self, to: HwAddr, frame: &[u8]) -> Result<(), TransportError>;

    /// Register a peer. With a link key the channel to that peer is encrypted.
    fn register_peer(&self, addr: HwAddr, link_key: Option<LinkKey>) -> Result<(), TransportError>;

    /// Forget a peer (pairing reset). Default: nothing to undo.
    fn unregister_peer(&self, _addr: HwAddr) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Durable key-value storage (flash preferences on the device, a file on Linux).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError>;
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Local presence sensor (responder node only).
pub trait PresenceSensor {
    fn poll_presence(&mut self) -> bool;
}

/// Room power relay. Called from the control tick, never with the state lock held, and only on an
/// actual change of the requested state.
pub trait PowerRelay: Send + Sync {
    fn set_power(&self, on: bool);
}

/// Credential check on the access-control node (card reader, biometric module).
/// Returns the matched user id when access is granted.
pub trait CredentialVerifier {
    fn verify(&mut self) -> Option<String>;
}

/// Time source: monotonic milliseconds for timing, epoch seconds for the advisory frame field.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
    fn epoch_secs(&self) -> u32;
}

/// Wall/monotonic clock backed by `std::time`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn epoch_secs(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// In-memory key-value store. Useful for hosts without flash and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
