//! Shared node state: one instance per node, handed to the receive path, the chore task and the
//! control loop. Every access goes through a bounded lock attempt.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::debug;

use crate::pairing::PairingState;
use crate::power::RoomPowerState;
use crate::protocol::{HwAddr, RoomId};
use crate::sequence::SequenceGuard;

/// Default bound on a lock attempt. A miss skips the operation for this tick.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Fields shared across execution contexts.
#[derive(Debug)]
pub struct NodeState {
    pub pairing: PairingState,
    /// Initiator only: responder whose beacon we answered and whose PairAck we await.
    pub pending_peer: Option<HwAddr>,
    pub replay: SequenceGuard,
    /// Last sequence number sent; the next frame uses the successor.
    pub local_seq: u32,
    /// Monotonic ms of the last beacon or heartbeat sent by the chore task.
    pub last_announce: Option<u64>,
    /// Peer bound on the receive path and not yet written to the store.
    pub pending_persist: Option<HwAddr>,
    pub power: RoomPowerState,
}

impl NodeState {
    pub fn new(room: RoomId, first_seq: u32) -> Self {
        Self {
            pairing: PairingState::unpaired(room),
            pending_peer: None,
            replay: SequenceGuard::new(),
            local_seq: first_seq.max(1) - 1,
            last_announce: None,
            pending_persist: None,
            power: RoomPowerState::default(),
        }
    }

    /// Next outbound sequence number. Skips 0 on wrap.
    pub fn next_seq(&mut self) -> u32 {
        self.local_seq = self.local_seq.wrapping_add(1);
        if self.local_seq == 0 {
            self.local_seq = 1;
        }
        self.local_seq
    }
}

/// Consistent copy of the status fields, taken under the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub is_paired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<HwAddr>,
    pub room: RoomId,
    pub local_seq: u32,
    pub power: RoomPowerState,
}

/// Mutex-guarded [`NodeState`].
#[derive(Debug)]
pub struct SharedNodeState {
    inner: Mutex<NodeState>,
    lock_timeout: Duration,
}

impl SharedNodeState {
    pub fn new(state: NodeState) -> Self {
        Self::with_timeout(state, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_timeout(state: NodeState, lock_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(state),
            lock_timeout,
        }
    }

    /// Bounded lock attempt. `None` means "skip this operation this tick".
    pub fn try_lock(&self) -> Option<MutexGuard<'_, NodeState>> {
        let guard = self.inner.try_lock_for(self.lock_timeout);
        if guard.is_none() {
            debug!(timeout_ms = self.lock_timeout.as_millis() as u64, "state lock busy");
        }
        guard
    }

    /// Run `f` under the lock, or return `None` if the lock was not acquired in time.
    pub fn with<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> Option<R> {
        self.try_lock().map(|mut guard| f(&mut guard))
    }

    pub fn snapshot(&self) -> Option<NodeSnapshot> {
        self.with(|s| NodeSnapshot {
            is_paired: s.pairing.is_paired(),
            peer: s.pairing.peer,
            room: s.pairing.room,
            local_seq: s.local_seq,
            power: s.power.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn state() -> NodeState {
        NodeState::new(RoomId::new("R1").unwrap(), 1)
    }

    #[test]
    fn next_seq_starts_at_seed_and_skips_zero() {
        let mut s = NodeState::new(RoomId::new("R1").unwrap(), 1);
        assert_eq!(s.next_seq(), 1);
        assert_eq!(s.next_seq(), 2);

        let mut s = NodeState::new(RoomId::new("R1").unwrap(), 0);
        assert_eq!(s.next_seq(), 1);

        let mut s = NodeState::new(RoomId::new("R1").unwrap(), u32::MAX);
        assert_eq!(s.next_seq(), u32::MAX);
        assert_eq!(s.next_seq(), 1);
    }

    #[test]
    fn lock_timeout_skips_instead_of_blocking() {
        let shared = Arc::new(SharedNodeState::with_timeout(state(), Duration::from_millis(20)));
        let held = shared.try_lock().unwrap();
        let other = shared.clone();
        let result = thread::spawn(move || other.with(|s| s.next_seq())).join().unwrap();
        assert_eq!(result, None);
        drop(held);
        assert_eq!(shared.with(|s| s.next_seq()), Some(1));
    }

    #[test]
    fn snapshot_copies_fields() {
        let shared = SharedNodeState::new(state());
        shared.with(|s| {
            s.pairing.bind(HwAddr([9; 6]));
            s.next_seq();
        });
        let snap = shared.snapshot().unwrap();
        assert!(snap.is_paired);
        assert_eq!(snap.peer, Some(HwAddr([9; 6])));
        assert_eq!(snap.room, RoomId::new("R1").unwrap());
        assert_eq!(snap.local_seq, 1);
    }

    #[test]
    fn snapshot_serializes_with_readable_addresses() {
        let shared = SharedNodeState::new(state());
        let text = toml::to_string(&shared.snapshot().unwrap()).unwrap();
        assert!(text.contains("is_paired = false"));
        assert!(!text.contains("\npeer = "));
        assert!(text.contains("room = \"R1\""));
        assert!(text.contains("phase = \"standby\""));
        assert!(!text.contains("pending_relay"));

        shared.with(|s| s.pairing.bind(HwAddr([0x24, 0x6F, 0x28, 0, 0, 0xA1])));
        let text = toml::to_string(&shared.snapshot().unwrap()).unwrap();
        assert!(text.contains("peer = \"24:6F:28:00:00:A1\""));
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let shared = Arc::new(SharedNodeState::with_timeout(state(), Duration::from_secs(5)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = shared.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        s.with(|st| st.next_seq()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(shared.snapshot().unwrap().local_seq, 1000);
    }
}
