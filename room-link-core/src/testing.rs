//! Test doubles for the host collaborators, plus end-to-end runs of both roles over them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PersistenceError, TransportError};
use crate::host::{Clock, CredentialVerifier, KeyValueStore, PowerRelay, PresenceSensor, Transport};
use crate::keys::LinkKey;
use crate::protocol::HwAddr;

/// Records every call; sends and registrations can be made to fail.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(HwAddr, Vec<u8>)>>,
    registered: Mutex<Vec<(HwAddr, Option<LinkKey>)>>,
    unregistered: Mutex<Vec<HwAddr>>,
    fail_register: AtomicBool,
    fail_unregister: AtomicBool,
    fail_send: AtomicBool,
}

impl RecordingTransport {
    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unregister(&self, fail: bool) {
        self.fail_unregister.store(fail, Ordering::SeqCst);
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Drain frames sent so far.
    pub fn take_sent(&self) -> Vec<(HwAddr, Vec<u8>)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn registered(&self) -> Vec<(HwAddr, Option<LinkKey>)> {
        self.registered.lock().clone()
    }

    pub fn unregistered(&self) -> Vec<HwAddr> {
        self.unregistered.lock().clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, to: HwAddr, frame: &[u8]) -> Result<(), TransportError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::Send("link down".into()));
        }
        self.sent.lock().push((to, frame.to_vec()));
        Ok(())
    }

    fn register_peer(&self, addr: HwAddr, link_key: Option<LinkKey>) -> Result<(), TransportError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(TransportError::RegisterPeer("peer table full".into()));
        }
        self.registered.lock().push((addr, link_key));
        Ok(())
    }

    fn unregister_peer(&self, addr: HwAddr) -> Result<(), TransportError> {
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(TransportError::RegisterPeer("peer table locked".into()));
        }
        self.unregistered.lock().push(addr);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingRelay {
    calls: Mutex<Vec<bool>>,
}

impl RecordingRelay {
    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().clone()
    }
}

impl PowerRelay for RecordingRelay {
    fn set_power(&self, on: bool) {
        self.calls.lock().push(on);
    }
}

/// Reads as empty; every write fails.
#[derive(Debug, Default)]
pub struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &[u8]) -> Result<(), PersistenceError> {
        Err(PersistenceError::Backend("flash write failed".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), PersistenceError> {
        Err(PersistenceError::Backend("flash write failed".into()))
    }
}

/// Clock moved by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn epoch_secs(&self) -> u32 {
        1_700_000_000 + (self.now_ms() / 1000) as u32
    }
}

/// Returns queued readings, then `false`.
#[derive(Debug, Default)]
pub struct ScriptedSensor {
    readings: VecDeque<bool>,
}

impl ScriptedSensor {
    pub fn new(readings: impl IntoIterator<Item = bool>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
        }
    }
}

impl PresenceSensor for ScriptedSensor {
    fn poll_presence(&mut self) -> bool {
        self.readings.pop_front().unwrap_or(false)
    }
}

/// Returns queued verification results, then `None`.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    results: VecDeque<Option<String>>,
}

impl ScriptedVerifier {
    pub fn new(results: impl IntoIterator<Item = Option<&'static str>>) -> Self {
        Self {
            results: results.into_iter().map(|r| r.map(str::to_string)).collect(),
        }
    }
}

impl CredentialVerifier for ScriptedVerifier {
    fn verify(&mut self) -> Option<String> {
        self.results.pop_front().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::host::MemoryStore;
    use crate::initiator::InitiatorNode;
    use crate::keys::SharedSecret;
    use crate::node::NodeConfig;
    use crate::power::PowerPhase;
    use crate::protocol::{MessageType, RoomId};
    use crate::responder::ResponderNode;
    use crate::store;
    use crate::wire::WireMessage;

    const DOOR: HwAddr = HwAddr([0x24, 0x6F, 0x28, 0, 0, 0xA1]);
    const POWER: HwAddr = HwAddr([0x24, 0x6F, 0x28, 0, 0, 0xB1]);

    type Door = InitiatorNode<RecordingTransport, MemoryStore, ManualClock>;
    type Power = ResponderNode<RecordingTransport, MemoryStore, RecordingRelay, ManualClock>;

    fn config(room: &str, secret: &str) -> NodeConfig {
        NodeConfig::new(RoomId::new(room).unwrap(), SharedSecret::from(secret))
    }

    fn door(cfg: NodeConfig, clock: &ManualClock) -> Door {
        InitiatorNode::new(cfg, RecordingTransport::default(), MemoryStore::new(), clock.clone())
    }

    fn power(cfg: NodeConfig, clock: &ManualClock) -> Power {
        ResponderNode::new(
            cfg,
            RecordingTransport::default(),
            MemoryStore::new(),
            RecordingRelay::default(),
            clock.clone(),
        )
    }

    /// Deliver everything each side has sent to the other; broadcasts included. Returns the
    /// frames delivered.
    fn pump(door: &Door, power: &Power) -> Vec<Vec<u8>> {
        let mut delivered = Vec::new();
        loop {
            let to_power = door.transport().take_sent();
            let to_door = power.transport().take_sent();
            if to_power.is_empty() && to_door.is_empty() {
                return delivered;
            }
            for (to, bytes) in to_power {
                if to == POWER || to.is_broadcast() {
                    let _ = power.handle_inbound(DOOR, &bytes);
                    delivered.push(bytes);
                }
            }
            for (to, bytes) in to_door {
                if to == DOOR || to.is_broadcast() {
                    let _ = door.handle_inbound(POWER, &bytes);
                    delivered.push(bytes);
                }
            }
        }
    }

    /// Pair both nodes, then run one chore pass on each so the pairing is persisted and the
    /// first heartbeat is delivered.
    fn paired_pair(clock: &ManualClock) -> (Door, Power) {
        let d = door(config("R1", "k"), clock);
        let p = power(config("R1", "k"), clock);
        assert!(p.run_chores());
        pump(&d, &p);
        d.run_chores();
        p.run_chores();
        pump(&d, &p);
        (d, p)
    }

    #[test]
    fn beacon_pairing_and_wake_end_to_end() {
        let clock = ManualClock::default();
        let (d, p) = paired_pair(&clock);

        assert_eq!(d.pairing_status().unwrap().peer, Some(POWER));
        assert_eq!(p.pairing_status().unwrap().peer, Some(DOOR));
        assert_eq!(store::load(d.store()).unwrap().peer, Some(POWER));
        assert_eq!(store::load(p.store()).unwrap().peer, Some(DOOR));
        assert_eq!(d.transport().registered().len(), 1);
        assert_eq!(
            d.transport().registered()[0].1,
            p.transport().registered()[0].1
        );

        clock.advance(1_000);
        assert!(d.on_access_granted());
        let wake = d.transport().take_sent().remove(0).1;
        assert_eq!(p.handle_inbound(DOOR, &wake), Ok(()));
        assert!(p.snapshot().unwrap().power.power_on);
        assert!(p.control_tick(false));
        assert_eq!(p.relay().calls(), vec![true]);

        // Byte-identical retransmission of the latest frame is still accepted.
        assert_eq!(p.handle_inbound(DOOR, &wake), Ok(()));
        assert!(p.control_tick(false));
        assert_eq!(p.relay().calls(), vec![true]);

        // The responder's Ack reaches the door and marks the link alive.
        pump(&d, &p);
        assert_eq!(d.link_alive(), Some(true));
    }

    #[test]
    fn replay_of_older_wake_rejected() {
        let clock = ManualClock::default();
        let (d, p) = paired_pair(&clock);
        d.on_access_granted();
        let first = d.transport().take_sent().remove(0).1;
        d.on_access_granted();
        let second = d.transport().take_sent().remove(0).1;
        p.handle_inbound(DOOR, &second).unwrap();
        let seq = WireMessage::decode(&first).unwrap().seq;
        assert_eq!(p.handle_inbound(DOOR, &first), Err(ProtocolError::ReplayDetected(seq)));
    }

    #[test]
    fn mismatched_secret_never_pairs() {
        let clock = ManualClock::default();
        let d = door(config("R1", "k1"), &clock);
        let p = power(config("R1", "k2"), &clock);
        p.run_chores();
        let delivered = pump(&d, &p);
        assert_eq!(delivered.len(), 1);
        assert!(!d.pairing_status().unwrap().paired);
        assert!(!p.pairing_status().unwrap().paired);
    }

    #[test]
    fn other_room_never_pairs() {
        let clock = ManualClock::default();
        let d = door(config("R2", "k"), &clock);
        let p = power(config("R1", "k"), &clock);
        p.run_chores();
        pump(&d, &p);
        assert!(!d.pairing_status().unwrap().paired);
        assert!(d.transport().registered().is_empty());
    }

    #[test]
    fn heartbeats_keep_link_alive_without_touching_power() {
        let clock = ManualClock::default();
        let (d, p) = paired_pair(&clock);
        for _ in 0..4 {
            clock.advance(5_000);
            assert!(d.run_chores());
            pump(&d, &p);
            assert_eq!(p.link_alive(), Some(true));
        }
        assert!(!p.snapshot().unwrap().power.power_on);
        assert!(p.relay().calls().is_empty());
    }

    #[test]
    fn room_empties_then_door_wakes_it() {
        let clock = ManualClock::default();
        let (d, p) = paired_pair(&clock);
        let mut sensor = ScriptedSensor::new([true]);
        assert!(p.poll_and_tick(&mut sensor));
        clock.advance(360_001);
        p.poll_and_tick(&mut sensor);
        assert_eq!(p.snapshot().unwrap().power.phase, PowerPhase::Standby);

        d.on_access_granted();
        pump(&d, &p);
        let snap = p.snapshot().unwrap();
        assert_eq!(snap.power.phase, PowerPhase::Occupied);
        assert_eq!(p.relay().calls(), vec![true, false]);
        p.poll_and_tick(&mut sensor);
        assert_eq!(p.relay().calls(), vec![true, false, true]);
    }

    #[test]
    fn lost_pair_ack_recovered_by_repeated_request() {
        let clock = ManualClock::default();
        let d = door(config("R1", "k"), &clock);
        let p = power(config("R1", "k"), &clock);

        // Beacon reaches the door; its PairRequest reaches the responder, which binds.
        assert!(p.run_chores());
        let beacon = p.transport().take_sent().remove(0).1;
        d.handle_inbound(POWER, &beacon).unwrap();
        let request = d.transport().take_sent().remove(0).1;
        p.handle_inbound(DOOR, &request).unwrap();
        assert!(p.pairing_status().unwrap().paired);

        // The PairAck is lost on the air.
        assert_eq!(p.transport().take_sent().len(), 1);
        clock.advance(10_000);
        assert!(!p.run_chores());
        assert!(!d.pairing_status().unwrap().paired);

        assert!(d.run_chores());
        pump(&d, &p);
        assert_eq!(d.pairing_status().unwrap().peer, Some(POWER));
        assert_eq!(p.pairing_status().unwrap().peer, Some(DOOR));
        d.run_chores();
        assert_eq!(store::load(d.store()).unwrap().peer, Some(POWER));

        d.transport().take_sent();
        assert!(d.on_access_granted());
        pump(&d, &p);
        assert!(p.snapshot().unwrap().power.power_on);
    }

    #[test]
    fn repaired_after_reset_on_both_sides() {
        let clock = ManualClock::default();
        let (d, p) = paired_pair(&clock);
        d.reset_pairing().unwrap();
        p.reset_pairing().unwrap();
        clock.advance(2_000);
        assert!(p.run_chores());
        pump(&d, &p);
        assert!(d.pairing_status().unwrap().paired);
        assert!(p.pairing_status().unwrap().paired);

        // Windows restarted: a fresh Wake with any seq above zero passes.
        d.on_access_granted();
        pump(&d, &p);
        assert!(p.snapshot().unwrap().power.power_on);
    }
}
