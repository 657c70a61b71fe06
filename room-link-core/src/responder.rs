//! Responder node (room power): beacons until paired, drives the room relay from presence and
//! Wake frames.

use tracing::debug;

use crate::dispatch::{Outbound, Routed};
use crate::error::{CommandError, ProtocolError};
use crate::host::{Clock, KeyValueStore, PowerRelay, PresenceSensor, Transport};
use crate::node::{NodeConfig, NodeCore, PairingStatusReport};
use crate::pairing::{build_frame, ResponderPairing};
use crate::power::RoomPowerController;
use crate::protocol::{HwAddr, MessageType};
use crate::state::{NodeSnapshot, NodeState};
use crate::wire::WireMessage;

pub struct ResponderNode<T, K, R, C> {
    core: NodeCore<T, K, C>,
    pairing: ResponderPairing,
    power: RoomPowerController,
    relay: R,
}

impl<T, K, R, C> ResponderNode<T, K, R, C>
where
    T: Transport,
    K: KeyValueStore,
    R: PowerRelay,
    C: Clock,
{
    /// Boot: restore pairing from the store. Power starts off and is re-derived from presence.
    pub fn new(config: NodeConfig, transport: T, store: K, relay: R, clock: C) -> Self {
        let pairing = ResponderPairing::new(config.secret.clone());
        let power = RoomPowerController::new(config.grace_period_ms, config.standby_delay_ms);
        Self {
            core: NodeCore::boot(config, transport, store, clock),
            pairing,
            power,
            relay,
        }
    }

    /// Receive path. Touches only the in-memory state: a new binding is persisted by the chore
    /// task and relay changes are driven by the control tick. The error is the drop reason and
    /// is never answered.
    pub fn handle_inbound(&self, from: HwAddr, bytes: &[u8]) -> Result<(), ProtocolError> {
        let now = self.core.clock.now_ms();
        let ts = self.core.clock.epoch_secs();
        let reply = {
            let mut state = self.core.state.try_lock().ok_or(ProtocolError::StateBusy)?;
            match self.core.dispatcher.screen(from, bytes, &mut state)? {
                Routed::Handshake(msg) => {
                    let step = self
                        .pairing
                        .on_handshake(&mut state, from, &msg, &self.core.transport, ts);
                    if step.bound.is_some() {
                        state.pending_persist = step.bound;
                    }
                    step.reply
                }
                Routed::Control(msg) => self.on_control(&mut state, from, &msg, now, ts),
            }
        };
        self.core.send(reply);
        Ok(())
    }

    fn on_control(
        &self,
        state: &mut NodeState,
        from: HwAddr,
        msg: &WireMessage,
        now: u64,
        ts: u32,
    ) -> Option<Outbound> {
        match msg.msg_type {
            MessageType::Wake => {
                self.power.on_wake(&mut state.power, now);
                let mut payload = [0u8; 8];
                payload[0] = state.power.power_on as u8;
                Some(build_frame(state, self.core.secret(), from, MessageType::Ack, ts, payload))
            }
            MessageType::Heartbeat | MessageType::Ack => {
                self.power.on_heartbeat(&mut state.power, now);
                None
            }
            other => {
                debug!(?other, "unexpected control frame");
                None
            }
        }
    }

    /// Background chore: persist a fresh pairing, then broadcast a beacon every beacon interval
    /// while unpaired. Returns whether a beacon went out.
    pub fn run_chores(&self) -> bool {
        self.core.persist_pending();
        let now = self.core.clock.now_ms();
        let ts = self.core.clock.epoch_secs();
        let interval = self.core.config.beacon_interval_ms;
        let beacon = self
            .core
            .state
            .with(|s| {
                if !NodeCore::<T, K, C>::announce_due(s, now, interval) {
                    return None;
                }
                let beacon = self.pairing.beacon(s, ts)?;
                s.last_announce = Some(now);
                Some(beacon)
            })
            .flatten();
        self.core.send(beacon)
    }

    /// Foreground control tick with an already-polled presence reading. Drives the relay, after
    /// releasing the lock, when this tick or an earlier Wake changed the power decision.
    /// Returns `false` when the state lock was busy and the tick was skipped.
    pub fn control_tick(&self, presence: bool) -> bool {
        let now = self.core.clock.now_ms();
        let Some(change) = self.core.state.with(|s| {
            self.power.tick(&mut s.power, presence, now);
            s.power.take_relay_change()
        }) else {
            return false;
        };
        if let Some(on) = change {
            self.relay.set_power(on);
        }
        true
    }

    pub fn poll_and_tick(&self, sensor: &mut impl PresenceSensor) -> bool {
        let presence = sensor.poll_presence();
        self.control_tick(presence)
    }

    pub fn set_room_id(&self, name: &str) -> Result<(), CommandError> {
        self.core.set_room_id(name)
    }

    pub fn reset_pairing(&self) -> Result<(), CommandError> {
        self.core.reset_pairing()
    }

    pub fn pairing_status(&self) -> Option<PairingStatusReport> {
        self.core.pairing_status()
    }

    pub fn snapshot(&self) -> Option<NodeSnapshot> {
        self.core.snapshot()
    }

    pub fn link_alive(&self) -> Option<bool> {
        self.core.link_alive()
    }

    pub fn transport(&self) -> &T {
        &self.core.transport
    }

    pub fn store(&self) -> &K {
        &self.core.store
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }
}
