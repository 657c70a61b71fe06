//! Initiator node (access control): answers beacons, wakes the room on granted access and keeps
//! the link alive with heartbeats.

use tracing::{debug, info};

use crate::dispatch::Routed;
use crate::error::{CommandError, ProtocolError};
use crate::host::{Clock, CredentialVerifier, KeyValueStore, Transport};
use crate::node::{NodeConfig, NodeCore, PairingStatusReport};
use crate::pairing::{build_frame, InitiatorPairing};
use crate::protocol::{HwAddr, MessageType};
use crate::state::NodeSnapshot;

pub struct InitiatorNode<T, K, C> {
    core: NodeCore<T, K, C>,
    pairing: InitiatorPairing,
}

impl<T, K, C> InitiatorNode<T, K, C>
where
    T: Transport,
    K: KeyValueStore,
    C: Clock,
{
    pub fn new(config: NodeConfig, transport: T, store: K, clock: C) -> Self {
        let pairing = InitiatorPairing::new(config.secret.clone());
        Self {
            core: NodeCore::boot(config, transport, store, clock),
            pairing,
        }
    }

    /// Receive path. Touches only the in-memory state; a new binding is persisted by the chore
    /// task. The error is the drop reason and is never answered.
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
                        // First heartbeat goes out on the next chore tick.
                        state.last_announce = None;
                    } else if step.reply.is_some() {
                        state.last_announce = Some(now);
                    }
                    step.reply
                }
                Routed::Control(msg) => {
                    match msg.msg_type {
                        MessageType::Heartbeat | MessageType::Ack => {
                            state.power.last_peer_contact = Some(now);
                        }
                        other => debug!(?other, "control frame not handled by initiator"),
                    }
                    None
                }
            }
        };
        self.core.send(reply);
        Ok(())
    }

    /// Background chore: persist a fresh pairing, then announce on the interval. Paired, that is a
    /// heartbeat to the bound peer every heartbeat interval. Awaiting a PairAck, the PairRequest
    /// is repeated to the pending responder every beacon interval; a paired responder no longer
    /// beacons and answers the repeat with its PairAck again.
    /// Returns whether a frame went out.
    pub fn run_chores(&self) -> bool {
        self.core.persist_pending();
        let now = self.core.clock.now_ms();
        let ts = self.core.clock.epoch_secs();
        let config = &self.core.config;
        let announce = self
            .core
            .state
            .with(|s| {
                let (peer, msg_type, interval) = if s.pairing.is_paired() {
                    (s.pairing.peer?, MessageType::Heartbeat, config.heartbeat_interval_ms)
                } else {
                    (s.pending_peer?, MessageType::PairRequest, config.beacon_interval_ms)
                };
                if !NodeCore::<T, K, C>::announce_due(s, now, interval) {
                    return None;
                }
                s.last_announce = Some(now);
                if msg_type == MessageType::PairRequest {
                    debug!(to = %peer, "pair ack outstanding; repeating pair request");
                }
                Some(build_frame(s, self.core.secret(), peer, msg_type, ts, [0; 8]))
            })
            .flatten();
        self.core.send(announce)
    }

    /// Access granted at the door: wake the room. Returns whether a Wake was sent.
    pub fn on_access_granted(&self) -> bool {
        let ts = self.core.clock.epoch_secs();
        let wake = self
            .core
            .state
            .with(|s| {
                let peer = s.pairing.peer.filter(|_| s.pairing.is_paired())?;
                Some(build_frame(s, self.core.secret(), peer, MessageType::Wake, ts, [0; 8]))
            })
            .flatten();
        match wake {
            Some(out) => {
                info!(to = %out.to, seq = out.seq, "access granted; waking room");
                self.core.send(Some(out))
            }
            None => {
                debug!("access granted while unpaired; no wake sent");
                false
            }
        }
    }

    /// Run one credential check and wake the room on a match. Returns the matched user.
    pub fn poll_credentials(&self, verifier: &mut impl CredentialVerifier) -> Option<String> {
        let user = verifier.verify()?;
        info!(%user, "credential accepted");
        self.on_access_granted();
        Some(user)
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
}
