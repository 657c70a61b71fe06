//! Pairing: discovery + handshake. One machine per role; they share only the wire protocol.
//!
//! Responder (room power node): beacons while unpaired, binds the first initiator whose
//! PairRequest carries its room, answers PairAck.
//! Initiator (access node): answers a matching Beacon with PairRequest, binds on PairAck from
//! the same sender.

use tracing::{debug, info, warn};

use crate::dispatch::Outbound;
use crate::host::Transport;
use crate::keys::{derive_link_key, SharedSecret};
use crate::protocol::{HwAddr, MessageType, RoomId};
use crate::state::NodeState;
use crate::wire::WireMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStatus {
    Unpaired,
    Paired,
}

/// At most one bound peer. Cleared only by an explicit reset (or a room change).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingState {
    pub status: PairingStatus,
    pub peer: Option<HwAddr>,
    pub room: RoomId,
}

impl PairingState {
    pub fn unpaired(room: RoomId) -> Self {
        Self {
            status: PairingStatus::Unpaired,
            peer: None,
            room,
        }
    }

    pub fn is_paired(&self) -> bool {
        self.status == PairingStatus::Paired
    }

    /// True when paired to exactly `addr`.
    pub fn is_bound_to(&self, addr: HwAddr) -> bool {
        self.is_paired() && self.peer == Some(addr)
    }

    pub fn bind(&mut self, peer: HwAddr) {
        self.status = PairingStatus::Paired;
        self.peer = Some(peer);
    }

    pub fn unbind(&mut self) {
        self.status = PairingStatus::Unpaired;
        self.peer = None;
    }
}

/// Result of one handshake step, applied by the node outside the state lock.
#[derive(Debug, Default)]
pub struct PairingStep {
    pub reply: Option<Outbound>,
    /// Set when this step bound a new peer; the node persists it.
    pub bound: Option<HwAddr>,
}

/// Build a signed frame from the node's room and counter.
pub(crate) fn build_frame(
    state: &mut NodeState,
    secret: &SharedSecret,
    to: HwAddr,
    msg_type: MessageType,
    timestamp: u32,
    payload: [u8; 8],
) -> Outbound {
    let seq = state.next_seq();
    let mut msg = WireMessage::new(state.pairing.room, msg_type, seq, timestamp).with_payload(payload);
    msg.sign(secret);
    Outbound {
        to,
        msg_type,
        seq,
        frame: msg.encode(),
    }
}

/// Responder role.
#[derive(Debug, Clone)]
pub struct ResponderPairing {
    secret: SharedSecret,
}

impl ResponderPairing {
    pub fn new(secret: SharedSecret) -> Self {
        Self { secret }
    }

    /// Beacon to broadcast while unpaired; `None` once paired.
    pub fn beacon(&self, state: &mut NodeState, timestamp: u32) -> Option<Outbound> {
        if state.pairing.is_paired() {
            return None;
        }
        Some(build_frame(
            state,
            &self.secret,
            HwAddr::BROADCAST,
            MessageType::Beacon,
            timestamp,
            [0; 8],
        ))
    }

    /// Handle an authenticated handshake frame for this node's room.
    pub fn on_handshake(
        &self,
        state: &mut NodeState,
        from: HwAddr,
        msg: &WireMessage,
        transport: &dyn Transport,
        timestamp: u32,
    ) -> PairingStep {
        if msg.msg_type != MessageType::PairRequest || from.is_broadcast() {
            return PairingStep::default();
        }
        if state.pairing.is_paired() {
            if state.pairing.is_bound_to(from) {
                // Initiator missed our PairAck; repeat it without touching state.
                let reply = build_frame(state, &self.secret, from, MessageType::PairAck, timestamp, [0; 8]);
                return PairingStep {
                    reply: Some(reply),
                    bound: None,
                };
            }
            debug!(%from, "pair request ignored: already paired");
            return PairingStep::default();
        }

        let key = derive_link_key(&state.pairing.room, &self.secret);
        if let Err(e) = transport.register_peer(from, Some(key)) {
            warn!(%from, error = %e, "could not install encrypted peer link; handshake aborted");
            return PairingStep::default();
        }
        state.pairing.bind(from);
        state.replay.reset(&from);
        info!(peer = %from, room = %state.pairing.room, "paired with initiator");
        let reply = build_frame(state, &self.secret, from, MessageType::PairAck, timestamp, [0; 8]);
        PairingStep {
            reply: Some(reply),
            bound: Some(from),
        }
    }
}

/// Initiator role.
#[derive(Debug, Clone)]
pub struct InitiatorPairing {
    secret: SharedSecret,
}

impl InitiatorPairing {
    pub fn new(secret: SharedSecret) -> Self {
        Self { secret }
    }

    /// Handle an authenticated handshake frame for this node's room.
    pub fn on_handshake(
        &self,
        state: &mut NodeState,
        from: HwAddr,
        msg: &WireMessage,
        transport: &dyn Transport,
        timestamp: u32,
    ) -> PairingStep {
        if from.is_broadcast() || state.pairing.is_paired() {
            return PairingStep::default();
        }
        match msg.msg_type {
            MessageType::Beacon => {
                let key = derive_link_key(&state.pairing.room, &self.secret);
                if let Err(e) = transport.register_peer(from, Some(key)) {
                    warn!(%from, error = %e, "could not install encrypted peer link; handshake aborted");
                    return PairingStep::default();
                }
                if let Some(prev) = state.pending_peer.replace(from) {
                    if prev != from {
                        drop_link(transport, prev);
                    }
                }
                debug!(%from, "beacon accepted; requesting pairing");
                let reply = build_frame(
                    state,
                    &self.secret,
                    from,
                    MessageType::PairRequest,
                    timestamp,
                    [0; 8],
                );
                PairingStep {
                    reply: Some(reply),
                    bound: None,
                }
            }
            MessageType::PairAck if state.pending_peer == Some(from) => {
                state.pending_peer = None;
                state.pairing.bind(from);
                state.replay.reset(&from);
                info!(peer = %from, room = %state.pairing.room, "paired with responder");
                PairingStep {
                    reply: None,
                    bound: Some(from),
                }
            }
            _ => PairingStep::default(),
        }
    }
}

/// Drop the binding (explicit reset or room change). Returns the peer that was bound or pending.
pub fn reset(state: &mut NodeState, transport: &dyn Transport) -> Option<HwAddr> {
    let peer = state.pairing.peer.or(state.pending_peer);
    if let Some(addr) = peer {
        state.replay.reset(&addr);
        drop_link(transport, addr);
    }
    state.pairing.unbind();
    state.pending_peer = None;
    state.pending_persist = None;
    peer
}

/// Remove a peer from the transport. A failure leaves a stale entry behind and is only logged.
fn drop_link(transport: &dyn Transport, addr: HwAddr) {
    if let Err(e) = transport.unregister_peer(addr) {
        warn!(peer = %addr, error = %e, "could not remove peer link");
    }
}
