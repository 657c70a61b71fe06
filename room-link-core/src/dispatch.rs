//! Inbound screening and routing. Every check is an early return; failures are dropped silently.

use tracing::{trace, warn};

use crate::error::ProtocolError;
use crate::host::Transport;
use crate::keys::SharedSecret;
use crate::protocol::{HwAddr, MessageType};
use crate::state::NodeState;
use crate::wire::{WireMessage, FRAME_LEN};

/// Frame ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: HwAddr,
    pub msg_type: MessageType,
    pub seq: u32,
    pub frame: [u8; FRAME_LEN],
}

impl Outbound {
    /// Fire-and-forget send. A failure is logged and reported as `false`; the next periodic tick
    /// is the retry.
    pub fn send(&self, transport: &dyn Transport) -> bool {
        match transport.send(self.to, &self.frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(to = %self.to, msg_type = ?self.msg_type, error = %e, "send failed");
                false
            }
        }
    }
}

/// Where an accepted frame goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Beacon / PairRequest / PairAck: to the pairing machine, no replay check.
    Handshake(WireMessage),
    /// Wake / Heartbeat / Ack from the bound peer, past the replay window.
    Control(WireMessage),
}

/// Validates inbound frames against the node's room, the shared secret and the pairing state.
#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    secret: SharedSecret,
}

impl MessageDispatcher {
    pub fn new(secret: SharedSecret) -> Self {
        Self { secret }
    }

    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }

    /// Checks, in order: length, version, type code, room, MAC; then for control frames pairing
    /// status, bound peer and replay window. Call with the state lock held.
    pub fn screen(
        &self,
        from: HwAddr,
        bytes: &[u8],
        state: &mut NodeState,
    ) -> Result<Routed, ProtocolError> {
        let result = self.screen_inner(from, bytes, state);
        if let Err(e) = &result {
            trace!(%from, reason = %e, "inbound frame dropped");
        }
        result
    }

    fn screen_inner(
        &self,
        from: HwAddr,
        bytes: &[u8],
        state: &mut NodeState,
    ) -> Result<Routed, ProtocolError> {
        let msg = WireMessage::decode(bytes)?;
        if msg.room != state.pairing.room {
            return Err(ProtocolError::RoomMismatch);
        }
        if !msg.verify_mac(&self.secret) {
            return Err(ProtocolError::MacInvalid);
        }
        if msg.msg_type.is_handshake() {
            return Ok(Routed::Handshake(msg));
        }
        if !state.pairing.is_paired() {
            return Err(ProtocolError::NotPaired);
        }
        if !state.pairing.is_bound_to(from) {
            return Err(ProtocolError::ForeignPeer);
        }
        if !state.replay.is_valid(from, msg.seq) {
            return Err(ProtocolError::ReplayDetected(msg.seq));
        }
        Ok(Routed::Control(msg))
    }
}
