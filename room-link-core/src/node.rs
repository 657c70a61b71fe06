//! Plumbing common to both node roles: configuration, boot restore, the command surface.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dispatch::{MessageDispatcher, Outbound};
use crate::error::CommandError;
use crate::host::{Clock, KeyValueStore, Transport};
use crate::keys::{derive_link_key, SharedSecret};
use crate::pairing;
use crate::power::{DEFAULT_GRACE_PERIOD_MS, DEFAULT_HEARTBEAT_TIMEOUT_MS, DEFAULT_STANDBY_DELAY_MS};
use crate::protocol::{HwAddr, RoomId};
use crate::state::{NodeSnapshot, NodeState, SharedNodeState, DEFAULT_LOCK_TIMEOUT};
use crate::store::{self, StoredPairing};

/// Default beacon period while unpaired.
pub const DEFAULT_BEACON_INTERVAL_MS: u64 = 2_000;
/// Default heartbeat period once paired.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Room used when the store holds none.
    pub room: RoomId,
    pub secret: SharedSecret,
    /// First outbound sequence number after boot (0 is treated as 1).
    pub first_seq: u32,
    pub lock_timeout: Duration,
    pub beacon_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub grace_period_ms: u64,
    pub standby_delay_ms: u64,
}

impl NodeConfig {
    pub fn new(room: RoomId, secret: SharedSecret) -> Self {
        Self {
            room,
            secret,
            first_seq: 1,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            beacon_interval_ms: DEFAULT_BEACON_INTERVAL_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            standby_delay_ms: DEFAULT_STANDBY_DELAY_MS,
        }
    }
}

/// `getPairingStatus` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingStatusReport {
    pub paired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<HwAddr>,
    pub room: RoomId,
}

/// State, collaborators and dispatcher owned by either role.
pub(crate) struct NodeCore<T, K, C> {
    pub config: NodeConfig,
    pub dispatcher: MessageDispatcher,
    pub state: SharedNodeState,
    pub transport: T,
    pub store: K,
    pub clock: C,
}

impl<T: Transport, K: KeyValueStore, C: Clock> NodeCore<T, K, C> {
    /// Restore room and pairing from the store. A read failure boots unpaired on the configured room.
    pub fn boot(config: NodeConfig, transport: T, store: K, clock: C) -> Self {
        let stored = store::load(&store).unwrap_or_else(|e| {
            warn!(error = %e, "could not read stored pairing; starting unpaired");
            StoredPairing::default()
        });
        let room = stored.room.unwrap_or(config.room);
        let mut node_state = NodeState::new(room, config.first_seq);
        if let Some(peer) = stored.peer {
            let key = derive_link_key(&room, &config.secret);
            if let Err(e) = transport.register_peer(peer, Some(key)) {
                warn!(%peer, error = %e, "could not restore encrypted peer link");
            }
            node_state.pairing.bind(peer);
            info!(%peer, %room, "restored pairing");
        }
        Self {
            dispatcher: MessageDispatcher::new(config.secret.clone()),
            state: SharedNodeState::with_timeout(node_state, config.lock_timeout),
            config,
            transport,
            store,
            clock,
        }
    }

    pub fn secret(&self) -> &SharedSecret {
        self.dispatcher.secret()
    }

    pub fn send(&self, out: Option<Outbound>) -> bool {
        out.is_some_and(|o| o.send(&self.transport))
    }

    /// Durable write of a pairing bound on the receive path, outside the lock. Called from the
    /// chore task. On failure the in-memory pairing stands.
    pub fn persist_pending(&self) {
        let Some(peer) = self.state.with(|s| s.pending_persist.take()).flatten() else {
            return;
        };
        match store::save_pairing(&self.store, peer) {
            Ok(()) => debug!(%peer, "pairing persisted"),
            Err(e) => warn!(%peer, error = %e, "pairing not persisted; will re-pair after reboot"),
        }
    }

    /// Periodic announce due for `interval_ms`? Does not record the send.
    pub fn announce_due(state: &NodeState, now: u64, interval_ms: u64) -> bool {
        state
            .last_announce
            .map_or(true, |t| now.saturating_sub(t) >= interval_ms)
    }

    pub fn reset_pairing(&self) -> Result<(), CommandError> {
        let dropped = self
            .state
            .with(|s| pairing::reset(s, &self.transport))
            .ok_or(CommandError::StateBusy)?;
        info!(peer = ?dropped, "pairing reset");
        store::clear_pairing(&self.store)?;
        Ok(())
    }

    /// Change the room. A pairing made for the old room is dropped.
    pub fn set_room_id(&self, name: &str) -> Result<(), CommandError> {
        let room = RoomId::new(name)?;
        let dropped = self
            .state
            .with(|s| {
                if s.pairing.room == room {
                    return None;
                }
                s.pairing.room = room;
                pairing::reset(s, &self.transport)
            })
            .ok_or(CommandError::StateBusy)?;
        info!(%room, "room id set");
        store::save_room(&self.store, &room)?;
        if let Some(peer) = dropped {
            info!(%peer, "pairing dropped after room change");
            store::clear_pairing(&self.store)?;
        }
        Ok(())
    }

    pub fn pairing_status(&self) -> Option<PairingStatusReport> {
        self.state.with(|s| PairingStatusReport {
            paired: s.pairing.is_paired(),
            peer: s.pairing.peer,
            room: s.pairing.room,
        })
    }

    pub fn snapshot(&self) -> Option<NodeSnapshot> {
        self.state.snapshot()
    }

    pub fn link_alive(&self) -> Option<bool> {
        let now = self.clock.now_ms();
        let timeout = self.config.heartbeat_timeout_ms;
        self.state.with(|s| s.power.link_alive(now, timeout))
    }
}
