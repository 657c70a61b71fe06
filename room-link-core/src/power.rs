//! Room power: presence- and wake-driven Occupied/Grace/Standby state machine (responder node).

use serde::Serialize;
use tracing::info;

/// Default time without presence before entering Grace.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 300_000;
/// Default additional time in Grace before power is cut.
pub const DEFAULT_STANDBY_DELAY_MS: u64 = 60_000;
/// Default window for considering the peer link alive (display only).
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPhase {
    Occupied,
    Grace,
    Standby,
}

/// Power state. Lives inside the shared node state; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomPowerState {
    pub phase: PowerPhase,
    /// Monotonic ms of the last presence or wake; `None` until the first one after boot.
    pub last_movement: Option<u64>,
    /// Monotonic ms of the last accepted control frame from the peer.
    pub last_peer_contact: Option<u64>,
    pub power_on: bool,
    /// Relay output decided under the lock but not yet driven.
    #[serde(skip)]
    pub pending_relay: Option<bool>,
}

impl Default for RoomPowerState {
    fn default() -> Self {
        Self {
            phase: PowerPhase::Standby,
            last_movement: None,
            last_peer_contact: None,
            power_on: false,
            pending_relay: None,
        }
    }
}

impl RoomPowerState {
    pub fn link_alive(&self, now: u64, timeout_ms: u64) -> bool {
        self.last_peer_contact
            .is_some_and(|t| now.saturating_sub(t) < timeout_ms)
    }

    /// Relay value to drive, if it changed since the last take. Call with the lock held, then
    /// actuate after releasing it.
    pub fn take_relay_change(&mut self) -> Option<bool> {
        self.pending_relay.take()
    }
}

/// Phase thresholds. Holds no mutable state; the state lives in [`RoomPowerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomPowerController {
    pub grace_period_ms: u64,
    pub standby_delay_ms: u64,
}

impl Default for RoomPowerController {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            standby_delay_ms: DEFAULT_STANDBY_DELAY_MS,
        }
    }
}

impl RoomPowerController {
    pub fn new(grace_period_ms: u64, standby_delay_ms: u64) -> Self {
        Self {
            grace_period_ms,
            standby_delay_ms,
        }
    }

    /// One control-loop evaluation.
    pub fn tick(&self, state: &mut RoomPowerState, presence: bool, now: u64) {
        if presence {
            state.last_movement = Some(now);
            set_power(state, true);
            set_phase(state, PowerPhase::Occupied);
            return;
        }
        let Some(last) = state.last_movement else {
            return;
        };
        let idle = now.saturating_sub(last);
        if idle > self.grace_period_ms.saturating_add(self.standby_delay_ms) {
            set_power(state, false);
            set_phase(state, PowerPhase::Standby);
        } else if idle > self.grace_period_ms {
            set_phase(state, PowerPhase::Grace);
        } else {
            set_phase(state, PowerPhase::Occupied);
        }
    }

    /// Authenticated Wake: treat as movement now and force power on.
    pub fn on_wake(&self, state: &mut RoomPowerState, now: u64) {
        state.last_movement = Some(now);
        state.last_peer_contact = Some(now);
        set_power(state, true);
        set_phase(state, PowerPhase::Occupied);
    }

    /// Authenticated Heartbeat: link liveness only.
    pub fn on_heartbeat(&self, state: &mut RoomPowerState, now: u64) {
        state.last_peer_contact = Some(now);
    }
}

/// Idempotent: no relay change and no log when already at the requested value.
fn set_power(state: &mut RoomPowerState, on: bool) {
    if state.power_on == on {
        return;
    }
    state.power_on = on;
    state.pending_relay = Some(on);
    info!(power_on = on, "room power changed");
}

fn set_phase(state: &mut RoomPowerState, phase: PowerPhase) {
    if state.phase != phase {
        info!(from = ?state.phase, to = ?phase, "room phase changed");
        state.phase = phase;
    }
}
