//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use room_link_core::{HwAddr, NodeConfig, RoomId, SharedSecret};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Door node: credential check, sends Wake.
    Initiator,
    /// Room power node: beacons, drives the relay.
    Responder,
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "initiator" | "door" => Ok(Role::Initiator),
            "responder" | "power" => Ok(Role::Responder),
            other => bail!("unknown role `{other}` (expected initiator or responder)"),
        }
    }
}

/// Node configuration. File: ~/.config/room-link/config.toml or /etc/room-link/config.toml.
/// Env overrides: ROOMLINK_ROLE, ROOMLINK_ROOM, ROOMLINK_PORT, ROOMLINK_SECRET, ROOMLINK_HW_ADDR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_role")]
    pub role: Role,
    /// Room name, at most 15 bytes. A room id saved in the state file wins.
    #[serde(default = "default_room_id")]
    pub room_id: String,
    /// Pre-shared HMAC key. Plain text; prefix with `hex:` for raw bytes.
    #[serde(default)]
    pub shared_secret: String,
    /// This node's link address (AA:BB:CC:DD:EE:FF). Defaults per role.
    #[serde(default)]
    pub hw_addr: Option<String>,
    /// UDP port shared by both nodes (default 45680).
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Responder: presence is reported while this file exists.
    #[serde(default = "default_presence_flag")]
    pub presence_flag: PathBuf,
    /// Responder: relay output, written as `on` / `off`.
    #[serde(default = "default_relay_state")]
    pub relay_state: PathBuf,
    /// Initiator: a user id written here counts as a granted credential.
    #[serde(default = "default_grant_file")]
    pub grant_file: PathBuf,
    #[serde(default)]
    pub grace_period_ms: Option<u64>,
    #[serde(default)]
    pub standby_delay_ms: Option<u64>,
    #[serde(default)]
    pub beacon_interval_ms: Option<u64>,
    #[serde(default)]
    pub heartbeat_interval_ms: Option<u64>,
}

fn default_role() -> Role {
    Role::Responder
}
fn default_room_id() -> String {
    "ROOM-101".to_string()
}
fn default_port() -> u16 {
    45680
}
fn default_broadcast_addr() -> String {
    "255.255.255.255".to_string()
}
fn default_state_file() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/state/room-link/state.toml"),
        None => PathBuf::from("/var/lib/room-link/state.toml"),
    }
}
fn default_presence_flag() -> PathBuf {
    PathBuf::from("/run/room-link/presence")
}
fn default_relay_state() -> PathBuf {
    PathBuf::from("/run/room-link/power")
}
fn default_grant_file() -> PathBuf {
    PathBuf::from("/run/room-link/grant")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: default_role(),
            room_id: default_room_id(),
            shared_secret: String::new(),
            hw_addr: None,
            port: default_port(),
            broadcast_addr: default_broadcast_addr(),
            state_file: default_state_file(),
            presence_flag: default_presence_flag(),
            relay_state: default_relay_state(),
            grant_file: default_grant_file(),
            grace_period_ms: None,
            standby_delay_ms: None,
            beacon_interval_ms: None,
            heartbeat_interval_ms: None,
        }
    }
}

impl Config {
    pub fn hw_addr(&self) -> anyhow::Result<HwAddr> {
        match &self.hw_addr {
            Some(s) => s.parse().with_context(|| format!("invalid hw_addr `{s}`")),
            // Locally administered defaults so two nodes on one LAN differ out of the box.
            None => Ok(match self.role {
                Role::Initiator => HwAddr([0x02, 0, 0, 0, 0, 0x01]),
                Role::Responder => HwAddr([0x02, 0, 0, 0, 0, 0x02]),
            }),
        }
    }

    pub fn secret(&self) -> anyhow::Result<SharedSecret> {
        if self.shared_secret.is_empty() {
            bail!("shared_secret is not set (config file or ROOMLINK_SECRET)");
        }
        match self.shared_secret.strip_prefix("hex:") {
            Some(h) => {
                let bytes = hex::decode(h).context("shared_secret is not valid hex")?;
                Ok(SharedSecret::new(bytes))
            }
            None => Ok(SharedSecret::from(self.shared_secret.as_str())),
        }
    }

    pub fn room(&self) -> anyhow::Result<RoomId> {
        RoomId::new(&self.room_id).with_context(|| format!("invalid room_id `{}`", self.room_id))
    }

    /// Core node configuration. `first_seq` seeds the outbound counter.
    pub fn node_config(&self, first_seq: u32) -> anyhow::Result<NodeConfig> {
        let mut nc = NodeConfig::new(self.room()?, self.secret()?);
        nc.first_seq = first_seq;
        if let Some(v) = self.grace_period_ms {
            nc.grace_period_ms = v;
        }
        if let Some(v) = self.standby_delay_ms {
            nc.standby_delay_ms = v;
        }
        if let Some(v) = self.beacon_interval_ms {
            nc.beacon_interval_ms = v;
        }
        if let Some(v) = self.heartbeat_interval_ms {
            nc.heartbeat_interval_ms = v;
        }
        Ok(nc)
    }

    /// Apply `ROOMLINK_*` overrides from `lookup`. Unparseable values are ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(r) = lookup("ROOMLINK_ROLE").and_then(|s| s.parse().ok()) {
            self.role = r;
        }
        if let Some(s) = lookup("ROOMLINK_ROOM") {
            self.room_id = s;
        }
        if let Some(p) = lookup("ROOMLINK_PORT").and_then(|s| s.parse().ok()) {
            self.port = p;
        }
        if let Some(s) = lookup("ROOMLINK_SECRET") {
            self.shared_secret = s;
        }
        if let Some(s) = lookup("ROOMLINK_HW_ADDR") {
            self.hw_addr = Some(s);
        }
    }
}

/// Load config: default, then config file (explicit path or the first that exists), then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => load_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => load_file(&p)?,
            None => Config::default(),
        },
    };
    c.apply_env(|k| std::env::var(k).ok());
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/room-link/config.toml"));
    }
    out.push(PathBuf::from("/etc/room-link/config.toml"));
    out
}

fn load_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))
}
