// Room link node for Linux: runs the door (initiator) or room power (responder) role over a UDP
// broadcast link.

mod config;
mod sensor;
mod store;
mod transport;

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use room_link_core::{
    Clock, HwAddr, InitiatorNode, NodeConfig, PairingStatusReport, PowerRelay, ResponderNode,
    RoomId, SystemClock,
};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, Role};
use sensor::{FileRelay, FlagPresence, GrantFile};
use store::FileStore;
use transport::UdpTransport;

/// Foreground loop period: presence/relay on the responder, credential poll on the initiator.
const CONTROL_TICK: Duration = Duration::from_millis(50);
/// Background loop period: beacons and heartbeats.
const CHORE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "room-link", version, about = "Door / room power link node")]
struct Cli {
    /// Config file (default: ~/.config/room-link/config.toml, then /etc/room-link/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the node (default).
    Run,
    /// Print the persisted pairing and room.
    Status,
    /// Forget the paired peer.
    Reset,
    /// Change the room id; drops any pairing.
    SetRoom { id: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let cfg = config::load(cli.config.as_deref())?;
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(cfg),
        Command::Status => status(&cfg),
        Command::Reset => reset(&cfg),
        Command::SetRoom { id } => set_room(&cfg, &id),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("room_link_core=info,room_link_linux=info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();
}

fn run(cfg: Config) -> anyhow::Result<()> {
    let local = cfg.hw_addr()?;
    let clock = SystemClock::new();
    // Wall-clock seed keeps a rebooted sender ahead of the peer's replay watermark.
    let node_cfg = cfg.node_config(clock.epoch_secs())?;
    let store = FileStore::open(&cfg.state_file)
        .with_context(|| format!("opening state file {}", cfg.state_file.display()))?;
    let bcast_ip: IpAddr = cfg
        .broadcast_addr
        .parse()
        .with_context(|| format!("invalid broadcast_addr `{}`", cfg.broadcast_addr))?;
    let broadcast = SocketAddr::new(bcast_ip, cfg.port);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let transport = UdpTransport::bind(local, cfg.port, broadcast)
            .await
            .with_context(|| format!("binding UDP port {}", cfg.port))?;
        info!(role = ?cfg.role, %local, port = cfg.port, "room link node starting");
        match cfg.role {
            Role::Responder => run_responder(&cfg, node_cfg, transport, store, clock).await,
            Role::Initiator => run_initiator(&cfg, node_cfg, transport, store, clock).await,
        }
    })
}

type Responder = ResponderNode<UdpTransport, FileStore, FileRelay, SystemClock>;
type Initiator = InitiatorNode<UdpTransport, FileStore, SystemClock>;

async fn run_responder(
    cfg: &Config,
    node_cfg: NodeConfig,
    transport: UdpTransport,
    store: FileStore,
    clock: SystemClock,
) -> anyhow::Result<()> {
    let relay = FileRelay {
        path: cfg.relay_state.clone(),
    };
    // Relay output matches the boot state (off) until presence or a Wake says otherwise.
    relay.set_power(false);
    let node: Arc<Responder> = Arc::new(ResponderNode::new(node_cfg, transport, store, relay, clock));
    log_boot_status(node.pairing_status());

    let rx = node.clone();
    tokio::spawn(async move {
        let res = transport::run_receiver(rx.transport(), |from, frame| {
            rx.handle_inbound(from, frame).is_ok()
        })
        .await;
        if let Err(e) = res {
            warn!(error = %e, "receiver stopped");
        }
    });
    let chores = node.clone();
    tokio::spawn(every(CHORE_TICK, move || {
        chores.run_chores();
    }));
    let control = node.clone();
    let mut sensor = FlagPresence {
        path: cfg.presence_flag.clone(),
    };
    tokio::spawn(every(CONTROL_TICK, move || {
        control.poll_and_tick(&mut sensor);
    }));

    shutdown_signal().await?;
    info!("shutting down");
    Ok(())
}

async fn run_initiator(
    cfg: &Config,
    node_cfg: NodeConfig,
    transport: UdpTransport,
    store: FileStore,
    clock: SystemClock,
) -> anyhow::Result<()> {
    let node: Arc<Initiator> = Arc::new(InitiatorNode::new(node_cfg, transport, store, clock));
    log_boot_status(node.pairing_status());

    let rx = node.clone();
    tokio::spawn(async move {
        let res = transport::run_receiver(rx.transport(), |from, frame| {
            rx.handle_inbound(from, frame).is_ok()
        })
        .await;
        if let Err(e) = res {
            warn!(error = %e, "receiver stopped");
        }
    });
    let chores = node.clone();
    tokio::spawn(every(CHORE_TICK, move || {
        chores.run_chores();
    }));
    let control = node.clone();
    let mut grant = GrantFile {
        path: cfg.grant_file.clone(),
    };
    tokio::spawn(every(CONTROL_TICK, move || {
        control.poll_credentials(&mut grant);
    }));

    shutdown_signal().await?;
    info!("shutting down");
    Ok(())
}

fn log_boot_status(status: Option<PairingStatusReport>) {
    if let Some(s) = status {
        info!(paired = s.paired, peer = ?s.peer, room = %s.room, "node ready");
    }
}

/// Run `f` every `period`; a late tick is skipped, not bunched.
fn every(period: Duration, mut f: impl FnMut() + Send + 'static) -> impl Future<Output = ()> + Send {
    async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            f();
        }
    }
}

/// Offline `status` output, printed as TOML.
#[derive(Debug, Serialize)]
struct StatusReport {
    role: Role,
    hw_addr: HwAddr,
    state_file: PathBuf,
    /// No room saved in the state file; the configured one applies.
    room_from_config: bool,
    pairing: PairingStatusReport,
}

fn status_report(cfg: &Config) -> anyhow::Result<StatusReport> {
    let store = FileStore::open(&cfg.state_file)?;
    let rec = room_link_core::store::load(&store)?;
    let room_from_config = rec.room.is_none();
    let room = match rec.room {
        Some(r) => r,
        None => cfg.room()?,
    };
    Ok(StatusReport {
        role: cfg.role,
        hw_addr: cfg.hw_addr()?,
        state_file: store.path().to_path_buf(),
        room_from_config,
        pairing: PairingStatusReport {
            paired: rec.peer.is_some(),
            peer: rec.peer,
            room,
        },
    })
}

fn status(cfg: &Config) -> anyhow::Result<()> {
    let report = status_report(cfg)?;
    print!("{}", toml::to_string(&report).context("rendering status")?);
    Ok(())
}

fn reset(cfg: &Config) -> anyhow::Result<()> {
    let store = FileStore::open(&cfg.state_file)?;
    room_link_core::store::clear_pairing(&store)?;
    println!("pairing cleared");
    Ok(())
}

fn set_room(cfg: &Config, id: &str) -> anyhow::Result<()> {
    let room = RoomId::new(id).with_context(|| format!("invalid room id `{id}`"))?;
    let store = FileStore::open(&cfg.state_file)?;
    let was_paired = room_link_core::store::load(&store)
        .map(|r| {
            let current = r.room.or_else(|| cfg.room().ok());
            r.peer.is_some() && current != Some(room)
        })
        .unwrap_or(true);
    room_link_core::store::save_room(&store, &room)?;
    if was_paired {
        room_link_core::store::clear_pairing(&store)?;
        println!("room set to {room}; pairing cleared");
    } else {
        println!("room set to {room}");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            role: Role::Initiator,
            room_id: "LAB-7".to_string(),
            state_file: dir.join("state.toml"),
            ..Config::default()
        }
    }

    #[test]
    fn status_of_fresh_node_uses_configured_room() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let report = status_report(&cfg).unwrap();
        assert!(report.room_from_config);
        assert!(!report.pairing.paired);
        assert_eq!(report.pairing.room, RoomId::new("LAB-7").unwrap());

        let text = toml::to_string(&report).unwrap();
        assert!(text.contains("role = \"initiator\""));
        assert!(text.contains("hw_addr = \"02:00:00:00:00:01\""));
        assert!(text.contains("[pairing]"));
        assert!(text.contains("paired = false"));
        assert!(text.contains("room = \"LAB-7\""));
    }

    #[test]
    fn status_reports_persisted_pairing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let peer = HwAddr([0x02, 0, 0, 0, 0, 0x02]);
        {
            let store = FileStore::open(&cfg.state_file).unwrap();
            room_link_core::store::save_room(&store, &RoomId::new("LAB-9").unwrap()).unwrap();
            room_link_core::store::save_pairing(&store, peer).unwrap();
        }
        let report = status_report(&cfg).unwrap();
        assert!(!report.room_from_config);
        assert_eq!(report.pairing.peer, Some(peer));

        let text = toml::to_string(&report).unwrap();
        assert!(text.contains("peer = \"02:00:00:00:00:02\""));
        assert!(text.contains("room = \"LAB-9\""));
    }
}
