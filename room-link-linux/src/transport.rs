//! UDP broadcast link standing in for the short-range radio.
//!
//! Datagram: source hw address (6 bytes), flags (1 byte), body. Control frames to a peer
//! registered with a link key are sealed; handshake frames travel in the clear and rely on the
//! frame MAC.
//!
//! The hw address in the header is unauthenticated, so the socket address it maps to is only
//! recorded once the node has accepted the frame. A peer registered with a link key can only be
//! moved to a new socket address by a sealed datagram.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::Mutex;
use room_link_core::wire::peek_type;
use room_link_core::{open_link, seal_link, HwAddr, LinkKey, MessageType, Transport, TransportError};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

const HEADER_LEN: usize = 7;
const FLAG_SEALED: u8 = 0x01;
const RECV_BUF_LEN: usize = 512;
/// Most hw addresses with a known socket address.
const MAX_ROUTES: usize = 32;

/// One datagram that passed the link checks.
#[derive(Debug)]
pub struct Inbound {
    pub from: HwAddr,
    pub src: SocketAddr,
    pub frame: Vec<u8>,
    /// Accepting this frame may set the route to `from`: it was sealed, or `from` had no link key.
    pub routable: bool,
}

pub struct UdpTransport {
    local: HwAddr,
    socket: UdpSocket,
    broadcast: SocketAddr,
    /// Registered peers; `Some` key means the link to that peer is sealed.
    peers: Mutex<HashMap<HwAddr, Option<LinkKey>>>,
    /// Socket address of each hw address, learned from accepted frames.
    routes: Mutex<HashMap<HwAddr, SocketAddr>>,
    /// Sender of the datagram being delivered; replies to it go there until a route is learned.
    delivering: Mutex<Option<(HwAddr, SocketAddr)>>,
}

impl UdpTransport {
    /// Bind `0.0.0.0:port` with broadcast enabled.
    pub async fn bind(local: HwAddr, port: u16, broadcast: SocketAddr) -> std::io::Result<Self> {
        let std_sock = std::net::UdpSocket::bind(("0.0.0.0", port))?;
        std_sock.set_broadcast(true)?;
        std_sock.set_nonblocking(true)?;
        Ok(Self::from_socket(local, UdpSocket::from_std(std_sock)?, broadcast))
    }

    pub fn from_socket(local: HwAddr, socket: UdpSocket, broadcast: SocketAddr) -> Self {
        Self {
            local,
            socket,
            broadcast,
            peers: Mutex::new(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
            delivering: Mutex::new(None),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Record where `addr` is reachable. Returns `false` when the table is full.
    pub fn learn_route(&self, addr: HwAddr, sock: SocketAddr) -> bool {
        let mut routes = self.routes.lock();
        match routes.get(&addr) {
            Some(known) if *known == sock => return true,
            Some(known) => info!(peer = %addr, from = %known, to = %sock, "peer moved"),
            None if routes.len() >= MAX_ROUTES => {
                debug!(peer = %addr, "route table full; not learned");
                return false;
            }
            None => debug!(peer = %addr, %sock, "route learned"),
        }
        routes.insert(addr, sock);
        true
    }

    fn route(&self, to: HwAddr) -> Option<SocketAddr> {
        if let Some(sock) = self.routes.lock().get(&to) {
            return Some(*sock);
        }
        match *self.delivering.lock() {
            Some((from, src)) if from == to => Some(src),
            _ => None,
        }
    }

    fn link_key(&self, peer: HwAddr) -> Option<LinkKey> {
        self.peers.lock().get(&peer).copied().flatten()
    }

    fn wrap(&self, to: HwAddr, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        let handshake = peek_type(frame).map_or(true, MessageType::is_handshake);
        let key = if to.is_broadcast() || handshake {
            None
        } else {
            self.link_key(to)
        };
        let mut datagram = Vec::with_capacity(HEADER_LEN + frame.len() + 28);
        datagram.extend_from_slice(self.local.as_bytes());
        match key {
            Some(k) => {
                let sealed = seal_link(&k, frame).map_err(|e| TransportError::Send(e.to_string()))?;
                datagram.push(FLAG_SEALED);
                datagram.extend_from_slice(&sealed);
            }
            None => {
                datagram.push(0);
                datagram.extend_from_slice(frame);
            }
        }
        Ok(datagram)
    }

    /// Unwrap one datagram. `None` drops it: own echo, bad header, or a link-policy violation.
    pub fn accept(&self, datagram: &[u8], src: SocketAddr) -> Option<Inbound> {
        if datagram.len() < HEADER_LEN {
            trace!(%src, len = datagram.len(), "runt datagram");
            return None;
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&datagram[..6]);
        let from = HwAddr(addr);
        if from == self.local || from.is_broadcast() {
            return None;
        }
        let sealed = datagram[6] & FLAG_SEALED != 0;
        let body = &datagram[HEADER_LEN..];
        let key = self.link_key(from);
        let frame = if sealed {
            let Some(k) = key else {
                trace!(%from, "sealed datagram from peer without link key");
                return None;
            };
            match open_link(&k, body) {
                Ok(f) => f,
                Err(e) => {
                    debug!(%from, error = %e, "could not open sealed datagram");
                    return None;
                }
            }
        } else {
            let handshake = peek_type(body).map_or(true, MessageType::is_handshake);
            if key.is_some() && !handshake {
                trace!(%from, "clear control frame on a sealed link");
                return None;
            }
            body.to_vec()
        };
        Some(Inbound {
            from,
            src,
            frame,
            routable: sealed || key.is_none(),
        })
    }

    /// Wait for the next datagram that passes the link checks.
    pub async fn recv(&self) -> std::io::Result<Inbound> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let (n, src) = self.socket.recv_from(&mut buf).await?;
            if let Some(inbound) = self.accept(&buf[..n], src) {
                return Ok(inbound);
            }
        }
    }

    /// Hand one frame to the node. Replies sent from inside `deliver` reach the datagram's
    /// source; the route is kept only if `deliver` accepted the frame.
    pub fn dispatch(&self, inbound: Inbound, deliver: impl Fn(HwAddr, &[u8]) -> bool) {
        let Inbound {
            from,
            src,
            frame,
            routable,
        } = inbound;
        *self.delivering.lock() = Some((from, src));
        let accepted = deliver(from, &frame);
        *self.delivering.lock() = None;
        if !accepted {
            return;
        }
        if routable {
            self.learn_route(from, src);
        } else if self.routes.lock().get(&from) != Some(&src) {
            trace!(%from, %src, "clear frame does not move a sealed peer");
        }
    }
}

impl Transport for UdpTransport {
    fn send(&self, to: HwAddr, frame: &[u8]) -> Result<(), TransportError> {
        let dest = if to.is_broadcast() {
            self.broadcast
        } else {
            self.route(to).ok_or(TransportError::UnknownPeer(to))?
        };
        let datagram = self.wrap(to, frame)?;
        self.socket
            .try_send_to(&datagram, dest)
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn register_peer(&self, addr: HwAddr, link_key: Option<LinkKey>) -> Result<(), TransportError> {
        self.peers.lock().insert(addr, link_key);
        Ok(())
    }

    fn unregister_peer(&self, addr: HwAddr) -> Result<(), TransportError> {
        self.peers.lock().remove(&addr);
        self.routes.lock().remove(&addr);
        Ok(())
    }
}

/// Receive loop: hand every frame that passes the link checks to `deliver`, which returns
/// whether the node accepted it.
pub async fn run_receiver(
    transport: &UdpTransport,
    deliver: impl Fn(HwAddr, &[u8]) -> bool,
) -> std::io::Result<()> {
    loop {
        let inbound = transport.recv().await?;
        transport.dispatch(inbound, &deliver);
    }
}
