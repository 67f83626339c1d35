//! UDP transport for team messages.
//!
//! A [`Transport`] owns one non-blocking socket for the lifetime of the process. Sending is fire
//! and forget: a lost packet is simply replaced by the next cycle's. Receiving drains whatever
//! the socket has buffered and returns immediately once it is empty.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use strum::Display;
use tracing::{debug, trace};

use crate::config::{CommsConfig, TransportConfig};
use crate::message::{Envelope, Header, Packet};
use crate::{Registry, Rejection, Result};

/// Larger than any valid message, so oversized datagrams are seen whole and rejected.
const RECEIVE_BUFFER_SIZE: usize = 1024;

/// How a transport reaches its teammates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    /// Broadcast on the wireless segment shared with the physical robots.
    Field,
    /// Multicast that never leaves this host, for simulated robots.
    Local,
    /// A socket and target provided by the caller.
    Custom,
}

/// The last message received from a teammate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    /// Where the message came from.
    pub address: SocketAddr,
    /// Send time of the message, on the teammate's clock.
    pub timestamp: u32,
}

/// What happened to the datagrams drained by [`Transport::receive_all`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// Packets from teammates whose callbacks have run.
    pub delivered: usize,
    /// Our own packets, looped back by broadcast or multicast.
    pub self_echo: usize,
    /// Packets that could not be decoded.
    pub rejected: usize,
}

impl Receipt {
    pub fn total(&self) -> usize {
        self.delivered + self.self_echo + self.rejected
    }
}

/// Outcome of handing one datagram to [`deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Decoded and dispatched to the callbacks.
    Dispatched(Header),
    /// Sent by ourselves, dropped without running callbacks.
    SelfEcho,
    /// Dropped without running callbacks.
    Rejected(Rejection),
}

/// Decodes `datagram` and dispatches it, unless it was sent by `robot_id` itself.
pub fn deliver(registry: &Registry, robot_id: u16, datagram: &[u8]) -> Delivery {
    match Envelope::unpack(registry, datagram) {
        Err(rejection) => Delivery::Rejected(rejection),
        Ok(envelope) if envelope.header.sender == robot_id => Delivery::SelfEcho,
        Ok(envelope) => {
            envelope.dispatch_callbacks();
            Delivery::Dispatched(envelope.header)
        }
    }
}

/// The multicast group simulated robots on `host` share: `239.x.y.z` for host `a.x.y.z`.
pub fn local_group(host: Ipv4Addr) -> Ipv4Addr {
    let [_, b, c, d] = host.octets();
    Ipv4Addr::new(239, b, c, d)
}

/// A non-blocking UDP socket connecting a robot to its team.
#[derive(Debug)]
pub struct Transport {
    socket: UdpSocket,
    target: SocketAddr,
    robot_id: u16,
    mode: Mode,
    peers: HashMap<u16, Peer>,
}

impl Transport {
    /// Starts broadcasting to `subnet` on `port`, for robots sharing one wireless segment.
    ///
    /// `subnet` is the broadcast address of the segment, e.g. `10.0.255.255`.
    pub fn start_field(port: u16, subnet: Ipv4Addr, robot_id: u16) -> Result<Self> {
        let socket = bind(port)?;
        socket.set_broadcast(true)?;

        let target: SocketAddr = SocketAddrV4::new(subnet, port).into();
        debug!(port, %target, robot_id, "started field transport");
        Ok(Self::new(socket.into(), target, robot_id, Mode::Field))
    }

    /// Starts multicasting on the loopback of this host, for simulated robots.
    ///
    /// Packets have a TTL of zero so they never reach the real robots.
    pub fn start_local(port: u16, local_id: u16) -> Result<Self> {
        Self::start_local_from(port, local_id, Ipv4Addr::LOCALHOST)
    }

    /// Like [`Transport::start_local`], deriving the multicast group from `host`.
    pub fn start_local_from(port: u16, local_id: u16, host: Ipv4Addr) -> Result<Self> {
        let group = local_group(host);

        let socket = bind(port)?;
        socket.set_broadcast(false)?;
        socket.set_multicast_ttl_v4(0)?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;

        let target: SocketAddr = SocketAddrV4::new(group, port).into();
        debug!(port, %target, local_id, "started local transport");
        Ok(Self::new(socket.into(), target, local_id, Mode::Local))
    }

    /// Starts the transport described by `config`.
    pub fn from_config(config: &CommsConfig) -> Result<Self> {
        match config.transport {
            TransportConfig::Field { subnet } => {
                Self::start_field(config.port, subnet, config.robot_id)
            }
            TransportConfig::Local { host } => {
                Self::start_local_from(config.port, config.robot_id, host)
            }
        }
    }

    /// Uses an already bound socket, sending every packet to `target`.
    pub fn with_socket(socket: UdpSocket, target: SocketAddr, robot_id: u16) -> Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self::new(socket, target, robot_id, Mode::Custom))
    }

    fn new(socket: UdpSocket, target: SocketAddr, robot_id: u16, mode: Mode) -> Self {
        Self {
            socket,
            target,
            robot_id,
            mode,
            peers: HashMap::new(),
        }
    }

    pub fn robot_id(&self) -> u16 {
        self.robot_id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The last message of every teammate we have heard from, by robot id.
    pub fn peers(&self) -> &HashMap<u16, Peer> {
        &self.peers
    }

    /// Sends a packet to the team.
    ///
    /// Returns `false` if the socket buffer is full, in which case the packet is dropped.
    pub fn send(&self, packet: &Packet) -> Result<bool> {
        match self.socket.send_to(packet.as_bytes(), self.target) {
            Ok(_) => {
                trace!(len = packet.len(), usage = packet.usage(), "sent packet");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drains every pending datagram, dispatching the ones sent by teammates.
    pub fn receive_all(&mut self, registry: &Registry) -> Result<Receipt> {
        let mut receipt = Receipt::default();
        let mut buf = [0; RECEIVE_BUFFER_SIZE];

        loop {
            let (len, address) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if is_transient(&e) => {
                    trace!(error = %e, "ignoring socket error");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match deliver(registry, self.robot_id, &buf[..len]) {
                Delivery::Dispatched(header) => {
                    trace!(mode = %self.mode, sender = header.sender, %address, "received packet");
                    receipt.delivered += 1;
                    self.peers.insert(
                        header.sender,
                        Peer {
                            address,
                            timestamp: header.timestamp,
                        },
                    );
                }
                Delivery::SelfEcho => receipt.self_echo += 1,
                Delivery::Rejected(rejection) => {
                    let reason: &'static str = rejection.into();
                    debug!(%address, len, reason, "dropped packet");
                    receipt.rejected += 1;
                }
            }
        }

        Ok(receipt)
    }
}

/// Errors that only concern a single earlier datagram, such as an ICMP port unreachable.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

/// Binds a non-blocking socket on every interface, shareable with other robots on this host.
fn bind(port: u16) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(socket)
}
