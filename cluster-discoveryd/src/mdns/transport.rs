//! UDP sockets joined to the mDNS multicast groups, one per address family.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;
use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinEncodable;
use parking_lot::RwLock;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use shared::protocol::{MDNS_GROUP_V4, MDNS_GROUP_V6, MDNS_PORT};
use crate::error::{DiscoveryError, Result};
use crate::local::{self, Interface};

/// Outbound side of the transport, so protocol logic can be driven without sockets.
#[async_trait]
pub trait Multicaster: Send + Sync {
    /// Send `msg` to every bound multicast group. Best effort: failures are logged.
    async fn multicast(&self, msg: &Message);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    fn group(self) -> SocketAddr {
        match self {
            Family::V4 => SocketAddr::V4(SocketAddrV4::new(MDNS_GROUP_V4, MDNS_PORT)),
            Family::V6 => SocketAddr::V6(SocketAddrV6::new(MDNS_GROUP_V6, MDNS_PORT, 0, 0)),
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::V4 => f.write_str("udp4"),
            Family::V6 => f.write_str("udp6"),
        }
    }
}

pub struct Transport {
    v4: RwLock<Option<Arc<UdpSocket>>>,
    v6: RwLock<Option<Arc<UdpSocket>>>,
}

impl Transport {
    /// Bind both families on the mDNS port and join the groups on `interface`,
    /// or on every interface when `None`. Either family alone is enough.
    pub fn bind(interface: Option<&str>) -> Result<Self> {
        let interfaces = match interface {
            Some(name) => vec![local::find_interface(name)?],
            None => local::interfaces()?,
        };
        let pinned = interface.is_some();

        let (v4, v6) = either_family(bind_v4(&interfaces, pinned), bind_v6(&interfaces, pinned))?;

        Ok(Self::from_sockets(v4, v6))
    }

    /// Wrap already-bound sockets
    pub fn from_sockets(v4: Option<UdpSocket>, v6: Option<UdpSocket>) -> Self {
        Self {
            v4: RwLock::new(v4.map(Arc::new)),
            v6: RwLock::new(v6.map(Arc::new)),
        }
    }

    pub fn socket(&self, family: Family) -> Option<Arc<UdpSocket>> {
        match family {
            Family::V4 => self.v4.read().clone(),
            Family::V6 => self.v6.read().clone(),
        }
    }

    /// Families with a bound socket
    pub fn families(&self) -> Vec<Family> {
        [Family::V4, Family::V6]
            .into_iter()
            .filter(|family| self.socket(*family).is_some())
            .collect()
    }

    /// Release both sockets; later sends are dropped. Receive loops holding
    /// a socket keep it open until they observe cancellation.
    pub fn close(&self) {
        self.v4.write().take();
        self.v6.write().take();
    }
}

#[async_trait]
impl Multicaster for Transport {
    async fn multicast(&self, msg: &Message) {
        let buf = match msg.to_vec() {
            Ok(buf) => buf,
            Err(e) => {
                tracing::error!("Failed to pack message: {}", e);
                return;
            }
        };

        for family in [Family::V4, Family::V6] {
            let Some(socket) = self.socket(family) else {
                continue;
            };
            if let Err(e) = socket.send_to(&buf, family.group()).await {
                tracing::warn!("Failed to send {} multicast: {}", family, e);
            }
        }
    }
}

/// Keep whichever families bound. Only losing both is fatal.
fn either_family<T>(v4: io::Result<T>, v6: io::Result<T>) -> Result<(Option<T>, Option<T>)> {
    let v4 = v4
        .map_err(|e| tracing::error!("Failed to bind to udp4 port: {}", e))
        .ok();
    let v6 = v6
        .map_err(|e| tracing::error!("Failed to bind to udp6 port: {}", e))
        .ok();

    if v4.is_none() && v6.is_none() {
        return Err(DiscoveryError::NoSocket);
    }
    Ok((v4, v6))
}

fn bind_v4(interfaces: &[Interface], pinned: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT)))?;
    socket.set_multicast_loop_v4(true)?;

    let mut joined = 0;
    for iface in interfaces {
        for addr in iface.ipv4() {
            match socket.join_multicast_v4(&MDNS_GROUP_V4, &addr) {
                Ok(()) => joined += 1,
                Err(e) => tracing::trace!("Failed to join {} on {}: {}", MDNS_GROUP_V4, iface.name, e),
            }
        }
    }
    if joined == 0 {
        return Err(io::Error::other(DiscoveryError::JoinFailed));
    }

    if pinned {
        if let Some(addr) = interfaces.iter().flat_map(|i| i.ipv4()).next() {
            socket.set_multicast_if_v4(&addr)?;
        }
    }

    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

fn bind_v6(interfaces: &[Interface], pinned: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_only_v6(true)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SockAddr::from(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, MDNS_PORT, 0, 0)))?;
    socket.set_multicast_loop_v6(true)?;

    let mut joined = 0;
    for iface in interfaces.iter().filter(|i| i.ipv6().next().is_some()) {
        match socket.join_multicast_v6(&MDNS_GROUP_V6, iface.index) {
            Ok(()) => joined += 1,
            Err(e) => tracing::trace!("Failed to join {} on {}: {}", MDNS_GROUP_V6, iface.name, e),
        }
    }
    if joined == 0 {
        return Err(io::Error::other(DiscoveryError::JoinFailed));
    }

    if pinned {
        if let Some(iface) = interfaces.first() {
            socket.set_multicast_if_v6(iface.index)?;
        }
    }

    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
pub mod testing {
    use parking_lot::Mutex;
    use super::*;

    /// Collects outbound messages instead of sending them
    #[derive(Default)]
    pub struct RecordingMulticaster {
        sent: Mutex<Vec<Message>>,
    }

    impl RecordingMulticaster {
        pub fn sent(&self) -> Vec<Message> {
            self.sent.lock().clone()
        }

        pub fn take(&self) -> Vec<Message> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    #[async_trait]
    impl Multicaster for RecordingMulticaster {
        async fn multicast(&self, msg: &Message) {
            self.sent.lock().push(msg.clone());
        }
    }
}
