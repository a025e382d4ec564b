//! Local network interfaces and the addresses this node answers to.

use std::collections::HashSet;
use std::io;
use std::net::IpAddr;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use shared::types::ServiceEntry;
use crate::error::{DiscoveryError, Result};

/// A network interface with the addresses assigned to it.
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub index: u32,
    pub addrs: Vec<IpAddr>,
}

impl Interface {
    pub fn ipv4(&self) -> impl Iterator<Item = std::net::Ipv4Addr> + '_ {
        self.addrs.iter().filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
    }

    pub fn ipv6(&self) -> impl Iterator<Item = std::net::Ipv6Addr> + '_ {
        self.addrs.iter().filter_map(|addr| match addr {
            IpAddr::V6(v6) => Some(*v6),
            IpAddr::V4(_) => None,
        })
    }
}

/// Enumerate all interfaces. The OS may list an interface once per address,
/// so entries sharing a name are merged.
pub fn interfaces() -> Result<Vec<Interface>> {
    let raw = NetworkInterface::show().map_err(|e| DiscoveryError::Io(io::Error::other(e)))?;

    let mut merged: Vec<Interface> = Vec::new();
    for iface in raw {
        let addrs = iface.addr.iter().map(|addr| match addr {
            Addr::V4(v4) => IpAddr::V4(v4.ip),
            Addr::V6(v6) => IpAddr::V6(v6.ip),
        });

        match merged.iter_mut().find(|i| i.name == iface.name) {
            Some(existing) => existing.addrs.extend(addrs),
            None => merged.push(Interface {
                name: iface.name.clone(),
                index: iface.index,
                addrs: addrs.collect(),
            }),
        }
    }

    Ok(merged)
}

pub fn find_interface(name: &str) -> Result<Interface> {
    interfaces()?
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| DiscoveryError::UnknownInterface(name.to_string()))
}

/// All non-loopback addresses on this host
pub fn non_loopback_addresses() -> Result<Vec<IpAddr>> {
    Ok(interfaces()?
        .into_iter()
        .flat_map(|iface| iface.addrs)
        .filter(|addr| !addr.is_loopback())
        .collect())
}

/// Addresses that identify this node; peers observed at one of these are
/// never reported as members.
#[derive(Debug, Clone, Default)]
pub struct LocalAddresses {
    addrs: HashSet<IpAddr>,
}

impl LocalAddresses {
    /// Snapshot the addresses of every local interface
    pub fn discover() -> Self {
        match interfaces() {
            Ok(ifaces) => ifaces.into_iter().flat_map(|iface| iface.addrs).collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate local addresses: {}", e);
                Self::default()
            }
        }
    }

    /// Add the addresses advertised for this node
    pub fn include_entry(&mut self, entry: &ServiceEntry) {
        self.addrs.extend(entry.addr_ipv4.map(IpAddr::V4));
        self.addrs.extend(entry.addr_ipv6.map(IpAddr::V6));
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.addrs.contains(addr)
    }
}

impl FromIterator<IpAddr> for LocalAddresses {
    fn from_iter<I: IntoIterator<Item = IpAddr>>(iter: I) -> Self {
        Self { addrs: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_include_entry() {
        let mut local: LocalAddresses = ["127.0.0.1".parse().unwrap()].into_iter().collect();
        let mut entry = ServiceEntry::new("node1", "_docker._cluster", "local");
        entry.addr_ipv4 = Some(Ipv4Addr::new(10, 0, 0, 1));
        entry.addr_ipv6 = Some("fd00::1".parse().unwrap());

        assert!(!local.contains(&"10.0.0.1".parse().unwrap()));
        local.include_entry(&entry);
        assert!(local.contains(&"10.0.0.1".parse().unwrap()));
        assert!(local.contains(&"fd00::1".parse().unwrap()));
        assert!(local.contains(&"127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_interface_families() {
        let iface = Interface {
            name: "eth0".to_string(),
            index: 2,
            addrs: vec!["10.0.0.1".parse().unwrap(), "fe80::1".parse().unwrap()],
        };
        assert_eq!(iface.ipv4().collect::<Vec<_>>(), vec![Ipv4Addr::new(10, 0, 0, 1)]);
        assert_eq!(iface.ipv6().count(), 1);
    }
}
