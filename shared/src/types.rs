use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use serde::{Serialize, Deserialize};

use crate::protocol::DNS_SD_META;

/// One advertised or observed DNS-SD service instance.
///
/// Entries are built once and replaced, never mutated, when a newer
/// observation of the same instance arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Instance label, e.g. "node1"
    pub instance: String,

    /// Service type, e.g. "_docker._cluster"
    pub service: String,

    /// Domain, e.g. "local"
    pub domain: String,

    /// Fully-qualified host name with a trailing dot
    pub host_name: String,

    /// Service port
    pub port: u16,

    /// TXT record payload, `key=value` strings in wire order
    pub text: Vec<String>,

    pub addr_ipv4: Option<Ipv4Addr>,
    pub addr_ipv6: Option<Ipv6Addr>,

    /// TTL in seconds; 0 means the records were withdrawn
    pub ttl: u32,
}

impl ServiceEntry {
    pub fn new(instance: &str, service: &str, domain: &str) -> Self {
        Self {
            instance: instance.to_string(),
            service: trim_dot(service).to_string(),
            domain: trim_dot(domain).to_string(),
            host_name: String::new(),
            port: 0,
            text: Vec::new(),
            addr_ipv4: None,
            addr_ipv6: None,
            ttl: 0,
        }
    }

    /// Browsing name, e.g. "_docker._cluster.local."
    pub fn service_name(&self) -> String {
        format!("{}.{}.", trim_dot(&self.service), trim_dot(&self.domain))
    }

    /// Fully-qualified instance name, e.g. "node1._docker._cluster.local."
    pub fn instance_name(&self) -> String {
        format!("{}.{}", trim_dot(&self.instance), self.service_name())
    }

    /// DNS-SD meta name, e.g. "_services._dns-sd._udp.local."
    pub fn service_type_name(&self) -> String {
        format!("{}.{}.", DNS_SD_META, trim_dot(&self.domain))
    }

    /// An entry is resolved once at least one address is known
    pub fn is_resolved(&self) -> bool {
        self.addr_ipv4.is_some() || self.addr_ipv6.is_some()
    }

    /// Membership address: IPv4 when known, IPv6 otherwise
    pub fn address(&self) -> Option<IpAddr> {
        self.addr_ipv4
            .map(IpAddr::V4)
            .or_else(|| self.addr_ipv6.map(IpAddr::V6))
    }

    pub fn is_goodbye(&self) -> bool {
        self.ttl == 0
    }
}

/// A membership transition reported to the cluster manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChange {
    pub address: String,
    pub added: bool,
}

impl MembershipChange {
    pub fn added(address: impl Into<String>) -> Self {
        Self { address: address.into(), added: true }
    }

    pub fn removed(address: impl Into<String>) -> Self {
        Self { address: address.into(), added: false }
    }
}

/// Strip leading and trailing dots from a DNS name
pub fn trim_dot(s: &str) -> &str {
    s.trim_matches('.')
}
