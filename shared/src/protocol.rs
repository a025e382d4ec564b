use std::net::{Ipv4Addr, Ipv6Addr};

/// mDNS UDP port
pub const MDNS_PORT: u16 = 5353;

/// mDNS multicast groups
pub const MDNS_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// Service type and domain every cluster node advertises under
pub const CLUSTER_SERVICE: &str = "_docker._cluster";
pub const CLUSTER_DOMAIN: &str = "local";
pub const CLUSTER_SERVICE_PORT: u16 = 9999;

/// DNS-SD service type enumeration name, prefixed to the domain
pub const DNS_SD_META: &str = "_services._dns-sd._udp";

/// TTL for PTR/SRV/TXT records
pub const RECORD_TTL: u32 = 3200;

/// TTL for A/AAAA records in lookup answers
pub const ADDRESS_TTL: u32 = 120;

/// TTL announcing that a record is withdrawn
pub const GOODBYE_TTL: u32 = 0;
