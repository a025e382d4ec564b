use std::net::IpAddr;
use shared::protocol::{CLUSTER_DOMAIN, RECORD_TTL};
use shared::types::{trim_dot, ServiceEntry};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::local;

/// Build the entry this node advertises.
///
/// With `host` and `address` configured the entry is a proxy for that host.
/// Otherwise the host is the system hostname and its addresses come from the
/// configured interface, or from resolving the hostname.
pub async fn build_entry(config: &DiscoveryConfig) -> Result<ServiceEntry> {
    let instance = if config.instance.trim().is_empty() {
        system_hostname()?
    } else {
        config.instance.trim().to_string()
    };

    let mut entry = ServiceEntry::new(&instance, &config.service, &config.domain);
    entry.port = config.port;
    entry.text = config.text.clone();
    entry.ttl = RECORD_TTL;
    validate(&mut entry)?;

    match (&config.host, &config.address) {
        (Some(host), Some(address)) => {
            let ip: IpAddr = address
                .trim()
                .parse()
                .map_err(|_| DiscoveryError::InvalidAddress(address.clone()))?;
            entry.host_name = proxy_host_name(host, &entry.domain)?;
            assign_addresses(&mut entry, [ip]);
        }
        (None, Some(_)) => return Err(DiscoveryError::MissingHost),
        (host, None) => {
            let host = match host {
                Some(host) => host.clone(),
                None => system_hostname()?,
            };
            entry.host_name = format!("{}.", trim_dot(&host));

            let addrs = match config.interface() {
                Some(name) => local::find_interface(name)?.addrs,
                None => resolve_host_addresses(&entry.host_name, &entry.domain).await?,
            };
            assign_addresses(&mut entry, addrs);
        }
    }

    tracing::info!(
        "Advertising {} on {} port {} ({:?}, {:?})",
        entry.instance_name(),
        entry.host_name,
        entry.port,
        entry.addr_ipv4,
        entry.addr_ipv6
    );

    Ok(entry)
}

fn validate(entry: &mut ServiceEntry) -> Result<()> {
    if entry.instance.is_empty() {
        return Err(DiscoveryError::MissingInstance);
    }
    if entry.service.is_empty() {
        return Err(DiscoveryError::MissingService);
    }
    if entry.domain.is_empty() {
        entry.domain = CLUSTER_DOMAIN.to_string();
    }
    if entry.port == 0 {
        return Err(DiscoveryError::MissingPort);
    }
    Ok(())
}

fn system_hostname() -> Result<String> {
    let host = hostname::get().map_err(|_| DiscoveryError::MissingHost)?;
    let host = host.to_string_lossy().trim().to_string();
    if host.is_empty() {
        return Err(DiscoveryError::MissingHost);
    }
    Ok(host)
}

/// Proxied hosts live under the service domain
fn proxy_host_name(host: &str, domain: &str) -> Result<String> {
    let host = trim_dot(host);
    if host.is_empty() {
        return Err(DiscoveryError::MissingHost);
    }
    if host.ends_with(trim_dot(domain)) {
        Ok(format!("{}.", host))
    } else {
        Ok(format!("{}.{}.", host, trim_dot(domain)))
    }
}

/// Resolve `host`, then `host.domain`, then fall back to every non-loopback
/// interface address. A lookup yielding only loopback addresses counts as a miss.
pub async fn resolve_host_addresses(host: &str, domain: &str) -> Result<Vec<IpAddr>> {
    let host = trim_dot(host);
    for name in [host.to_string(), format!("{}.{}", host, trim_dot(domain))] {
        match lookup(&name).await {
            Ok(addrs) if !addrs.is_empty() => return Ok(addrs),
            Ok(_) => tracing::debug!("{} resolves only to loopback", name),
            Err(e) => tracing::debug!("Failed to resolve {}: {}", name, e),
        }
    }

    let addrs = local::non_loopback_addresses()?;
    if addrs.is_empty() {
        return Err(DiscoveryError::NoHostAddress(host.to_string()));
    }
    Ok(addrs)
}

async fn lookup(name: &str) -> std::io::Result<Vec<IpAddr>> {
    Ok(tokio::net::lookup_host((name, 0))
        .await?
        .map(|addr| addr.ip())
        .filter(|ip| !ip.is_loopback())
        .collect())
}

/// First IPv4 and first IPv6 address win
fn assign_addresses(entry: &mut ServiceEntry, addrs: impl IntoIterator<Item = IpAddr>) {
    for addr in addrs {
        match addr {
            IpAddr::V4(v4) if entry.addr_ipv4.is_none() => entry.addr_ipv4 = Some(v4),
            IpAddr::V6(v6) if entry.addr_ipv6.is_none() => entry.addr_ipv6 = Some(v6),
            _ => {}
        }
    }
}
