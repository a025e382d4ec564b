use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use hickory_proto::op::{Message, MessageType};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use shared::types::ServiceEntry;
use crate::cache::membership::MembershipCache;
use crate::local::LocalAddresses;
use crate::mdns::records;
use crate::mdns::transport::Multicaster;

/// What the resolver did with one observed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No address yet; queued for a targeted lookup
    Unresolved,
    /// Resolved to one of our own addresses; dropped
    Local,
    /// Passed to the membership cache
    Member,
}

/// Browses the cluster service type and turns answers into membership.
pub struct Resolver {
    service: String,
    domain: String,
    cache: Arc<MembershipCache>,
    local: Arc<LocalAddresses>,
    multicaster: Arc<dyn Multicaster>,
    lookups: flume::Sender<ServiceEntry>,
}

impl Resolver {
    /// Returns the resolver and the receiving end of its lookup queue
    pub fn new(
        service: &str,
        domain: &str,
        cache: Arc<MembershipCache>,
        local: Arc<LocalAddresses>,
        multicaster: Arc<dyn Multicaster>,
    ) -> (Self, flume::Receiver<ServiceEntry>) {
        let (lookups, lookup_rx) = flume::unbounded();
        let resolver = Self {
            service: service.to_string(),
            domain: domain.to_string(),
            cache,
            local,
            multicaster,
            lookups,
        };
        (resolver, lookup_rx)
    }

    pub async fn browse(&self) {
        match records::browse_query(&self.service, &self.domain) {
            Ok(query) => self.multicaster.multicast(&query).await,
            Err(e) => tracing::error!("Failed to build browse query for {}: {}", self.service, e),
        }
    }

    pub async fn lookup(&self, entry: &ServiceEntry) {
        tracing::debug!("Lookup: {}", entry.instance_name());
        match records::lookup_query(&entry.instance, &entry.service, &entry.domain) {
            Ok(query) => self.multicaster.multicast(&query).await,
            Err(e) => tracing::error!("Failed to build lookup query for {}: {}", entry.instance_name(), e),
        }
    }

    /// Classify every entry carried by an inbound response. Queries are ignored.
    pub fn handle_response(&self, msg: &Message) {
        if msg.message_type() != MessageType::Response {
            return;
        }

        let entries = match records::parse_entries(msg, &self.service, &self.domain) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read service entries: {}", e);
                return;
            }
        };

        for entry in entries {
            self.classify(entry);
        }
    }

    pub fn classify(&self, entry: ServiceEntry) -> Classification {
        let Some(address) = entry.address() else {
            if let Err(e) = self.lookups.send(entry) {
                tracing::error!("Failed to queue lookup: {}", e);
            }
            return Classification::Unresolved;
        };

        if self.local.contains(&address) {
            tracing::trace!("Ignoring own entry {}", entry.instance_name());
            return Classification::Local;
        }

        tracing::debug!("Resolved {} at {} (ttl {})", entry.instance_name(), address, entry.ttl);
        self.cache.observe(entry);
        Classification::Member
    }
}

/// Browse at startup, then again every `interval` so live peers keep
/// refreshing their cache entries.
pub async fn run_browser(resolver: Arc<Resolver>, interval: Duration, cancel: CancellationToken) {
    tracing::info!("Starting mDNS browser for {}.{}", resolver.service, resolver.domain);

    let mut browse_interval = tokio::time::interval(interval);
    browse_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = browse_interval.tick() => resolver.browse().await,
            _ = cancel.cancelled() => {
                tracing::info!("mDNS browser shutting down");
                break;
            }
        }
    }
}

/// Serve the lookup queue one request at a time. The same instance is not
/// queried again within `holdoff`, so a peer that answers without addresses
/// cannot start a query storm.
pub async fn run_lookups(
    resolver: Arc<Resolver>,
    rx: flume::Receiver<ServiceEntry>,
    holdoff: Duration,
    cancel: CancellationToken,
) {
    let mut last_lookup: HashMap<String, Instant> = HashMap::new();

    loop {
        tokio::select! {
            request = rx.recv_async() => {
                let Ok(entry) = request else {
                    break;
                };

                let now = Instant::now();
                let name = entry.instance_name();
                if last_lookup.get(&name).is_some_and(|at| now.duration_since(*at) < holdoff) {
                    tracing::trace!("Skipping repeated lookup of {}", name);
                    continue;
                }
                last_lookup.retain(|_, at| now.duration_since(*at) < holdoff);
                last_lookup.insert(name, now);

                resolver.lookup(&entry).await;
            }
            _ = cancel.cancelled() => {
                tracing::info!("Lookup queue shutting down");
                break;
            }
        }
    }
}
