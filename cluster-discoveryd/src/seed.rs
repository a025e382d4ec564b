//! Statically configured cluster members.
//!
//! Seeds are trusted rather than discovered: they go straight to the sink and
//! never enter the membership cache, so keepalive never expires them.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use crate::error::{DiscoveryError, Result};
use crate::local::LocalAddresses;
use crate::sink::MembershipSink;

/// Parse a comma-separated address list. Blank entries are skipped and
/// duplicates collapse to their first occurrence.
pub fn parse_static_peers(list: &str) -> Result<Vec<IpAddr>> {
    let mut peers = Vec::new();
    for member in list.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        let addr: IpAddr = member
            .parse()
            .map_err(|_| DiscoveryError::InvalidPeer(member.to_string()))?;
        if !peers.contains(&addr) {
            peers.push(addr);
        }
    }
    Ok(peers)
}

/// Report every seed that is not one of our own addresses. Returns the
/// number of members reported.
pub fn announce(peers: &[IpAddr], local: &LocalAddresses, sink: &dyn MembershipSink) -> usize {
    let mut reported = 0;
    for peer in peers {
        if local.contains(peer) {
            tracing::debug!("Skipping own address {} in static peers", peer);
            continue;
        }
        sink.new_member(&peer.to_string());
        reported += 1;
    }
    reported
}

/// Wait `delay` for the responder to settle, then announce the seeds once.
pub async fn run(
    peers: Vec<IpAddr>,
    local: Arc<LocalAddresses>,
    sink: Arc<dyn MembershipSink>,
    delay: Duration,
    cancel: CancellationToken,
) {
    if peers.is_empty() {
        return;
    }

    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel.cancelled() => return,
    }

    let reported = announce(&peers, &local, sink.as_ref());
    tracing::info!("Merged {} static cluster member(s)", reported);
}
