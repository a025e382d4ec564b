use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use crate::cache::membership::MembershipCache;

/// Keepalive loop: every `period`, drop members not seen for twice that long.
pub async fn run(cache: Arc<MembershipCache>, period: Duration, cancel: CancellationToken) {
    let timeout = period.saturating_mul(2);

    let mut sweep_interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sweep_interval.tick() => {
                let expired = cache.sweep(timeout);
                if !expired.is_empty() {
                    tracing::debug!("Keepalive sweep expired {} member(s)", expired.len());
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Keepalive sweep shutting down");
                break;
            }
        }
    }
}
