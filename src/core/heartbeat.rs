//! # HeartbeatMonitor: reclaims leases of silent owners.
//!
//! Every `heartbeat_interval` the monitor asks the registry to expire leases
//! whose owner has not renewed for longer than `heartbeat_timeout`. Expiry is
//! atomic per entry, so it races safely with concurrent renew/release.
//!
//! With the defaults (10s timeout, 5s sweep) a silent owner loses its lease
//! between 10s and 15s after its last heartbeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::registry::SessionRegistry;

/// Periodic lease expiry driver.
pub(crate) struct HeartbeatMonitor {
    registry: Arc<SessionRegistry>,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub(crate) fn new(registry: Arc<SessionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Sweeps every `interval` until `token` is cancelled.
    pub(crate) async fn run(self, token: CancellationToken) {
        let period = self.interval.max(Duration::from_millis(1));
        let mut tick = time::interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    let evicted = self.registry.expire_stale_leases(Instant::now()).await;
                    if !evicted.is_empty() {
                        tracing::debug!(count = evicted.len(), "heartbeat sweep evicted leases");
                    }
                }
            }
        }
    }
}
