//! Periodic eviction of idle engine instances.
//!
//! Each sweep also tops pinned pools back up to their minimum, so a pool
//! replaced after a fault is warm again by the next request.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{EvictionPolicy, PoolRegistry};

/// Background sweep over a [`PoolRegistry`].
pub struct EvictionTask {
    registry: Arc<PoolRegistry>,
    interval: Duration,
    idle_timeout: Duration,
}

impl EvictionTask {
    pub fn new(registry: Arc<PoolRegistry>, interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            idle_timeout,
        }
    }

    /// Engines must sit idle a whole interval before they are trimmed.
    fn policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            engine_idle: self.interval,
            pool_idle: self.idle_timeout,
        }
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub async fn run_until(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            idle_timeout_ms = self.idle_timeout.as_millis() as u64,
            "Pool eviction task started"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.registry.evict(self.policy());
                    if report.instances_evicted > 0 || report.pools_removed > 0 {
                        info!(
                            instances_evicted = report.instances_evicted,
                            pools_removed = report.pools_removed,
                            pools = self.registry.len(),
                            "Evicted idle engine instances"
                        );
                    } else {
                        debug!(pools = self.registry.len(), "Eviction sweep found nothing to do");
                    }
                    self.rewarm_pinned(&shutdown).await;
                }
            }
        }

        info!("Pool eviction task stopped");
    }

    async fn rewarm_pinned(&self, shutdown: &CancellationToken) {
        let min = self.registry.config().min_instances;
        for pool in self.registry.pinned_pools() {
            // Only pools below their minimum, such as one rebuilt after a fault
            if pool.stats().total >= min {
                continue;
            }
            let warmed = tokio::select! {
                _ = shutdown.cancelled() => return,
                warmed = pool.warm(min) => warmed,
            };
            match warmed {
                Ok(0) => {}
                Ok(n) => debug!(instances = n, scale = pool.scale(), "Rewarmed pinned pool"),
                Err(e) => warn!(error = %e, scale = pool.scale(), "Rewarming pinned pool failed"),
            }
        }
    }
}
