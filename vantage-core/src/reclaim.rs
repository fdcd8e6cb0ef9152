//! Periodic stale-claim recovery.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::JobQueue;

/// Sweeps every owner's in-flight list on its own timer, independent of
/// any worker's lifecycle, so a crashed or hung worker's claims are not
/// lost forever.
///
/// Reclaim is best-effort and may duplicate work: a merely-slow original
/// worker is not killed or signalled, and both runs may complete and write
/// results. The findings store tolerates that by construction.
pub struct StaleJobReclaimer {
    queue: Arc<dyn JobQueue>,
    stale_after: chrono::Duration,
    sweep_interval: Duration,
    shutdown: CancellationToken,
}

impl fmt::Debug for StaleJobReclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaleJobReclaimer")
            .field("stale_after", &self.stale_after)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

impl StaleJobReclaimer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        stale_after: chrono::Duration,
        sweep_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            stale_after,
            sweep_interval,
            shutdown,
        }
    }

    pub async fn run(&self) {
        info!(
            stale_after_secs = self.stale_after.num_seconds(),
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "stale job reclaimer started"
        );
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("reclaimer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.queue.reclaim_stale(self.stale_after).await {
                        Ok(0) => {
                            debug!("reclaim sweep found no stale jobs");
                        }
                        Ok(count) => {
                            info!(count, "requeued stale jobs");
                        }
                        Err(err) => {
                            warn!(%err, "reclaim sweep failed");
                        }
                    }
                }
            }
        }
    }
}
