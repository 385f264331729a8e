//! Periodic rate sync.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use ratecache_core::RateCacheService;

/// Enqueues a refresh on a fixed interval until stopped.
pub struct SyncScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    /// Start scheduling. The first refresh is queued one `period` from now.
    pub fn start(service: Arc<RateCacheService>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        service.schedule_refresh();
                        info!("Scheduled currency rates sync task added to queue");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        info!(period_secs = period.as_secs(), "Sync scheduler started");
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop scheduling and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Sync scheduler terminated abnormally");
        }
        info!("Sync scheduler stopped");
    }
}
