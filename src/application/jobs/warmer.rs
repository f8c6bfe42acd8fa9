//! Scheduled warming worker.
//!
//! [`WarmerWorker::start`] spawns a task that runs one warming cycle per
//! interval. [`WarmerHandle::stop`] signals it through a watch channel; the
//! signal is observed between cycles, so a running cycle always completes.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::infra::cache_warmer::CacheWarmer;

pub struct WarmerWorker;

impl WarmerWorker {
    /// Spawn the worker. The first cycle runs one full interval after start.
    pub fn start(warmer: CacheWarmer) -> WarmerHandle {
        let period = warmer.config().interval;
        let (shutdown, signal) = watch::channel(false);
        let join = tokio::spawn(run(warmer, period, signal));
        info!(interval_secs = period.as_secs(), "Cache warmer started");
        WarmerHandle { shutdown, join }
    }
}

/// Owner of a running [`WarmerWorker`].
pub struct WarmerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WarmerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the worker and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "Cache warmer task ended abnormally");
        }
        info!("Cache warmer stopped");
    }
}

async fn run(warmer: CacheWarmer, period: Duration, mut signal: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // Skip the first immediate tick

    loop {
        tokio::select! {
            biased;
            changed = signal.changed() => {
                if changed.is_err() || *signal.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let summary = warmer.run_cycle().await;
                debug!(
                    warmed = summary.warmed,
                    missing = summary.missing,
                    failed = summary.failed,
                    "Warming cycle finished"
                );
            }
        }
    }
}
