//! Periodic lock expiry and trash purging.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::repository::Repository;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub locks_expired: usize,
    pub trash_purged: usize,
}

/// Handle to the background maintenance loop.
pub struct MaintenanceTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MaintenanceTask {
    /// Run [`run_once`](Self::run_once) every `period` until stopped. The
    /// first run happens immediately.
    pub fn spawn(repository: Arc<Repository>, period: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_secs = period.as_secs(), "maintenance task started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::run_once(&repository).await;
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("maintenance task stopped");
        });
        Self { stop, handle }
    }

    /// Expire locks and purge trash once. Failures are logged, never
    /// propagated.
    pub async fn run_once(repository: &Repository) -> MaintenanceReport {
        let now = Utc::now();
        let mut report = MaintenanceReport::default();
        match repository.expire_locks(now).await {
            Ok(n) => report.locks_expired = n,
            Err(e) => error!(error = %e, "lock expiry failed"),
        }
        match repository.purge_trash(now).await {
            Ok(n) => report.trash_purged = n,
            Err(e) => error!(error = %e, "trash purge failed"),
        }
        if report != MaintenanceReport::default() {
            info!(locks_expired = report.locks_expired, trash_purged = report.trash_purged, "maintenance run");
        } else {
            debug!("maintenance run found nothing to do");
        }
        report
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop.send(true);
        self.handle.await?;
        Ok(())
    }
}
