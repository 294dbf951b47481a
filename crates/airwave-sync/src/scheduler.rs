//! # Periodic Resync
//!
//! Issues a resync trigger every poll interval until shut down. The first
//! tick fires one interval after spawning; app start covers time zero.
//!
//! A tick waits for its resync to finish before the next one is scheduled,
//! so slow cycles delay the poll instead of piling up.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::coordinator::SyncCoordinator;
use crate::error::{SyncError, SyncResult};

/// Background task driving periodic resyncs.
pub struct ResyncScheduler {
    coordinator: SyncCoordinator,
    period: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping the scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the loop and waits for it to exit. An in-flight resync finishes first.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        self.join
            .await
            .map_err(|e| SyncError::Internal(format!("scheduler task failed: {}", e)))
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl ResyncScheduler {
    /// Spawns the scheduler using the coordinator's configured poll interval.
    pub fn spawn(coordinator: SyncCoordinator) -> SchedulerHandle {
        let period = coordinator.config().poll_interval();
        Self::spawn_with_period(coordinator, period)
    }

    pub fn spawn_with_period(coordinator: SyncCoordinator, period: Duration) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let scheduler = ResyncScheduler {
            coordinator,
            period,
            shutdown_rx,
        };
        let join = tokio::spawn(scheduler.run());

        SchedulerHandle { shutdown_tx, join }
    }

    async fn run(mut self) {
        info!(period_ms = self.period.as_millis() as u64, "Resync scheduler starting");

        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!("Periodic resync");
                    match self.coordinator.resync().wait().await {
                        Ok(report) if !report.all_succeeded() => {
                            warn!("Periodic resync finished with failures");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Periodic resync failed"),
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Resync scheduler shutting down");
                    break;
                }
            }
        }

        info!("Resync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SyncConfig, SyncMode};
    use crate::remote::InMemoryRemoteStore;
    use airwave_db::{Database, DbConfig};
    use std::sync::Arc;

    async fn offline_coordinator() -> SyncCoordinator {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = SyncConfig::default();
        config.sync.mode = SyncMode::Offline;

        SyncCoordinator::builder(config)
            .with_database(db)
            .with_remote(Arc::new(InMemoryRemoteStore::new()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_scheduler_issues_resyncs_until_shutdown() {
        let coordinator = offline_coordinator().await;
        let handle = ResyncScheduler::spawn_with_period(coordinator.clone(), Duration::from_millis(10));

        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.status().await.triggers_handled < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        handle.shutdown().await.unwrap();
        coordinator.wait_idle().await;

        let handled = coordinator.status().await.triggers_handled;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.status().await.triggers_handled, handled);
    }
}
