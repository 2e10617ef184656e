use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    config::{BatchLimits, MaintenanceConfig},
    contracts::{Changer, Cleaner},
    error::{QueueError, QueueResult},
};

/// Outcome of one recovery tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeReport {
    /// PROCESSING -> RETRY by timeout
    pub recovered: usize,
    /// RETRY -> READY
    pub requeued: usize,
}

/// Outcome of one cleanup tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub without_attempts: usize,
    pub completed: usize,
    pub broken: usize,
}

/// Periodic recovery sweeps and cleanup
pub struct Maintenance {
    changer: Arc<dyn Changer>,
    cleaner: Arc<dyn Cleaner>,
    limits: BatchLimits,
    config: MaintenanceConfig,
}

impl Maintenance {
    pub fn new(
        changer: Arc<dyn Changer>,
        cleaner: Arc<dyn Cleaner>,
        limits: BatchLimits,
        config: MaintenanceConfig,
    ) -> QueueResult<Self> {
        limits.validate()?;
        config.validate()?;
        Ok(Self {
            changer,
            cleaner,
            limits,
            config,
        })
    }

    /// Run one recovery cycle (for testing)
    ///
    /// Both sweeps run even if the first fails; the first error is returned.
    pub async fn run_change_cycle(&self) -> QueueResult<ChangeReport> {
        let recovered = self
            .changer
            .change_processing_to_retry_by_timeout(self.limits.change_processing_to_retry)
            .await;
        let requeued = self.changer.change_retry_to_ready(self.limits.change_retry_to_ready).await;

        Ok(ChangeReport {
            recovered: recovered?.len(),
            requeued: requeued?.len(),
        })
    }

    /// Run one cleanup cycle (for testing)
    ///
    /// All three operations run even if one fails; the first error is returned.
    pub async fn run_clean_cycle(&self) -> QueueResult<CleanReport> {
        let without_attempts = self
            .cleaner
            .remove_items_without_attempts(self.limits.remove_items_without_attempts)
            .await;
        let completed = self.cleaner.remove_completed_items(self.limits.remove_completed_items).await;
        let broken = self.cleaner.remove_broken_items(self.limits.remove_broken_items).await;

        Ok(CleanReport {
            without_attempts: without_attempts?.len(),
            completed: completed?.len(),
            broken: broken?.len(),
        })
    }

    /// Start the recovery and cleanup background tasks
    pub fn spawn(self) -> MaintenanceHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let this = Arc::new(self);

        let change_task = {
            let this = this.clone();
            let period = this.config.change_interval;
            tokio::spawn(tick_loop("recovery", period, shutdown_rx.clone(), move || {
                let this = this.clone();
                async move {
                    let report = this.run_change_cycle().await?;
                    if report.recovered > 0 || report.requeued > 0 {
                        info!(
                            "Recovered {} timed out items, requeued {} retry items",
                            report.recovered, report.requeued
                        );
                    } else {
                        debug!("No items to recover");
                    }
                    Ok(())
                }
            }))
        };

        let clean_task = {
            let this = this.clone();
            let period = this.config.clean_interval;
            tokio::spawn(tick_loop("cleanup", period, shutdown_rx, move || {
                let this = this.clone();
                async move {
                    let report = this.run_clean_cycle().await?;
                    if report.without_attempts + report.completed + report.broken > 0 {
                        info!(
                            "Removed {} exhausted items, {} completed and {} broken archive entries",
                            report.without_attempts, report.completed, report.broken
                        );
                    } else {
                        debug!("Nothing to clean");
                    }
                    Ok(())
                }
            }))
        };

        MaintenanceHandle {
            shutdown_tx,
            join_handles: vec![change_task, clean_task],
        }
    }
}

async fn tick_loop<F, Fut>(name: &'static str, period: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut + Send,
    Fut: std::future::Future<Output = QueueResult<()>> + Send,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Starting {} task with interval: {:?}", name, period);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = tick().await {
                    warn!("Error during {}: {}", name, e);
                }
            }
        }
    }

    info!("Stopped {} task", name);
}

/// Handle for the maintenance background tasks
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop both tasks after their current tick
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);
        for join_handle in self.join_handles {
            join_handle
                .await
                .map_err(|e| QueueError::Internal(format!("Maintenance join error: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::{
        contracts::{Consumer, Producer},
        observability::NoopEmitter,
        queue::Queue,
        store::memory::MemoryBackend,
        types::{Item, ItemId, ItemStatus},
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    /// Timeout sweep always fails, retry sweep counts its calls
    #[derive(Default)]
    struct FlakyChanger {
        requeue_calls: AtomicUsize,
    }

    #[async_trait]
    impl Changer for FlakyChanger {
        async fn change_processing_to_retry_by_timeout(&self, _limit: u32) -> QueueResult<Vec<ItemId>> {
            Err(QueueError::Internal("connection reset".into()))
        }

        async fn change_retry_to_ready(&self, _limit: u32) -> QueueResult<Vec<ItemId>> {
            self.requeue_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ItemId(3)])
        }
    }

    #[tokio::test]
    async fn test_change_cycle_runs_both_sweeps_on_failure() {
        let changer = Arc::new(FlakyChanger::default());
        let queue = Queue::new(MemoryBackend::new().storage()).with_events(Arc::new(NoopEmitter));
        let maintenance = Maintenance::new(
            changer.clone(),
            Arc::new(queue.cleaner()),
            BatchLimits::default(),
            MaintenanceConfig::default(),
        )
        .unwrap();

        let err = maintenance.run_change_cycle().await.unwrap_err();
        assert!(matches!(err, QueueError::Internal(_)));
        assert_eq!(changer.requeue_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_spawned_tasks_recover_items() {
        let backend = MemoryBackend::new();
        let queue = Queue::new(backend.storage()).with_events(Arc::new(NoopEmitter));
        queue.producer().append(Item::new(1u64, 1)).await.unwrap();
        queue.consumer().read_items(1).await.unwrap();

        let config = MaintenanceConfig {
            change_interval: Duration::from_millis(10),
            clean_interval: Duration::from_millis(10),
        };
        let handle = Maintenance::new(
            Arc::new(queue.changer().with_retry_timeout(Duration::ZERO)),
            Arc::new(queue.cleaner()),
            BatchLimits::default(),
            config,
        )
        .unwrap()
        .spawn();

        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.snapshot().await.status_of(ItemId(1)) != Some(ItemStatus::Retry) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        handle.shutdown().await.unwrap();

        assert!(logs_contain("Starting recovery task"));
        assert!(logs_contain("Starting cleanup task"));
        assert!(logs_contain("Recovered 1 timed out items"));
        assert!(logs_contain("Stopped recovery task"));
    }

    #[tokio::test]
    async fn test_zero_intervals_are_rejected() {
        let queue = Queue::new(MemoryBackend::new().storage()).with_events(Arc::new(NoopEmitter));
        let config = MaintenanceConfig {
            clean_interval: Duration::ZERO,
            ..MaintenanceConfig::default()
        };

        let result = Maintenance::new(
            Arc::new(queue.changer()),
            Arc::new(queue.cleaner()),
            BatchLimits::default(),
            config,
        );
        assert!(matches!(result, Err(QueueError::Config { .. })));

        let limits = BatchLimits {
            change_retry_to_ready: 0,
            ..BatchLimits::default()
        };
        let result = Maintenance::new(
            Arc::new(queue.changer()),
            Arc::new(queue.cleaner()),
            limits,
            MaintenanceConfig::default(),
        );
        assert!(result.is_err());
    }
}
