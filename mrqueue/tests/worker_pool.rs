use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mrqueue::{
    store::memory::{MemoryBackend, MemoryItemStore, MemoryTx},
    BoxError, Consumer, HandleError, Item, ItemHandler, ItemId, ItemStatus, ItemStore, LiveMetrics, Maintenance,
    MaintenanceConfig, ManualClock, Producer, Queue, QueueConfig, WorkerConfig, WorkerPool,
};

fn fast_workers(workers: usize) -> WorkerConfig {
    WorkerConfig {
        workers,
        poll_interval: Duration::from_millis(5),
        poll_jitter: Duration::from_millis(2),
        error_backoff: Duration::from_millis(5),
        handle_timeout: Duration::from_millis(200),
    }
}

async fn wait_until<F>(backend: &MemoryBackend, done: F)
where
    F: Fn(&mrqueue::store::memory::MemoryState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if done(&backend.snapshot().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Succeeds for even IDs, fails for odd ones, and enqueues a delayed receipt on commit
#[derive(Default)]
struct ParityHandler {
    seen: Mutex<HashMap<ItemId, usize>>,
}

#[async_trait]
impl ItemHandler<MemoryBackend> for ParityHandler {
    async fn handle(&self, id: ItemId) -> Result<(), HandleError> {
        *self.seen.lock().entry(id).or_default() += 1;
        if id.get() % 2 == 0 {
            Ok(())
        } else {
            Err(HandleError::failed(format!("odd item {id}")))
        }
    }

    async fn pre_commit(&self, tx: &mut MemoryTx, id: ItemId) -> Result<(), BoxError> {
        let receipt = Item::new(id.get() + 1000, 1).with_ready_delay(Duration::from_secs(3600));
        MemoryItemStore.insert(tx, &[receipt]).await?;
        Ok(())
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_pool_commits_and_rejects() {
    let backend = MemoryBackend::new();
    let metrics = Arc::new(LiveMetrics::new());
    let queue = Queue::new(backend.storage()).with_events(metrics.clone());

    let items: Vec<Item> = (1..=6u64).map(|id| Item::new(id, 3)).collect();
    queue.producer().appends(&items).await.unwrap();

    let handler = Arc::new(ParityHandler::default());
    let pool = WorkerPool::spawn(Arc::new(queue.consumer()), handler.clone(), 2, fast_workers(3)).unwrap();
    assert_eq!(pool.worker_count(), 3);

    wait_until(&backend, |state| {
        (1..=6u64).all(|id| state.is_completed(ItemId(id)) || state.status_of(ItemId(id)) == Some(ItemStatus::Retry))
    })
    .await;
    pool.shutdown().await.unwrap();

    let state = backend.snapshot().await;
    for id in [2u64, 4, 6] {
        assert!(state.is_completed(ItemId(id)));
        assert_eq!(state.status_of(ItemId(id + 1000)), Some(ItemStatus::Ready));
    }
    for id in [1u64, 3, 5] {
        assert_eq!(state.status_of(ItemId(id)), Some(ItemStatus::Retry));
        assert_eq!(state.attempts_of(ItemId(id)), Some(2));
        assert_eq!(state.broken_entries(ItemId(id))[0].error, format!("odd item {id}"));
    }
    assert!(handler.seen.lock().values().all(|calls| *calls == 1));
    assert_eq!(metrics.items_committed(), 3);
    assert_eq!(metrics.items_rejected(), 3);
}

/// Refuses to start work the first time it sees an item
#[derive(Default)]
struct ReluctantHandler {
    refused: Mutex<Vec<ItemId>>,
    calls: AtomicUsize,
}

#[async_trait]
impl ItemHandler<MemoryBackend> for ReluctantHandler {
    async fn handle(&self, id: ItemId) -> Result<(), HandleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut refused = self.refused.lock();
        if refused.contains(&id) {
            Ok(())
        } else {
            refused.push(id);
            Err(HandleError::not_started("payload not loaded yet"))
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_not_started_items_are_cancelled_without_losing_attempts() {
    let backend = MemoryBackend::new();
    let queue = Queue::new(backend.storage());
    queue.producer().append(Item::new(1u64, 1)).await.unwrap();

    let handler = Arc::new(ReluctantHandler::default());
    let pool = WorkerPool::spawn(Arc::new(queue.consumer()), handler.clone(), 1, fast_workers(1)).unwrap();
    wait_until(&backend, |state| state.is_completed(ItemId(1))).await;
    pool.shutdown().await.unwrap();

    assert_eq!(backend.snapshot().await.broken_count(), 0);
    // One refusal, one idle pause, one successful run
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
}

/// Never manages to start work
#[derive(Default)]
struct StuckHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl ItemHandler<MemoryBackend> for StuckHandler {
    async fn handle(&self, _id: ItemId) -> Result<(), HandleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandleError::not_started("payload unavailable"))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_batches_wait_for_next_poll() {
    let backend = MemoryBackend::new();
    let queue = Queue::new(backend.storage());
    queue.producer().append(Item::new(1u64, 1)).await.unwrap();

    let config = WorkerConfig {
        poll_interval: Duration::from_secs(1),
        poll_jitter: Duration::ZERO,
        ..fast_workers(1)
    };
    let handler = Arc::new(StuckHandler::default());
    let pool = WorkerPool::spawn(Arc::new(queue.consumer()), handler.clone(), 1, config).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    pool.shutdown().await.unwrap();

    let calls = handler.calls.load(Ordering::SeqCst);
    assert!((1..=2).contains(&calls), "handler ran {calls} times within one poll interval");
    assert_eq!(backend.snapshot().await.status_of(ItemId(1)), Some(ItemStatus::Ready));
}

struct SlowHandler;

#[async_trait]
impl ItemHandler<MemoryBackend> for SlowHandler {
    async fn handle(&self, _id: ItemId) -> Result<(), HandleError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_timeout_rejects_item() {
    let backend = MemoryBackend::new();
    let queue = Queue::new(backend.storage());
    queue.producer().append(Item::new(1u64, 2)).await.unwrap();

    let config = WorkerConfig {
        handle_timeout: Duration::from_millis(20),
        ..fast_workers(1)
    };
    let pool = WorkerPool::spawn(Arc::new(queue.consumer()), Arc::new(SlowHandler), 1, config).unwrap();
    wait_until(&backend, |state| state.status_of(ItemId(1)) == Some(ItemStatus::Retry)).await;
    pool.shutdown().await.unwrap();

    let state = backend.snapshot().await;
    assert_eq!(state.attempts_of(ItemId(1)), Some(1));
    assert!(state.broken_entries(ItemId(1))[0].error.contains("timed out"));
}

/// Blocks on the first item until released, so shutdown lands mid-batch
struct GateHandler {
    gate: tokio::sync::Semaphore,
    started: tokio::sync::Notify,
}

#[async_trait]
impl ItemHandler<MemoryBackend> for GateHandler {
    async fn handle(&self, _id: ItemId) -> Result<(), HandleError> {
        self.started.notify_one();
        let _permit = self.gate.acquire().await.map_err(HandleError::failed)?;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_returns_unprocessed_items_to_ready() {
    let backend = MemoryBackend::new();
    let queue = Queue::new(backend.storage());
    let items: Vec<Item> = (1..=4u64).map(|id| Item::new(id, 1)).collect();
    queue.producer().appends(&items).await.unwrap();

    let handler = Arc::new(GateHandler {
        gate: tokio::sync::Semaphore::new(0),
        started: tokio::sync::Notify::new(),
    });
    let pool = WorkerPool::spawn(Arc::new(queue.consumer()), handler.clone(), 4, fast_workers(1)).unwrap();

    handler.started.notified().await;
    let shutdown = tokio::spawn(pool.shutdown());
    // Let the shutdown signal land before the first item finishes
    tokio::time::sleep(Duration::from_millis(20)).await;
    handler.gate.add_permits(10);
    shutdown.await.unwrap().unwrap();

    let state = backend.snapshot().await;
    assert_eq!(state.completed_ids(), vec![ItemId(1)]);
    assert_eq!(state.items_in(ItemStatus::Ready), vec![ItemId(2), ItemId(3), ItemId(4)]);
    assert!(state.items_in(ItemStatus::Processing).is_empty());
}

#[tokio::test]
async fn test_pool_rejects_bad_settings() {
    let queue = Queue::new(MemoryBackend::new().storage());
    let consumer = Arc::new(queue.consumer());

    assert!(WorkerPool::spawn(consumer.clone(), Arc::new(SlowHandler), 0, fast_workers(1)).is_err());
    assert!(WorkerPool::spawn(consumer, Arc::new(SlowHandler), 1, fast_workers(0)).is_err());
}

#[tokio::test]
async fn test_maintenance_cycle_recovers_and_cleans() {
    let clock = Arc::new(ManualClock::default());
    let backend = MemoryBackend::with_clock(clock.clone());
    let queue = Queue::with_config(backend.storage(), QueueConfig::default()).unwrap();
    let consumer = queue.consumer();

    queue
        .producer()
        .appends(&[Item::new(1u64, 1), Item::new(2u64, 1)])
        .await
        .unwrap();
    consumer.read_items(10).await.unwrap();
    let cause: BoxError = "bounce".into();
    consumer.reject(ItemId(2), &*cause).await.unwrap();

    let maintenance = Maintenance::new(
        Arc::new(queue.changer()),
        Arc::new(queue.cleaner()),
        queue.config().limits.clone(),
        queue.config().maintenance.clone(),
    )
    .unwrap();

    clock.advance(Duration::from_secs(6 * 60));
    let report = maintenance.run_change_cycle().await.unwrap();
    assert_eq!(report.recovered, 1);
    // Item 1 only just entered RETRY; item 2 has no attempts left
    assert_eq!(report.requeued, 0);

    let report = maintenance.run_clean_cycle().await.unwrap();
    assert_eq!(report.without_attempts, 1);
    assert_eq!(report.completed, 0);

    clock.advance(Duration::from_secs(3 * 60));
    let report = maintenance.run_change_cycle().await.unwrap();
    assert_eq!(report.requeued, 1);

    clock.advance(Duration::from_secs(73 * 60 * 60));
    let report = maintenance.run_clean_cycle().await.unwrap();
    assert_eq!(report.broken, 2);
    assert_eq!(backend.snapshot().await.status_of(ItemId(1)), Some(ItemStatus::Ready));
}

#[tokio::test]
async fn test_maintenance_rejects_zero_intervals() {
    let queue = Queue::new(MemoryBackend::new().storage());
    let config = MaintenanceConfig {
        change_interval: Duration::ZERO,
        ..MaintenanceConfig::default()
    };

    let err = Maintenance::new(
        Arc::new(queue.changer()),
        Arc::new(queue.cleaner()),
        queue.config().limits.clone(),
        config,
    )
    .err()
    .unwrap();
    assert!(matches!(err, mrqueue::QueueError::Config { ref key, .. } if key == "maintenance.change_interval"));
}
