use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::WorkerConfig,
    contracts::{Consumer, PreCommit},
    error::{BoxError, QueueError, QueueResult},
    store::TxManager,
    types::ItemId,
};

/// Why a handler did not finish an item
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// Work never began (payload missing, dependency unavailable); the item
    /// goes back to READY without consuming an attempt
    #[error("processing not started: {0}")]
    NotStarted(String),

    /// The attempt failed; the item is rejected and one attempt is consumed
    #[error(transparent)]
    Failed(BoxError),
}

impl HandleError {
    pub fn not_started(reason: impl Into<String>) -> Self {
        Self::NotStarted(reason.into())
    }

    pub fn failed(cause: impl Into<BoxError>) -> Self {
        Self::Failed(cause.into())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("handler timed out after {0:?}")]
struct HandlerTimeout(Duration);

/// Application logic run for every claimed item
#[async_trait]
pub trait ItemHandler<B: TxManager>: Send + Sync + 'static {
    async fn handle(&self, id: ItemId) -> Result<(), HandleError>;

    /// Writes committed atomically with the item's removal from the queue
    async fn pre_commit(&self, _tx: &mut B::Tx, _id: ItemId) -> Result<(), BoxError> {
        Ok(())
    }
}

struct HandlerPreCommit<H> {
    handler: Arc<H>,
    id: ItemId,
}

#[async_trait]
impl<B: TxManager, H: ItemHandler<B>> PreCommit<B> for HandlerPreCommit<H> {
    async fn run(self: Box<Self>, tx: &mut B::Tx) -> Result<(), BoxError> {
        self.handler.pre_commit(tx, self.id).await
    }
}

/// Handle for managing worker lifecycle
pub struct WorkerPoolHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<JoinHandle<QueueResult<()>>>,
}

impl WorkerPoolHandle {
    pub fn worker_count(&self) -> usize {
        self.join_handles.len()
    }

    /// Gracefully shutdown the workers
    ///
    /// Each worker finishes the item in hand and returns the rest of its
    /// claimed batch to READY.
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);
        for join_handle in self.join_handles {
            join_handle
                .await
                .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))??;
        }
        Ok(())
    }
}

/// Pool of polling consumers
pub struct WorkerPool;

impl WorkerPool {
    /// Start `config.workers` workers claiming up to `read_limit` items per poll
    pub fn spawn<B, C, H>(
        consumer: Arc<C>,
        handler: Arc<H>,
        read_limit: u32,
        config: WorkerConfig,
    ) -> QueueResult<WorkerPoolHandle>
    where
        B: TxManager,
        C: Consumer<B> + 'static,
        H: ItemHandler<B>,
    {
        if read_limit == 0 {
            return Err(QueueError::limit_is_zero());
        }
        if config.workers == 0 {
            return Err(QueueError::config("worker.workers", "at least one worker is required"));
        }

        let consumer: Arc<dyn Consumer<B>> = consumer;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join_handles = (0..config.workers)
            .map(|index| {
                let worker = Worker {
                    index,
                    consumer: consumer.clone(),
                    handler: handler.clone(),
                    read_limit,
                    config: config.clone(),
                    shutdown: shutdown_rx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!("Started {} queue workers", config.workers);
        Ok(WorkerPoolHandle {
            shutdown_tx,
            join_handles,
        })
    }
}

struct Worker<B: TxManager, H> {
    index: usize,
    consumer: Arc<dyn Consumer<B>>,
    handler: Arc<H>,
    read_limit: u32,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl<B: TxManager, H: ItemHandler<B>> Worker<B, H> {
    /// Run the worker loop
    async fn run(mut self) -> QueueResult<()> {
        info!("Worker {} started", self.index);

        while !self.stopping() {
            let pause = match self.poll_once().await {
                Ok(0) => self.idle_delay(),
                Ok(settled) => {
                    debug!("Worker {} settled {} items", self.index, settled);
                    continue;
                }
                Err(e) => {
                    error!("Worker {} failed to poll: {}", self.index, e);
                    self.config.error_backoff
                }
            };

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Worker {} stopped", self.index);
        Ok(())
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn idle_delay(&self) -> Duration {
        let jitter_ms = self.config.poll_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.config.poll_interval;
        }
        self.config.poll_interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Claim one batch and work through it
    ///
    /// Returns how many items were committed or rejected. Cancelled items
    /// are READY again at once, so a batch that settled nothing counts as
    /// an idle poll.
    async fn poll_once(&self) -> QueueResult<usize> {
        let ids = self.consumer.read_items(self.read_limit).await?;

        let mut settled = 0;
        for (pos, id) in ids.iter().enumerate() {
            if self.stopping() {
                let rest = &ids[pos..];
                info!("Worker {} returning {} claimed items", self.index, rest.len());
                self.consumer.cancel_items(rest).await?;
                return Ok(settled);
            }
            if self.process(*id).await {
                settled += 1;
            }
        }
        Ok(settled)
    }

    /// Returns whether the item was committed or rejected
    #[instrument(skip(self), fields(worker = self.index))]
    async fn process(&self, id: ItemId) -> bool {
        let outcome = tokio::time::timeout(self.config.handle_timeout, self.handler.handle(id)).await;

        let (settles, result) = match outcome {
            Ok(Ok(())) => {
                let pre_commit = Box::new(HandlerPreCommit {
                    handler: self.handler.clone(),
                    id,
                });
                (true, self.consumer.commit(id, pre_commit).await)
            }
            Ok(Err(HandleError::NotStarted(reason))) => {
                debug!("Item {} not started: {}", id, reason);
                (false, self.consumer.cancel_items(&[id]).await)
            }
            Ok(Err(HandleError::Failed(cause))) => {
                warn!("Item {} failed: {}", id, cause);
                (true, self.consumer.reject(id, &*cause).await)
            }
            Err(_) => {
                let cause = HandlerTimeout(self.config.handle_timeout);
                warn!("Item {}: {}", id, cause);
                (true, self.consumer.reject(id, &cause).await)
            }
        };

        match result {
            Ok(()) => settles,
            Err(e) if e.is_status_mismatch() => {
                warn!("Item {} was reclaimed before it could be committed", id);
                false
            }
            Err(e) => {
                error!("Failed to settle item {}: {}", id, e);
                false
            }
        }
    }
}
