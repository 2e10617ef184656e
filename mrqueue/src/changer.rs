use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{
    contracts::Changer,
    error::{QueueError, QueueResult, ITEM_ENTITY},
    observability::{EventEmitter, SourceEmitter},
    store::{QueueStorage, TxManager},
    types::{events::names, ItemId, ItemWithError},
};

/// Cause recorded in the broken archive for items reclaimed by the timeout sweep
pub const TIMEOUT_CAUSE: &str = "processing process has switched to retry by timeout";

/// Runs the recovery sweeps
pub struct StatusChanger<B: TxManager> {
    storage: QueueStorage<B>,
    events: SourceEmitter,
    retry_timeout: Duration,
    retry_delay: Duration,
}

impl<B: TxManager> StatusChanger<B> {
    /// Create a changer with the default 5m timeout and 2m delay
    pub fn new(storage: QueueStorage<B>, events: Arc<dyn EventEmitter>) -> Self {
        Self {
            storage,
            events: SourceEmitter::new(ITEM_ENTITY, events),
            retry_timeout: Duration::from_secs(5 * 60),
            retry_delay: Duration::from_secs(2 * 60),
        }
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn retry_timeout(&self) -> Duration {
        self.retry_timeout
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    async fn recover_in_tx(&self, tx: &mut B::Tx, limit: u32) -> QueueResult<Vec<ItemId>> {
        let ids = self
            .storage
            .items
            .sweep_processing_to_retry_by_timeout(tx, self.retry_timeout, limit)
            .await
            .map_err(QueueError::storage)?;

        if let Some(broken) = &self.storage.broken {
            if !ids.is_empty() {
                let rows: Vec<ItemWithError> = ids.iter().map(|id| ItemWithError::new(*id, TIMEOUT_CAUSE)).collect();
                broken.insert(tx, &rows).await.map_err(QueueError::storage)?;
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl<B: TxManager> Changer for StatusChanger<B> {
    /// Attempts are not consumed on this path; only an explicit reject does that
    #[instrument(skip(self))]
    async fn change_processing_to_retry_by_timeout(&self, limit: u32) -> QueueResult<Vec<ItemId>> {
        if limit == 0 {
            return Err(QueueError::limit_is_zero());
        }

        let mut tx = self.storage.begin().await?;
        let result = self.recover_in_tx(&mut tx, limit).await;
        let ids = self.storage.finish(tx, result).await?;
        if !ids.is_empty() {
            debug!("Reclaimed {} items stuck in PROCESSING", ids.len());
        }

        self.events.emit_count(names::CHANGE_PROCESSING_TO_RETRY_BY_TIMEOUT, ids.len());
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn change_retry_to_ready(&self, limit: u32) -> QueueResult<Vec<ItemId>> {
        if limit == 0 {
            return Err(QueueError::limit_is_zero());
        }

        let mut tx = self.storage.begin().await?;
        let result = self
            .storage
            .items
            .sweep_retry_to_ready(&mut tx, self.retry_delay, limit)
            .await
            .map_err(QueueError::storage);
        let ids = self.storage.finish(tx, result).await?;

        self.events.emit_count(names::CHANGE_RETRY_TO_READY, ids.len());
        Ok(ids)
    }
}
