use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{
    contracts::Cleaner,
    error::{QueueError, QueueResult, ITEM_ENTITY},
    observability::{EventEmitter, SourceEmitter},
    store::{ItemPurger, QueueStorage, TxManager},
    types::{events::names, ItemId},
};

/// Reclaims exhausted rows and expired archive entries
pub struct QueueCleaner<B: TxManager> {
    storage: QueueStorage<B>,
    events: SourceEmitter,
    purger: Option<Arc<dyn ItemPurger<B>>>,
    completed_expiry: Duration,
    broken_expiry: Duration,
}

impl<B: TxManager> QueueCleaner<B> {
    /// Create a cleaner with the default 24h/72h retention
    pub fn new(storage: QueueStorage<B>, events: Arc<dyn EventEmitter>) -> Self {
        Self {
            storage,
            events: SourceEmitter::new(ITEM_ENTITY, events),
            purger: None,
            completed_expiry: Duration::from_secs(24 * 60 * 60),
            broken_expiry: Duration::from_secs(72 * 60 * 60),
        }
    }

    /// Delete application rows of expired archive entries in the same unit of work
    pub fn with_purger(mut self, purger: Arc<dyn ItemPurger<B>>) -> Self {
        self.purger = Some(purger);
        self
    }

    pub fn with_completed_expiry(mut self, expiry: Duration) -> Self {
        self.completed_expiry = expiry;
        self
    }

    pub fn with_broken_expiry(mut self, expiry: Duration) -> Self {
        self.broken_expiry = expiry;
        self
    }

    async fn purge(&self, tx: &mut B::Tx, ids: &[ItemId]) -> QueueResult<()> {
        let Some(purger) = &self.purger else {
            return Ok(());
        };
        if ids.is_empty() {
            return Ok(());
        }
        let removed = purger.purge(tx, ids).await.map_err(QueueError::storage)?;
        debug!("Purged {} application rows for {} archived items", removed, ids.len());
        Ok(())
    }
}

#[async_trait]
impl<B: TxManager> Cleaner for QueueCleaner<B> {
    #[instrument(skip(self))]
    async fn remove_items_without_attempts(&self, limit: u32) -> QueueResult<Vec<ItemId>> {
        if limit == 0 {
            return Err(QueueError::limit_is_zero());
        }

        let mut tx = self.storage.begin().await?;
        let result = self
            .storage
            .items
            .delete_retry_exhausted(&mut tx, limit)
            .await
            .map_err(QueueError::storage);
        let ids = self.storage.finish(tx, result).await?;

        self.events.emit_count(names::REMOVE_ITEMS_WITHOUT_ATTEMPTS, ids.len());
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn remove_completed_items(&self, limit: u32) -> QueueResult<Vec<ItemId>> {
        let Some(completed) = &self.storage.completed else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Err(QueueError::limit_is_zero());
        }

        let mut tx = self.storage.begin().await?;
        let expired = completed
            .delete_expired(&mut tx, self.completed_expiry, limit)
            .await
            .map_err(QueueError::storage);
        let result = match expired {
            Ok(ids) => self.purge(&mut tx, &ids).await.map(|()| ids),
            Err(err) => Err(err),
        };
        let ids = self.storage.finish(tx, result).await?;

        self.events.emit_count(names::REMOVE_COMPLETED_ITEMS, ids.len());
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn remove_broken_items(&self, limit: u32) -> QueueResult<Vec<ItemId>> {
        let Some(broken) = &self.storage.broken else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Err(QueueError::limit_is_zero());
        }

        let mut tx = self.storage.begin().await?;
        let expired = broken
            .delete_expired(&mut tx, self.broken_expiry, limit)
            .await
            .map_err(QueueError::storage);
        let result = match expired {
            Ok(ids) => self.purge(&mut tx, &ids).await.map(|()| ids),
            Err(err) => Err(err),
        };
        let ids = self.storage.finish(tx, result).await?;

        self.events.emit_count(names::REMOVE_BROKEN_ITEMS, ids.len());
        Ok(ids)
    }
}
