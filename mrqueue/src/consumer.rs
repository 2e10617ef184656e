use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{
    contracts::{Consumer, PreCommit},
    error::{item_entity, QueueError, QueueResult, ITEM_ENTITY},
    observability::{EventEmitter, SourceEmitter},
    store::{QueueStorage, TxManager},
    types::{events::names, EventData, ItemId, ItemStatus, ItemWithError},
};

/// Claims items and settles their outcome
pub struct QueueConsumer<B: TxManager> {
    storage: QueueStorage<B>,
    events: SourceEmitter,
}

impl<B: TxManager> QueueConsumer<B> {
    pub fn new(storage: QueueStorage<B>, events: Arc<dyn EventEmitter>) -> Self {
        Self {
            storage,
            events: SourceEmitter::new(ITEM_ENTITY, events),
        }
    }

    async fn commit_in_tx(&self, tx: &mut B::Tx, id: ItemId, pre_commit: Box<dyn PreCommit<B>>) -> QueueResult<()> {
        pre_commit.run(tx).await.map_err(|source| QueueError::PreCommit {
            entity: item_entity(id),
            source,
        })?;

        let deleted = self
            .storage
            .items
            .delete_if_status(tx, id, ItemStatus::Processing)
            .await
            .map_err(|e| QueueError::storage_for(id, e))?;
        if deleted == 0 {
            return Err(QueueError::StatusMismatch {
                entity: item_entity(id),
                expected: ItemStatus::Processing,
            });
        }

        if let Some(completed) = &self.storage.completed {
            completed.insert(tx, id).await.map_err(|e| QueueError::storage_for(id, e))?;
        }
        Ok(())
    }

    /// Returns whether the item was still PROCESSING
    async fn reject_in_tx(&self, tx: &mut B::Tx, id: ItemId, cause: String) -> QueueResult<bool> {
        let demoted = self
            .storage
            .items
            .demote_processing_to_retry(tx, id)
            .await
            .map_err(|e| QueueError::storage_for(id, e))?;

        if let Some(broken) = &self.storage.broken {
            broken
                .insert_one(tx, &ItemWithError::new(id, cause))
                .await
                .map_err(|e| QueueError::storage_for(id, e))?;
        }
        Ok(demoted > 0)
    }
}

#[async_trait]
impl<B: TxManager> Consumer<B> for QueueConsumer<B> {
    #[instrument(skip(self))]
    async fn read_items(&self, limit: u32) -> QueueResult<Vec<ItemId>> {
        if limit == 0 {
            return Err(QueueError::limit_is_zero());
        }

        let mut tx = self.storage.begin().await?;
        let result = self
            .storage
            .items
            .claim_ready_batch(&mut tx, limit)
            .await
            .map_err(QueueError::storage);
        let ids = self.storage.finish(tx, result).await?;

        self.events.emit_count(names::READ_ITEMS, ids.len());
        Ok(ids)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn cancel_items(&self, ids: &[ItemId]) -> QueueResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        if ids.iter().any(|id| id.is_zero()) {
            return Err(QueueError::id_is_zero());
        }

        let mut tx = self.storage.begin().await?;
        let result = self
            .storage
            .items
            .release_to_ready(&mut tx, ids)
            .await
            .map_err(QueueError::storage);
        let released = self.storage.finish(tx, result).await?;
        if released < ids.len() as u64 {
            debug!("{} of {} items were no longer PROCESSING", ids.len() as u64 - released, ids.len());
        }

        self.events.emit_count(names::CANCEL_ITEMS, ids.len());
        Ok(())
    }

    #[instrument(skip(self, pre_commit))]
    async fn commit(&self, id: ItemId, pre_commit: Box<dyn PreCommit<B>>) -> QueueResult<()> {
        if id.is_zero() {
            return Err(QueueError::id_is_zero());
        }

        let mut tx = self.storage.begin().await?;
        let result = self.commit_in_tx(&mut tx, id, pre_commit).await;
        self.storage.finish(tx, result).await?;

        self.events.emit(names::COMMIT, EventData::Id(id));
        Ok(())
    }

    #[instrument(skip(self, cause))]
    async fn reject(&self, id: ItemId, cause: &(dyn std::error::Error + Send + Sync)) -> QueueResult<()> {
        if id.is_zero() {
            return Err(QueueError::id_is_zero());
        }

        let mut tx = self.storage.begin().await?;
        let result = self.reject_in_tx(&mut tx, id, cause.to_string()).await;
        let demoted = self.storage.finish(tx, result).await?;

        if demoted {
            self.events.emit(names::REJECT, EventData::Id(id));
        } else {
            debug!("Item {} was no longer PROCESSING; attempt not consumed", id);
            self.events.emit(names::REJECT_SKIPPED, EventData::Id(id));
        }
        Ok(())
    }
}
