use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{
    contracts::Producer,
    error::{QueueError, QueueResult, ITEM_ENTITY},
    observability::{EventEmitter, SourceEmitter},
    store::{QueueStorage, TxManager},
    types::{events::names, EventData, Item},
};

/// Validates and enqueues new items
pub struct QueueProducer<B: TxManager> {
    storage: QueueStorage<B>,
    events: SourceEmitter,
}

impl<B: TxManager> QueueProducer<B> {
    pub fn new(storage: QueueStorage<B>, events: Arc<dyn EventEmitter>) -> Self {
        Self {
            storage,
            events: SourceEmitter::new(ITEM_ENTITY, events),
        }
    }

    async fn insert(&self, items: &[Item]) -> QueueResult<()> {
        let mut tx = self.storage.begin().await?;
        let result = self
            .storage
            .items
            .insert(&mut tx, items)
            .await
            .map_err(|e| match items {
                [item] => QueueError::storage_for(item.id, e),
                _ => QueueError::storage(e),
            });
        self.storage.finish(tx, result).await
    }
}

#[async_trait]
impl<B: TxManager> Producer for QueueProducer<B> {
    #[instrument(skip(self, item), fields(id = %item.id))]
    async fn append(&self, item: Item) -> QueueResult<()> {
        item.validate()?;
        self.insert(std::slice::from_ref(&item)).await?;

        self.events.emit(names::APPEND, EventData::Id(item.id));
        Ok(())
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn appends(&self, items: &[Item]) -> QueueResult<()> {
        if items.is_empty() {
            debug!("Nothing to append");
            return Ok(());
        }
        for (index, item) in items.iter().enumerate() {
            item.validate().map_err(|err| err.in_batch(index, item.id))?;
        }
        self.insert(items).await?;

        self.events
            .emit(names::APPENDS, EventData::Ids(items.iter().map(|item| item.id).collect()));
        Ok(())
    }
}
