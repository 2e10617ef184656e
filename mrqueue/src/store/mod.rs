#[cfg(feature = "memory")]
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::{
    error::{QueueError, QueueResult, StoreResult},
    types::{Item, ItemId, ItemStatus, ItemWithError},
};

/// Hands out units of work for a storage engine
///
/// Every state transition runs inside one `Tx`. Dropping a `Tx` without
/// committing it must discard its writes.
#[async_trait]
pub trait TxManager: Send + Sync + 'static {
    type Tx: Send + 'static;

    async fn begin(&self) -> StoreResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> StoreResult<()>;

    async fn rollback(&self, tx: Self::Tx) -> StoreResult<()>;
}

/// Persistence primitives for active queue rows
///
/// Status-guarded writes report the number of affected rows; zero means
/// another actor got there first and is not an error.
#[async_trait]
pub trait ItemStore<B: TxManager>: Send + Sync {
    /// Insert rows in READY, visible after each item's `ready_delay`
    async fn insert(&self, tx: &mut B::Tx, items: &[Item]) -> StoreResult<()>;

    /// Claim up to `limit` visible READY rows, oldest first, moving them to
    /// PROCESSING without waiting on rows held by concurrent claims
    ///
    /// Callers must not rely on the order of the returned IDs.
    async fn claim_ready_batch(&self, tx: &mut B::Tx, limit: u32) -> StoreResult<Vec<ItemId>>;

    /// PROCESSING -> READY for the rows that are still PROCESSING
    async fn release_to_ready(&self, tx: &mut B::Tx, ids: &[ItemId]) -> StoreResult<u64>;

    /// Delete the row only if it is still in `status`
    async fn delete_if_status(&self, tx: &mut B::Tx, id: ItemId, status: ItemStatus) -> StoreResult<u64>;

    /// PROCESSING -> RETRY, consuming one attempt
    async fn demote_processing_to_retry(&self, tx: &mut B::Tx, id: ItemId) -> StoreResult<u64>;

    /// PROCESSING rows untouched for longer than `timeout` -> RETRY
    async fn sweep_processing_to_retry_by_timeout(
        &self,
        tx: &mut B::Tx,
        timeout: Duration,
        limit: u32,
    ) -> StoreResult<Vec<ItemId>>;

    /// RETRY rows older than `delay` with attempts left -> READY
    async fn sweep_retry_to_ready(&self, tx: &mut B::Tx, delay: Duration, limit: u32) -> StoreResult<Vec<ItemId>>;

    /// Delete RETRY rows whose attempt budget is spent
    async fn delete_retry_exhausted(&self, tx: &mut B::Tx, limit: u32) -> StoreResult<Vec<ItemId>>;
}

/// Audit sink for committed items
#[async_trait]
pub trait CompletedArchive<B: TxManager>: Send + Sync {
    async fn insert(&self, tx: &mut B::Tx, id: ItemId) -> StoreResult<()>;

    /// Delete entries older than `expiry`, returning their IDs
    async fn delete_expired(&self, tx: &mut B::Tx, expiry: Duration, limit: u32) -> StoreResult<Vec<ItemId>>;
}

/// Audit sink for failed attempts; one item may own several entries
#[async_trait]
pub trait BrokenArchive<B: TxManager>: Send + Sync {
    async fn insert(&self, tx: &mut B::Tx, rows: &[ItemWithError]) -> StoreResult<()>;

    async fn insert_one(&self, tx: &mut B::Tx, row: &ItemWithError) -> StoreResult<()> {
        self.insert(tx, std::slice::from_ref(row)).await
    }

    /// Delete every entry of items whose newest entry is older than
    /// `expiry`, returning the distinct item IDs
    async fn delete_expired(&self, tx: &mut B::Tx, expiry: Duration, limit: u32) -> StoreResult<Vec<ItemId>>;
}

/// Removes application rows that belong to expired archive entries
#[async_trait]
pub trait ItemPurger<B: TxManager>: Send + Sync {
    /// Returns the number of rows removed; zero is fine
    async fn purge(&self, tx: &mut B::Tx, ids: &[ItemId]) -> StoreResult<u64>;
}

/// A storage engine wired up for the queue components
pub struct QueueStorage<B: TxManager> {
    pub(crate) backend: Arc<B>,
    pub(crate) items: Arc<dyn ItemStore<B>>,
    pub(crate) completed: Option<Arc<dyn CompletedArchive<B>>>,
    pub(crate) broken: Option<Arc<dyn BrokenArchive<B>>>,
}

impl<B: TxManager> QueueStorage<B> {
    /// Create storage without archives
    pub fn new(backend: Arc<B>, items: Arc<dyn ItemStore<B>>) -> Self {
        Self {
            backend,
            items,
            completed: None,
            broken: None,
        }
    }

    pub fn with_completed_archive(mut self, archive: Arc<dyn CompletedArchive<B>>) -> Self {
        self.completed = Some(archive);
        self
    }

    pub fn with_broken_archive(mut self, archive: Arc<dyn BrokenArchive<B>>) -> Self {
        self.broken = Some(archive);
        self
    }

    pub fn without_completed_archive(mut self) -> Self {
        self.completed = None;
        self
    }

    pub fn without_broken_archive(mut self) -> Self {
        self.broken = None;
        self
    }

    /// Get backend reference
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn has_completed_archive(&self) -> bool {
        self.completed.is_some()
    }

    pub fn has_broken_archive(&self) -> bool {
        self.broken.is_some()
    }

    pub(crate) async fn begin(&self) -> QueueResult<B::Tx> {
        self.backend.begin().await.map_err(QueueError::storage)
    }

    /// Commit on success, roll back on failure
    pub(crate) async fn finish<T>(&self, tx: B::Tx, result: QueueResult<T>) -> QueueResult<T> {
        match result {
            Ok(value) => {
                self.backend.commit(tx).await.map_err(QueueError::storage)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.backend.rollback(tx).await {
                    warn!("Rollback failed after {}: {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }
}

impl<B: TxManager> Clone for QueueStorage<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            items: self.items.clone(),
            completed: self.completed.clone(),
            broken: self.broken.clone(),
        }
    }
}
