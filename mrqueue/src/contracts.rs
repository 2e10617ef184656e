//! Operations the queue exposes to pipelines built on top of it

use async_trait::async_trait;

use crate::{
    error::{BoxError, QueueResult},
    store::TxManager,
    types::{Item, ItemId},
};

/// Enqueues new items
#[async_trait]
pub trait Producer: Send + Sync {
    /// Insert one item in READY, visible after its `ready_delay`
    async fn append(&self, item: Item) -> QueueResult<()>;

    /// Insert a batch; nothing is written unless every item is valid
    async fn appends(&self, items: &[Item]) -> QueueResult<()>;
}

/// Application side effect committed together with an item
///
/// Runs inside the unit of work that deletes the item, so its writes
/// survive only if the commit does.
#[async_trait]
pub trait PreCommit<B: TxManager>: Send {
    async fn run(self: Box<Self>, tx: &mut B::Tx) -> Result<(), BoxError>;
}

/// Pre-commit hook that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPreCommit;

#[async_trait]
impl<B: TxManager> PreCommit<B> for NoPreCommit {
    async fn run(self: Box<Self>, _tx: &mut B::Tx) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Claims and settles items
#[async_trait]
pub trait Consumer<B: TxManager>: Send + Sync {
    /// Claim up to `limit` visible READY items, moving them to PROCESSING
    async fn read_items(&self, limit: u32) -> QueueResult<Vec<ItemId>>;

    /// Hand claimed items back to READY without consuming an attempt
    async fn cancel_items(&self, ids: &[ItemId]) -> QueueResult<()>;

    /// Finish an item successfully
    async fn commit(&self, id: ItemId, pre_commit: Box<dyn PreCommit<B>>) -> QueueResult<()>;

    /// Record a failed attempt; the item moves to RETRY
    async fn reject(&self, id: ItemId, cause: &(dyn std::error::Error + Send + Sync)) -> QueueResult<()>;
}

/// Recovery sweeps
#[async_trait]
pub trait Changer: Send + Sync {
    /// Move items stuck in PROCESSING past the retry timeout to RETRY
    async fn change_processing_to_retry_by_timeout(&self, limit: u32) -> QueueResult<Vec<ItemId>>;

    /// Move RETRY items whose delay has elapsed back to READY
    async fn change_retry_to_ready(&self, limit: u32) -> QueueResult<Vec<ItemId>>;
}

/// Reclaims dead rows and expired archive entries
#[async_trait]
pub trait Cleaner: Send + Sync {
    async fn remove_items_without_attempts(&self, limit: u32) -> QueueResult<Vec<ItemId>>;

    async fn remove_completed_items(&self, limit: u32) -> QueueResult<Vec<ItemId>>;

    async fn remove_broken_items(&self, limit: u32) -> QueueResult<Vec<ItemId>>;
}
