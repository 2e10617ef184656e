use thiserror::Error;

use crate::types::{ItemId, ItemStatus};

/// Boxed error accepted from storage drivers and application hooks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for storage adapter operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by a storage adapter
#[derive(Error, Debug)]
#[error("{source}")]
pub struct StoreError {
    #[source]
    source: BoxError,
}

impl StoreError {
    /// Wrap a driver error
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self { source: Box::new(err) }
    }

    /// Build a storage error from a plain message
    pub fn message(msg: impl Into<String>) -> Self {
        Self { source: msg.into().into() }
    }

    /// Get the underlying driver error
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

impl From<BoxError> for StoreError {
    fn from(source: BoxError) -> Self {
        Self { source }
    }
}

/// Errors surfaced by the queue components
#[derive(Error, Debug)]
pub enum QueueError {
    /// Rejected before any storage access; never worth retrying
    #[error("incorrect input data: {field}: {reason}")]
    InvalidInput { field: &'static str, reason: &'static str },

    /// Invalid input found at a position inside a batch
    #[error("incorrect input data: item[{index}] (id={id}): {field}: {reason}")]
    InvalidBatchItem {
        index: usize,
        id: ItemId,
        field: &'static str,
        reason: &'static str,
    },

    /// A status-guarded delete found nothing to act on
    #[error("{entity} is not in status {expected}")]
    StatusMismatch { entity: String, expected: ItemStatus },

    #[error("pre-commit hook failed for {entity}: {source}")]
    PreCommit {
        entity: String,
        #[source]
        source: BoxError,
    },

    #[error("storage operation failed for {entity}: {source}")]
    Storage {
        entity: String,
        #[source]
        source: StoreError,
    },

    #[error("invalid configuration for {key}: {reason}")]
    Config { key: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Entity label used in error context and events
pub const ITEM_ENTITY: &str = "mrqueue.Item";

/// Render the entity label for a single item
pub(crate) fn item_entity(id: ItemId) -> String {
    format!("{ITEM_ENTITY}[id={id}]")
}

impl QueueError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidInput { field, reason }
    }

    /// Attach the batch position and ID to an input error
    pub(crate) fn in_batch(self, index: usize, id: ItemId) -> Self {
        match self {
            Self::InvalidInput { field, reason } => Self::InvalidBatchItem {
                index,
                id,
                field,
                reason,
            },
            other => other,
        }
    }

    pub(crate) fn limit_is_zero() -> Self {
        Self::invalid("limit", "limit value is zero")
    }

    pub(crate) fn id_is_zero() -> Self {
        Self::invalid("id", "id is zero")
    }

    /// Wrap a storage failure touching the item table as a whole
    pub fn storage(source: StoreError) -> Self {
        Self::Storage {
            entity: ITEM_ENTITY.to_string(),
            source,
        }
    }

    /// Wrap a storage failure touching one item
    pub fn storage_for(id: ItemId, source: StoreError) -> Self {
        Self::Storage {
            entity: item_entity(id),
            source,
        }
    }

    pub(crate) fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Check if the caller supplied bad input
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput { .. } | Self::InvalidBatchItem { .. })
    }

    /// Check if the failure came from the storage layer
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    /// Check if a status-guarded write lost its row
    pub fn is_status_mismatch(&self) -> bool {
        matches!(self, Self::StatusMismatch { .. })
    }
}
