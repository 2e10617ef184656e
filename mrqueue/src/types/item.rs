use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ItemId;
use crate::error::{QueueError, QueueResult};

/// Unit of work submitted by a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Time before the item becomes visible to consumers
    #[serde(with = "humantime_serde", default)]
    pub ready_delay: Duration,
    /// Remaining attempt budget
    pub retry_attempts: u32,
}

impl Item {
    /// Create an immediately visible item
    pub fn new(id: impl Into<ItemId>, retry_attempts: u32) -> Self {
        Self {
            id: id.into(),
            ready_delay: Duration::ZERO,
            retry_attempts,
        }
    }

    /// Delay visibility of the item
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    /// Reject items that could never be processed
    pub fn validate(&self) -> QueueResult<()> {
        if self.id.is_zero() {
            return Err(QueueError::id_is_zero());
        }
        if self.retry_attempts == 0 {
            return Err(QueueError::invalid("retry_attempts", "RetryAttempts is zero"));
        }
        Ok(())
    }
}

/// Audit record of a failed or recovered attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemWithError {
    pub id: ItemId,
    pub error: String,
}

impl ItemWithError {
    pub fn new(id: ItemId, error: impl Into<String>) -> Self {
        Self {
            id,
            error: error.into(),
        }
    }
}
