use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a queue item, chosen by the producer
///
/// Zero is reserved and rejected by every operation that takes an ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl ItemId {
    /// Get the raw value
    pub fn get(self) -> u64 {
        self.0
    }

    /// Check for the reserved zero value
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ItemId> for u64 {
    fn from(id: ItemId) -> Self {
        id.0
    }
}
