use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ItemId;

/// Payload attached to a queue event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventData {
    Count(usize),
    Id(ItemId),
    Ids(Vec<ItemId>),
}

/// Structured record of one mutating queue operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEvent {
    pub source: &'static str,
    pub name: &'static str,
    pub data: EventData,
    pub at: DateTime<Utc>,
}

impl QueueEvent {
    pub fn new(source: &'static str, name: &'static str, data: EventData) -> Self {
        Self {
            source,
            name,
            data,
            at: Utc::now(),
        }
    }

    /// Number of items the event refers to
    pub fn item_count(&self) -> usize {
        match &self.data {
            EventData::Count(n) => *n,
            EventData::Id(_) => 1,
            EventData::Ids(ids) => ids.len(),
        }
    }

    /// Render the event as a JSON object
    #[cfg(feature = "json")]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "source": self.source,
            "name": self.name,
            "data": self.data,
            "at": self.at,
        })
    }
}

/// Event names emitted by the queue components
pub mod names {
    pub const APPEND: &str = "Append";
    pub const APPENDS: &str = "Appends";
    pub const READ_ITEMS: &str = "ReadItems";
    pub const CANCEL_ITEMS: &str = "CancelItems";
    pub const COMMIT: &str = "Commit";
    pub const REJECT: &str = "Reject";
    pub const REJECT_SKIPPED: &str = "RejectSkipped";
    pub const CHANGE_PROCESSING_TO_RETRY_BY_TIMEOUT: &str = "ChangeProcessingToRetryByTimeout";
    pub const CHANGE_RETRY_TO_READY: &str = "ChangeRetryToReady";
    pub const REMOVE_ITEMS_WITHOUT_ATTEMPTS: &str = "RemoveItemsWithoutAttempts";
    pub const REMOVE_COMPLETED_ITEMS: &str = "RemoveCompletedItems";
    pub const REMOVE_BROKEN_ITEMS: &str = "RemoveBrokenItems";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_count() {
        let ev = QueueEvent::new("mrqueue.Item", names::APPENDS, EventData::Ids(vec![ItemId(1), ItemId(2)]));
        assert_eq!(ev.item_count(), 2);
        assert_eq!(QueueEvent::new("s", names::COMMIT, EventData::Id(ItemId(4))).item_count(), 1);
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_shape() {
        let ev = QueueEvent::new("mrqueue.Item", names::READ_ITEMS, EventData::Count(3));
        let json = ev.to_json();
        assert_eq!(json["name"], "ReadItems");
        assert_eq!(json["data"]["count"], 3);
        assert_eq!(json["source"], "mrqueue.Item");
    }
}
