use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::EventEmitter;
use crate::types::{events::names, QueueEvent};

/// Per-operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationMetrics {
    /// Number of times the operation emitted an event
    pub calls: u64,
    /// Number of items the operation touched
    pub items: u64,
}

/// Live metrics collector fed by queue events
#[derive(Debug, Default)]
pub struct LiveMetrics {
    items_appended: AtomicU64,
    items_claimed: AtomicU64,
    items_committed: AtomicU64,
    items_rejected: AtomicU64,
    items_recovered: AtomicU64,
    items_removed: AtomicU64,
    per_operation: RwLock<HashMap<&'static str, OperationMetrics>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items_appended(&self) -> u64 {
        self.items_appended.load(Ordering::Relaxed)
    }

    pub fn items_claimed(&self) -> u64 {
        self.items_claimed.load(Ordering::Relaxed)
    }

    pub fn items_committed(&self) -> u64 {
        self.items_committed.load(Ordering::Relaxed)
    }

    pub fn items_rejected(&self) -> u64 {
        self.items_rejected.load(Ordering::Relaxed)
    }

    /// Items moved PROCESSING -> RETRY by the timeout sweep
    pub fn items_recovered(&self) -> u64 {
        self.items_recovered.load(Ordering::Relaxed)
    }

    /// Rows removed by any cleaner operation
    pub fn items_removed(&self) -> u64 {
        self.items_removed.load(Ordering::Relaxed)
    }

    /// Get metrics for one operation
    pub fn operation(&self, name: &str) -> Option<OperationMetrics> {
        self.per_operation.read().get(name).copied()
    }

    /// Get metrics for every operation seen so far
    pub fn all_operations(&self) -> HashMap<&'static str, OperationMetrics> {
        self.per_operation.read().clone()
    }
}

impl EventEmitter for LiveMetrics {
    fn emit(&self, event: QueueEvent) {
        let items = event.item_count() as u64;

        let counter = match event.name {
            names::APPEND | names::APPENDS => Some(&self.items_appended),
            names::READ_ITEMS => Some(&self.items_claimed),
            names::COMMIT => Some(&self.items_committed),
            names::REJECT => Some(&self.items_rejected),
            names::CHANGE_PROCESSING_TO_RETRY_BY_TIMEOUT => Some(&self.items_recovered),
            names::REMOVE_ITEMS_WITHOUT_ATTEMPTS | names::REMOVE_COMPLETED_ITEMS | names::REMOVE_BROKEN_ITEMS => {
                Some(&self.items_removed)
            }
            _ => None,
        };
        if let Some(counter) = counter {
            counter.fetch_add(items, Ordering::Relaxed);
        }

        let mut per_operation = self.per_operation.write();
        let entry = per_operation.entry(event.name).or_default();
        entry.calls += 1;
        entry.items += items;
    }
}

/// Prometheus exporter fed by queue events
#[cfg(feature = "metrics")]
pub struct PrometheusEmitter {
    calls: prometheus::IntCounterVec,
    items: prometheus::IntCounterVec,
}

#[cfg(feature = "metrics")]
impl PrometheusEmitter {
    /// Create counters and register them with `registry`
    pub fn register(registry: &prometheus::Registry) -> prometheus::Result<Self> {
        let calls = prometheus::IntCounterVec::new(
            prometheus::Opts::new("mrqueue_operations_total", "Queue operations that emitted an event"),
            &["source", "operation"],
        )?;
        let items = prometheus::IntCounterVec::new(
            prometheus::Opts::new("mrqueue_items_total", "Items touched by queue operations"),
            &["source", "operation"],
        )?;
        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(items.clone()))?;
        Ok(Self { calls, items })
    }
}

#[cfg(feature = "metrics")]
impl EventEmitter for PrometheusEmitter {
    fn emit(&self, event: QueueEvent) {
        let labels = [event.source, event.name];
        self.calls.with_label_values(&labels).inc();
        self.items.with_label_values(&labels).inc_by(event.item_count() as u64);
    }
}
