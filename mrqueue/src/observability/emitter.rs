use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::types::{EventData, QueueEvent};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Receives events of mutating queue operations
///
/// Emission is fire-and-forget: implementations must not block and have no
/// way to influence the outcome of the operation that produced the event.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: QueueEvent);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: QueueEvent) {}
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit(&self, event: QueueEvent) {
        match &event.data {
            EventData::Count(count) => {
                info!(source = event.source, event = event.name, count = *count as u64, "queue event");
            }
            EventData::Id(id) => {
                info!(source = event.source, event = event.name, id = id.get(), "queue event");
            }
            EventData::Ids(ids) => {
                info!(source = event.source, event = event.name, ids = ?ids, "queue event");
            }
        }
    }
}

/// Publishes events to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    sender: broadcast::Sender<QueueEvent>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    /// Event stream for observability; lagged events are skipped
    pub fn event_stream(&self) -> BoxStream<QueueEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|result| result.ok());

        Box::pin(stream)
    }
}

impl Default for BroadcastEmitter {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl EventEmitter for BroadcastEmitter {
    fn emit(&self, event: QueueEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

/// Forwards every event to several emitters
#[derive(Default, Clone)]
pub struct FanoutEmitter {
    targets: Vec<Arc<dyn EventEmitter>>,
}

impl FanoutEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Arc<dyn EventEmitter>) -> Self {
        self.targets.push(target);
        self
    }
}

impl EventEmitter for FanoutEmitter {
    fn emit(&self, event: QueueEvent) {
        if let Some((last, rest)) = self.targets.split_last() {
            for target in rest {
                target.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

/// Emitter with the `source` attribute bound once
#[derive(Clone)]
pub struct SourceEmitter {
    source: &'static str,
    inner: Arc<dyn EventEmitter>,
}

impl SourceEmitter {
    pub fn new(source: &'static str, inner: Arc<dyn EventEmitter>) -> Self {
        Self { source, inner }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn emit(&self, name: &'static str, data: EventData) {
        self.inner.emit(QueueEvent::new(self.source, name, data));
    }

    pub fn emit_count(&self, name: &'static str, count: usize) {
        self.emit(name, EventData::Count(count));
    }
}
