//! # mrqueue: relational work queue with retry budgets
//!
//! **At-least-once delivery on top of any transactional store**
//!
//! Items move through a small status machine:
//!
//! ```text
//!            append                 read_items               commit
//! producer ---------> READY ----------------------> PROCESSING -------> removed (+ completed archive)
//!                       ^  <----- cancel_items -----     |
//!                       |                                | reject / timeout sweep
//!                       +------- retry sweep ------- RETRY ------> purged when attempts run out
//! ```
//!
//! ## Guarantees
//!
//! - **Exclusive claims**: concurrent `read_items` calls never hand out the same item
//! - **Atomic settlement**: commit deletes, archives and runs the application's
//!   pre-commit writes in one unit of work
//! - **Retry budget**: only `reject` consumes an attempt; exhausted items are never requeued
//! - **Recovery**: items stuck in PROCESSING are reclaimed by the timeout sweep
//! - **Bounded work**: every batch operation takes a `limit`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mrqueue::prelude::*;
//! use mrqueue::store::memory::MemoryBackend;
//!
//! # async fn run() -> QueueResult<()> {
//! let queue = Queue::new(MemoryBackend::new().storage());
//!
//! queue.producer().append(Item::new(42u64, 3)).await?;
//!
//! let consumer = queue.consumer();
//! for id in consumer.read_items(10).await? {
//!     consumer.commit(id, Box::new(NoPreCommit)).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod changer;
pub mod cleaner;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod contracts;
pub mod error;
pub mod maintenance;
pub mod observability;
pub mod producer;
pub mod queue;
pub mod store;
pub mod types;
pub mod worker;

// Core API exports
pub use changer::{StatusChanger, TIMEOUT_CAUSE};
pub use cleaner::QueueCleaner;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BatchLimits, MaintenanceConfig, QueueConfig, WorkerConfig};
pub use consumer::QueueConsumer;
pub use contracts::{Changer, Cleaner, Consumer, NoPreCommit, PreCommit, Producer};
pub use error::{BoxError, QueueError, QueueResult, StoreError, StoreResult};
pub use maintenance::{ChangeReport, CleanReport, Maintenance, MaintenanceHandle};
pub use producer::QueueProducer;
pub use queue::Queue;
pub use store::{BrokenArchive, CompletedArchive, ItemPurger, ItemStore, QueueStorage, TxManager};
pub use types::{EventData, Item, ItemId, ItemStatus, ItemWithError, QueueEvent};
pub use worker::{HandleError, ItemHandler, WorkerPool, WorkerPoolHandle};

// Observability exports
pub use observability::{BroadcastEmitter, EventEmitter, LiveMetrics, NoopEmitter, SourceEmitter, TracingEmitter};

/// Prelude for queue producers, consumers and workers
pub mod prelude {
    pub use crate::{
        Changer, Cleaner, Consumer, NoPreCommit, PreCommit, Producer,
        Queue, QueueConfig, QueueStorage, TxManager,
        HandleError, ItemHandler, WorkerPool,
        Item, ItemId, ItemStatus, QueueError, QueueResult,
    };

    // Essential traits
    pub use async_trait::async_trait;
}
