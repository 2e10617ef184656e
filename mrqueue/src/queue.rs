use std::sync::Arc;

use crate::{
    changer::StatusChanger,
    cleaner::QueueCleaner,
    config::QueueConfig,
    consumer::QueueConsumer,
    error::QueueResult,
    observability::{EventEmitter, TracingEmitter},
    producer::QueueProducer,
    store::{ItemPurger, QueueStorage, TxManager},
};

/// Builds the queue components over one storage engine
pub struct Queue<B: TxManager> {
    storage: QueueStorage<B>,
    events: Arc<dyn EventEmitter>,
    purger: Option<Arc<dyn ItemPurger<B>>>,
    config: QueueConfig,
}

impl<B: TxManager> Queue<B> {
    /// Create a queue that logs its events
    pub fn new(storage: QueueStorage<B>) -> Self {
        Self {
            storage,
            events: Arc::new(TracingEmitter),
            purger: None,
            config: QueueConfig::default(),
        }
    }

    /// Create a queue with a validated configuration
    pub fn with_config(storage: QueueStorage<B>, config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new(storage)
        })
    }

    pub fn with_events(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = events;
        self
    }

    pub fn with_purger(mut self, purger: Arc<dyn ItemPurger<B>>) -> Self {
        self.purger = Some(purger);
        self
    }

    pub fn producer(&self) -> QueueProducer<B> {
        QueueProducer::new(self.storage.clone(), self.events.clone())
    }

    pub fn consumer(&self) -> QueueConsumer<B> {
        QueueConsumer::new(self.storage.clone(), self.events.clone())
    }

    pub fn changer(&self) -> StatusChanger<B> {
        StatusChanger::new(self.storage.clone(), self.events.clone())
            .with_retry_timeout(self.config.retry_timeout)
            .with_retry_delay(self.config.retry_delay)
    }

    pub fn cleaner(&self) -> QueueCleaner<B> {
        let cleaner = QueueCleaner::new(self.storage.clone(), self.events.clone())
            .with_completed_expiry(self.config.completed_expiry)
            .with_broken_expiry(self.config.broken_expiry);
        match &self.purger {
            Some(purger) => cleaner.with_purger(purger.clone()),
            None => cleaner,
        }
    }

    pub fn storage(&self) -> &QueueStorage<B> {
        &self.storage
    }

    /// Get configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}
