use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{QueueError, QueueResult};

/// Queue timing policy and component settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long an item may stay PROCESSING before the timeout sweep reclaims it
    #[serde(with = "humantime_serde")]
    pub retry_timeout: Duration,
    /// How long a RETRY item waits before it becomes READY again
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Retention of completed-archive entries
    #[serde(with = "humantime_serde")]
    pub completed_expiry: Duration,
    /// Retention of broken-archive entries
    #[serde(with = "humantime_serde")]
    pub broken_expiry: Duration,
    pub limits: BatchLimits,
    pub worker: WorkerConfig,
    pub maintenance: MaintenanceConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_timeout: Duration::from_secs(5 * 60),
            retry_delay: Duration::from_secs(2 * 60),
            completed_expiry: Duration::from_secs(24 * 60 * 60),
            broken_expiry: Duration::from_secs(72 * 60 * 60),
            limits: BatchLimits::default(),
            worker: WorkerConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

/// Batch sizes used by the worker pool and the maintenance runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    pub read_items: u32,
    pub change_processing_to_retry: u32,
    pub change_retry_to_ready: u32,
    pub remove_items_without_attempts: u32,
    pub remove_completed_items: u32,
    pub remove_broken_items: u32,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            read_items: 10,
            change_processing_to_retry: 100,
            change_retry_to_ready: 100,
            remove_items_without_attempts: 100,
            remove_completed_items: 100,
            remove_broken_items: 100,
        }
    }
}

impl BatchLimits {
    pub(crate) fn validate(&self) -> QueueResult<()> {
        let limits = [
            ("limits.read_items", self.read_items),
            ("limits.change_processing_to_retry", self.change_processing_to_retry),
            ("limits.change_retry_to_ready", self.change_retry_to_ready),
            ("limits.remove_items_without_attempts", self.remove_items_without_attempts),
            ("limits.remove_completed_items", self.remove_completed_items),
            ("limits.remove_broken_items", self.remove_broken_items),
        ];
        for (key, value) in limits {
            if value == 0 {
                return Err(QueueError::config(key, "limit value is zero"));
            }
        }
        Ok(())
    }
}

/// Consumer worker pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent polling workers
    pub workers: usize,
    /// Sleep between polls that found nothing
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound of random jitter added to idle sleeps
    #[serde(with = "humantime_serde")]
    pub poll_jitter: Duration,
    /// Sleep after a failed poll
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
    /// Deadline for a single handler call; exceeding it rejects the item
    #[serde(with = "humantime_serde")]
    pub handle_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(1),
            poll_jitter: Duration::from_millis(250),
            error_backoff: Duration::from_secs(5),
            handle_timeout: Duration::from_secs(60),
        }
    }
}

/// Periodic recovery and cleanup settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Period of the two status changer sweeps
    #[serde(with = "humantime_serde")]
    pub change_interval: Duration,
    /// Period of the cleaner operations
    #[serde(with = "humantime_serde")]
    pub clean_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            change_interval: Duration::from_secs(30),
            clean_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl MaintenanceConfig {
    /// Both periods drive `tokio::time::interval`, which needs a non-zero period
    pub fn validate(&self) -> QueueResult<()> {
        if self.change_interval.is_zero() {
            return Err(QueueError::config("maintenance.change_interval", "must be positive"));
        }
        if self.clean_interval.is_zero() {
            return Err(QueueError::config("maintenance.clean_interval", "must be positive"));
        }
        Ok(())
    }
}

impl QueueConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_completed_expiry(mut self, expiry: Duration) -> Self {
        self.completed_expiry = expiry;
        self
    }

    pub fn with_broken_expiry(mut self, expiry: Duration) -> Self {
        self.broken_expiry = expiry;
        self
    }

    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = maintenance;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> QueueResult<()> {
        self.limits.validate()?;

        if self.worker.workers == 0 {
            return Err(QueueError::config("worker.workers", "at least one worker is required"));
        }
        if self.worker.handle_timeout.is_zero() {
            return Err(QueueError::config("worker.handle_timeout", "must be positive"));
        }
        self.maintenance.validate()
    }

    /// Load defaults overridden by `MRQUEUE_*` environment variables
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load defaults overridden by values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let durations: [(&str, &mut Duration); 10] = [
            ("MRQUEUE_RETRY_TIMEOUT", &mut config.retry_timeout),
            ("MRQUEUE_RETRY_DELAY", &mut config.retry_delay),
            ("MRQUEUE_COMPLETED_EXPIRY", &mut config.completed_expiry),
            ("MRQUEUE_BROKEN_EXPIRY", &mut config.broken_expiry),
            ("MRQUEUE_POLL_INTERVAL", &mut config.worker.poll_interval),
            ("MRQUEUE_POLL_JITTER", &mut config.worker.poll_jitter),
            ("MRQUEUE_ERROR_BACKOFF", &mut config.worker.error_backoff),
            ("MRQUEUE_HANDLE_TIMEOUT", &mut config.worker.handle_timeout),
            ("MRQUEUE_CHANGE_INTERVAL", &mut config.maintenance.change_interval),
            ("MRQUEUE_CLEAN_INTERVAL", &mut config.maintenance.clean_interval),
        ];
        for (key, slot) in durations {
            if let Some(raw) = lookup(key) {
                *slot = humantime::parse_duration(raw.trim()).map_err(|e| QueueError::config(key, e.to_string()))?;
            }
        }

        let limits: [(&str, &mut u32); 6] = [
            ("MRQUEUE_READ_LIMIT", &mut config.limits.read_items),
            ("MRQUEUE_CHANGE_TIMEOUT_LIMIT", &mut config.limits.change_processing_to_retry),
            ("MRQUEUE_CHANGE_RETRY_LIMIT", &mut config.limits.change_retry_to_ready),
            ("MRQUEUE_REMOVE_WITHOUT_ATTEMPTS_LIMIT", &mut config.limits.remove_items_without_attempts),
            ("MRQUEUE_REMOVE_COMPLETED_LIMIT", &mut config.limits.remove_completed_items),
            ("MRQUEUE_REMOVE_BROKEN_LIMIT", &mut config.limits.remove_broken_items),
        ];
        for (key, slot) in limits {
            if let Some(raw) = lookup(key) {
                *slot = raw.trim().parse().map_err(|e: std::num::ParseIntError| QueueError::config(key, e.to_string()))?;
            }
        }

        if let Some(raw) = lookup("MRQUEUE_WORKERS") {
            config.worker.workers = raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| QueueError::config("MRQUEUE_WORKERS", e.to_string()))?;
        }

        config.validate()?;
        Ok(config)
    }
}
