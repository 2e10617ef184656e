pub mod emitter;
pub mod metrics;
pub mod tracing;

pub use emitter::{BoxStream, BroadcastEmitter, EventEmitter, FanoutEmitter, NoopEmitter, SourceEmitter, TracingEmitter};
pub use metrics::{LiveMetrics, OperationMetrics};

#[cfg(feature = "metrics")]
pub use metrics::PrometheusEmitter;

#[cfg(feature = "tracing-basic")]
pub use self::tracing::init_tracing;
