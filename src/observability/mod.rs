pub mod metrics;
pub mod tracing;

pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use tracing::init_tracing;
