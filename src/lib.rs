//! Periodic exporter shipping metric registry snapshots to CloudWatch

pub mod batcher;
pub mod config;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod publisher;
pub mod retry;
pub mod sample;
pub mod scheduler;
pub mod source;
pub mod stats;
pub mod transformer;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::batcher::{Batch, BatchLimits, Batcher};
    pub use crate::config::{BridgeConfig, ConfigBuilder, load_bridge_config};
    pub use crate::error::{BridgeError, Result};
    pub use crate::pipeline::{Exporter, ReportingCycle};
    pub use crate::publisher::{MemoryPublisher, PublishOutcome, Publisher};
    #[cfg(feature = "http")]
    pub use crate::publisher::{Anonymous, HttpPublisher, RequestAuthorizer};
    pub use crate::retry::{RetryConfig, RetryController};
    pub use crate::sample::{MetricSample, Statistic, Unit};
    pub use crate::scheduler::Scheduler;
    pub use crate::source::{AggregateState, Snapshot, SnapshotSource, StaticSource, Summary};
    pub use crate::stats::{ExportStats, StatsSnapshot};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
