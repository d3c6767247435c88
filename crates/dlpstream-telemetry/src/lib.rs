//! dlpstream Telemetry
//!
//! Counters and failure reports for the redaction pipeline.
//!
//! Provides:
//! - In-process counters with snapshots, mirrored to the `metrics` facade
//! - Structured reports for dropped batches, lost deliveries and shutdown
//!   leftovers, logged where operators look and kept for inspection

pub mod metrics;
pub mod report;

pub use self::metrics::{MetricsCollector, MetricsSnapshot};
pub use report::{DroppedBatch, LostDelivery, Report, Reporter, Undelivered};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::metrics::MetricsCollector;
    pub use crate::report::{Report, Reporter};
}
