//! Latency and error metrics for queue-service operations.
//!
//! Every remote call records exactly one [`MetricsRecord`] into a
//! fixed-capacity ring buffer kept per operation. Percentiles and error
//! breakdowns are computed on demand from the current buffer contents, so a
//! long run reports the recent window rather than a lifetime digest.
//!
//! # Example
//!
//! ```ignore
//! use queueforge::metrics::{MetricsRecorder, Operation};
//!
//! let metrics = MetricsRecorder::new(1000);
//! metrics.record(Operation::Push, 12, true, Some(200), None, None);
//!
//! let summary = metrics.summary(Operation::Push);
//! println!("p95 push latency: {}ms", summary.latency.p95);
//! ```

pub mod recorder;

pub use recorder::{
    ErrorBreakdown, LatencyStats, MetricsRecord, MetricsRecorder, Operation, OperationSummary,
};
