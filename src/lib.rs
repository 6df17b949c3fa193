//! queueforge: stress and correctness harness for the per-team concurrency
//! queue service.
//!
//! This library provides the scheduler simulation, the typed queue-service
//! client, the latency/error metrics collector, and the passive correctness
//! oracle that together stress a concurrency-queue deployment and verify its
//! scheduling guarantees.

// Core modules
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod oracle;
pub mod report;
pub mod scheduler;

// Re-export commonly used error types
pub use error::{ClientError, ConfigError, SchedulerError};
