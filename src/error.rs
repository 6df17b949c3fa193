//! Error types for queueforge operations.
//!
//! Defines error types for the major subsystems:
//! - Configuration parsing and validation
//! - Queue-service client construction and flush paths
//! - Fatal scheduler/driver conditions
//!
//! Note that individual remote calls do NOT surface errors through these
//! types: every queue-service operation returns a tagged result value
//! (`crate::client::OpResult`) so the scheduler can treat failures as
//! transient without exception-style control flow.

use thiserror::Error;

/// Errors that can occur while parsing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid tier spec '{spec}': {message} (expected name:teams:limit:jps)")]
    InvalidTierSpec { spec: String, message: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Errors that can occur in the queue-service client outside the metered
/// request path (construction and flush).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    BuildFailed(String),

    #[error("Flush request failed: {0}")]
    FlushFailed(String),
}

/// Fatal errors that abort a stress run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Queue service health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Scheduler invariant violated: {0}")]
    InvariantViolated(String),
}
