//! Queue-service client: typed wrapper over the concurrency-queue REST API.
//!
//! - **QueueService**: the trait the scheduler drives
//! - **QueueServiceClient**: the metered, oracle-observed HTTP implementation
//! - **OpResult**: tagged success/failure value returned by every operation

pub mod service;
pub mod types;

pub use service::{QueueClientConfig, QueueService, QueueServiceClient};
pub use types::{ClaimedJob, ClaimedJobBody, OpResult};
