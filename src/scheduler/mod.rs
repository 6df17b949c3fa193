//! Priority-ordered, per-tenant concurrency-governed job scheduling.
//!
//! This module contains the simulation core:
//!
//! - **job**: tiers, tenants, and the job types flowing through the system
//! - **queue**: the in-process main queue with selection-time priority order
//! - **core**: tenant state and the scheduler's transitions
//! - **driver**: the phase loop stressing a queue service end to end
//!
//! # Job lifecycle
//!
//! ```text
//!  generate ──▶ main queue ──▶ active ──▶ completed
//!                   │            ▲
//!                   │ (team at   │ promotion pop
//!                   ▼  capacity) │ on completion
//!               overflow ──▶ remote concurrency queue
//! ```
//!
//! A job picked while its team is at capacity overflows into the remote
//! per-team queue; the next completion within that team pops it back
//! ("promotion") and starts it in the freed slot.

pub mod core;
pub mod driver;
pub mod job;
pub mod queue;

pub use self::core::{SchedulerSnapshot, SchedulerState};
pub use driver::{Driver, RunOutcome};
pub use job::{ActiveJob, MainQueueJob, TenantState, Tier};
pub use queue::MainQueue;
