//! Job and tenant types for the scheduler.
//!
//! This module defines the core types used in the scheduling system:
//!
//! - `Tier`: a class of tenants sharing a concurrency limit and push rate
//! - `MainQueueJob`: a synthetic job waiting in the in-process main queue
//! - `ActiveJob`: a job currently occupying one of a tenant's slots
//! - `TenantState`: per-team bookkeeping for capacity and overflow accounting

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A class of tenants: how many teams it contains, how many jobs each team
/// may run simultaneously, and how fast each team generates synthetic jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Tier name, used as a team id prefix (e.g. "free", "growth").
    pub name: String,
    /// Number of simulated teams in this tier.
    pub team_count: usize,
    /// Maximum simultaneously active jobs per team.
    pub concurrency_limit: usize,
    /// Synthetic job generation rate per team.
    pub jobs_per_second: f64,
}

impl Tier {
    pub fn new(
        name: impl Into<String>,
        team_count: usize,
        concurrency_limit: usize,
        jobs_per_second: f64,
    ) -> Self {
        Self {
            name: name.into(),
            team_count,
            concurrency_limit,
            jobs_per_second,
        }
    }
}

/// A synthetic job sitting in the in-process main queue.
///
/// Lower `priority` values are more urgent and picked first.
#[derive(Debug, Clone, PartialEq)]
pub struct MainQueueJob {
    pub job_id: String,
    pub team_id: String,
    pub priority: u32,
    /// Wall-clock ms at generation time; payload-layer only.
    pub created_at: i64,
    pub crawl_id: Option<String>,
}

/// A job occupying one of a tenant's concurrency slots.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveJob {
    pub job_id: String,
    /// Opaque handle from the remote pop; empty for jobs started straight
    /// from the main queue.
    pub queue_key: String,
    /// Monotonic ms when the job started.
    pub start_time: u64,
    /// True when the job was obtained by promotion from the remote queue.
    pub promoted: bool,
}

/// Per-team scheduling state.
#[derive(Debug, Clone)]
pub struct TenantState {
    pub team_id: String,
    pub tier: Arc<Tier>,
    /// Jobs currently running. Never exceeds `tier.concurrency_limit`.
    pub active_jobs: HashMap<String, ActiveJob>,
    /// Jobs this team has sitting in the remote overflow queue: successful
    /// pushes minus successful pops.
    pub queued_jobs: u64,
    pub completed_jobs: u64,
    /// Per-team job counter feeding id and crawl-id derivation.
    pub job_counter: u64,
    /// Monotonic ms of the last synthetic push.
    pub last_push_time: u64,
}

impl TenantState {
    pub fn new(team_id: impl Into<String>, tier: Arc<Tier>) -> Self {
        Self {
            team_id: team_id.into(),
            tier,
            active_jobs: HashMap::new(),
            queued_jobs: 0,
            completed_jobs: 0,
            job_counter: 0,
            last_push_time: 0,
        }
    }

    /// Whether every concurrency slot is occupied.
    pub fn is_at_capacity(&self) -> bool {
        self.active_jobs.len() >= self.tier.concurrency_limit
    }
}
