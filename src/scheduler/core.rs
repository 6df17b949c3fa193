//! Tenant state and the scheduler's core transitions.
//!
//! `SchedulerState` owns every mutable piece of the simulation: the per-team
//! tenants, the main queue, and the in-process overflow buffer. The driver
//! serializes all mutations behind one lock; spawned tasks only perform HTTP
//! I/O and re-enter through the driver.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tracing::trace;

use crate::clock::Clock;
use crate::ids::RunIds;

use super::job::{ActiveJob, MainQueueJob, TenantState, Tier};
use super::queue::MainQueue;

/// Jitter applied to per-team push intervals, as a fraction of the interval.
const PUSH_INTERVAL_JITTER: f64 = 0.2;

/// Probability that a generated job carries a crawl id.
const CRAWL_ID_PROBABILITY: f64 = 0.2;

/// Point-in-time totals across all tenants.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerSnapshot {
    /// Jobs generated into the main queue since the run started.
    pub generated: u64,
    /// Jobs that finished processing.
    pub completed: u64,
    /// Jobs currently occupying tenant slots.
    pub active: usize,
    /// Jobs acknowledged by the remote overflow queue and not yet claimed.
    pub queued: u64,
    pub main_queue_len: usize,
    pub overflow_len: usize,
}

/// All mutable simulation state, owned by the driver behind a single lock.
pub struct SchedulerState {
    tenants: HashMap<String, TenantState>,
    pub main_queue: MainQueue,
    /// Jobs picked while their tenant was at capacity, awaiting a remote push.
    pub overflow: Vec<MainQueueJob>,
    job_processing_delay_ms: u64,
    ids: RunIds,
}

impl SchedulerState {
    /// Builds tenants from the tier list: `team_count` teams per tier with
    /// ids of the form `{tier}-team-{index}`.
    pub fn new(tiers: &[Tier], job_processing_delay_ms: u64, ids: RunIds) -> Self {
        let mut tenants = HashMap::new();
        for tier in tiers {
            let tier = Arc::new(tier.clone());
            for index in 0..tier.team_count {
                let team_id = format!("{}-team-{}", tier.name, index);
                tenants.insert(team_id.clone(), TenantState::new(team_id, Arc::clone(&tier)));
            }
        }
        Self {
            tenants,
            main_queue: MainQueue::new(),
            overflow: Vec::new(),
            job_processing_delay_ms,
            ids,
        }
    }

    /// Appends fresh synthetic jobs to the main queue for every tenant whose
    /// jittered push interval has elapsed. No remote calls.
    pub fn generate<R: Rng>(&mut self, now: u64, rng: &mut R) {
        for tenant in self.tenants.values_mut() {
            let interval_ms = 1000.0 / tenant.tier.jobs_per_second;
            let jitter =
                rng.gen_range(1.0 - PUSH_INTERVAL_JITTER..=1.0 + PUSH_INTERVAL_JITTER);
            if (now - tenant.last_push_time) as f64 >= interval_ms * jitter {
                let counter = tenant.job_counter;
                let crawl_id = if rng.gen_bool(CRAWL_ID_PROBABILITY) {
                    Some(self.ids.crawl_id(&tenant.team_id, counter))
                } else {
                    None
                };
                let job = MainQueueJob {
                    job_id: self.ids.job_id(&tenant.team_id, counter),
                    team_id: tenant.team_id.clone(),
                    priority: rng.gen_range(1..=100),
                    created_at: Clock::wall_ms(),
                    crawl_id,
                };
                trace!(job_id = %job.job_id, priority = job.priority, "generated job");
                self.main_queue.push(job);
                tenant.job_counter += 1;
                tenant.last_push_time = now;
            }
        }
    }

    /// Extracts the globally highest-priority job from the main queue.
    pub fn pick_from_main_queue(&mut self) -> Option<MainQueueJob> {
        self.main_queue.pick()
    }

    pub fn is_at_capacity(&self, team_id: &str) -> bool {
        self.tenants
            .get(team_id)
            .map(TenantState::is_at_capacity)
            .unwrap_or(true)
    }

    /// Occupies a tenant slot with the given job.
    ///
    /// # Panics
    ///
    /// Calling this while the tenant is at capacity is a programming error
    /// and aborts the run.
    pub fn start_job(
        &mut self,
        job: &MainQueueJob,
        queue_key: String,
        now: u64,
        promoted: bool,
    ) -> ActiveJob {
        let tenant = self
            .tenants
            .get_mut(&job.team_id)
            .unwrap_or_else(|| panic!("start_job for unknown team {}", job.team_id));
        assert!(
            !tenant.is_at_capacity(),
            "start_job called at capacity for team {} (limit {})",
            tenant.team_id,
            tenant.tier.concurrency_limit
        );
        let active = ActiveJob {
            job_id: job.job_id.clone(),
            queue_key,
            start_time: now,
            promoted,
        };
        tenant.active_jobs.insert(job.job_id.clone(), active.clone());
        active
    }

    /// Removes a finished job from its tenant's slots and bumps the
    /// completion counter. Returns `None` when the job is no longer active.
    pub fn take_completed(&mut self, team_id: &str, job_id: &str) -> Option<ActiveJob> {
        let tenant = self.tenants.get_mut(team_id)?;
        let active = tenant.active_jobs.remove(job_id)?;
        tenant.completed_jobs += 1;
        Some(active)
    }

    /// Whether the team has jobs waiting in the remote overflow queue.
    pub fn has_queued(&self, team_id: &str) -> bool {
        self.tenants
            .get(team_id)
            .map(|t| t.queued_jobs > 0)
            .unwrap_or(false)
    }

    /// Accounts a successful remote push for the team.
    pub fn record_push_success(&mut self, team_id: &str) {
        if let Some(tenant) = self.tenants.get_mut(team_id) {
            tenant.queued_jobs += 1;
        }
    }

    /// Accounts a successful remote pop for the team.
    pub fn record_pop_success(&mut self, team_id: &str) {
        if let Some(tenant) = self.tenants.get_mut(team_id) {
            tenant.queued_jobs = tenant.queued_jobs.saturating_sub(1);
        }
    }

    /// All active jobs whose simulated processing delay has elapsed.
    pub fn completable(&self, now: u64) -> Vec<(String, ActiveJob)> {
        let mut ready = Vec::new();
        for tenant in self.tenants.values() {
            for active in tenant.active_jobs.values() {
                if now.saturating_sub(active.start_time) >= self.job_processing_delay_ms {
                    ready.push((tenant.team_id.clone(), active.clone()));
                }
            }
        }
        ready
    }

    /// Totals across all tenants.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let mut snapshot = SchedulerSnapshot {
            main_queue_len: self.main_queue.len(),
            overflow_len: self.overflow.len(),
            ..Default::default()
        };
        for tenant in self.tenants.values() {
            snapshot.generated += tenant.job_counter;
            snapshot.completed += tenant.completed_jobs;
            snapshot.active += tenant.active_jobs.len();
            snapshot.queued += tenant.queued_jobs;
        }
        snapshot
    }

    /// Completed-job counts per team, grouped by tier name.
    pub fn tier_team_completions(&self) -> HashMap<String, Vec<u64>> {
        let mut by_tier: HashMap<String, Vec<u64>> = HashMap::new();
        for tenant in self.tenants.values() {
            by_tier
                .entry(tenant.tier.name.clone())
                .or_default()
                .push(tenant.completed_jobs);
        }
        by_tier
    }

    /// Team ids, for flush and count sweeps.
    pub fn team_ids(&self) -> Vec<String> {
        self.tenants.keys().cloned().collect()
    }

    pub fn tenant(&self, team_id: &str) -> Option<&TenantState> {
        self.tenants.get(team_id)
    }

    pub fn job_processing_delay_ms(&self) -> u64 {
        self.job_processing_delay_ms
    }
}
