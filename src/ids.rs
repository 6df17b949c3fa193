//! Run, job, crawl, and worker identifier generation.
//!
//! All identifiers are strings built from a per-run prefix (8 random hex
//! characters plus the wall-clock timestamp at startup), so ids from
//! concurrent or repeated runs never collide in the shared queue service.

use uuid::Uuid;

use crate::clock::Clock;

/// Number of jobs that share a single derived crawl id.
const JOBS_PER_CRAWL: u64 = 10;

/// Identifier factory scoped to a single run.
#[derive(Debug, Clone)]
pub struct RunIds {
    run_id: String,
}

impl RunIds {
    /// Creates a new factory with a fresh run id.
    pub fn new() -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self {
            run_id: format!("{}-{}", &random[..8], Clock::wall_ms()),
        }
    }

    /// Creates a factory with an explicit run id. Test hook.
    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    /// The run id shared by every identifier this factory produces.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Builds a job id for the given team and per-team counter.
    pub fn job_id(&self, team_id: &str, counter: u64) -> String {
        format!("{}-{}-{}", self.run_id, team_id, counter)
    }

    /// Derives a crawl id from the per-team counter.
    ///
    /// Consecutive jobs map onto the same crawl id in groups of ten, which
    /// mimics a crawl fanning out into many scrape jobs.
    pub fn crawl_id(&self, team_id: &str, counter: u64) -> String {
        format!(
            "crawl-{}-{}-{}",
            self.run_id,
            team_id,
            counter / JOBS_PER_CRAWL
        )
    }

    /// Worker id used for regular queue pops.
    pub fn worker_id(&self) -> String {
        format!("{}-worker", self.run_id)
    }

    /// Worker id used by flush pops.
    ///
    /// The distinct prefix keeps flush traffic recognizable should the oracle
    /// ever be wired into a flush path.
    pub fn flush_worker_id(&self) -> String {
        format!("flush-{}-worker", self.run_id)
    }
}

impl Default for RunIds {
    fn default() -> Self {
        Self::new()
    }
}
