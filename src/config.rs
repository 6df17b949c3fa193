//! Run configuration for the stress harness.
//!
//! Every knob has a reference default so `queueforge run` against a local
//! service works out of the box. Tiers can be overridden from the command
//! line with repeated `--tier name:teams:limit:jps` arguments.

use std::time::Duration;

use crate::error::ConfigError;
use crate::scheduler::job::Tier;

/// Full configuration for one stress run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Base URL of the queue service.
    pub service_url: String,
    /// How long to generate load before draining.
    pub duration: Duration,
    /// Size of the worker semaphore bounding concurrent remote calls.
    pub worker_concurrency: usize,
    /// Ring-buffer capacity per metered operation.
    pub metrics_buffer_size: usize,
    /// Interval between live progress reports.
    pub report_interval: Duration,
    /// Attach the correctness oracle to the run.
    pub correctness_checking: bool,
    /// Simulated processing time of an active job.
    pub job_processing_delay_ms: u64,
    /// Tenant tiers to simulate.
    pub tiers: Vec<Tier>,
    /// Log individual call failures as they happen.
    pub verbose: bool,
    /// Seed for deterministic job generation; random when absent.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8080".to_string(),
            duration: Duration::from_secs(30),
            worker_concurrency: 64,
            metrics_buffer_size: 1000,
            report_interval: Duration::from_secs(5),
            correctness_checking: true,
            job_processing_delay_ms: 500,
            tiers: default_tiers(),
            verbose: false,
            seed: None,
        }
    }
}

impl RunConfig {
    /// Rejects configurations that cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "worker_concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.tiers.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one tier is required".to_string(),
            ));
        }
        for tier in &self.tiers {
            if tier.team_count == 0 || tier.concurrency_limit == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "tier '{}' must have non-zero team count and concurrency limit",
                    tier.name
                )));
            }
            if tier.jobs_per_second <= 0.0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "tier '{}' must have a positive jobs-per-second rate",
                    tier.name
                )));
            }
        }
        Ok(())
    }
}

/// Reference tier mix: many small teams, a few large ones.
pub fn default_tiers() -> Vec<Tier> {
    vec![
        Tier::new("free", 25, 2, 1.0),
        Tier::new("hobby", 10, 4, 2.0),
        Tier::new("standard", 5, 8, 5.0),
        Tier::new("growth", 2, 16, 10.0),
    ]
}

/// Parses a `name:teams:limit:jps` tier spec.
pub fn parse_tier_spec(spec: &str) -> Result<Tier, ConfigError> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 4 {
        return Err(ConfigError::InvalidTierSpec {
            spec: spec.to_string(),
            message: format!("expected 4 fields, got {}", parts.len()),
        });
    }

    let name = parts[0].trim();
    if name.is_empty() {
        return Err(ConfigError::InvalidTierSpec {
            spec: spec.to_string(),
            message: "tier name is empty".to_string(),
        });
    }

    let team_count: usize = parts[1].parse().map_err(|_| ConfigError::InvalidTierSpec {
        spec: spec.to_string(),
        message: format!("invalid team count '{}'", parts[1]),
    })?;
    let concurrency_limit: usize =
        parts[2].parse().map_err(|_| ConfigError::InvalidTierSpec {
            spec: spec.to_string(),
            message: format!("invalid concurrency limit '{}'", parts[2]),
        })?;
    let jobs_per_second: f64 = parts[3].parse().map_err(|_| ConfigError::InvalidTierSpec {
        spec: spec.to_string(),
        message: format!("invalid jobs-per-second '{}'", parts[3]),
    })?;

    Ok(Tier::new(name, team_count, concurrency_limit, jobs_per_second))
}
