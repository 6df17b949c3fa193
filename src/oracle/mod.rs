//! Passive correctness oracle for queue operations.
//!
//! The oracle observes pushes, claims, and completions as they happen and
//! answers, at the end of a run, whether every pushed job was claimed exactly
//! once and completed, and whether per-team priority ordering held. It never
//! interferes with the run: rule breaches are recorded as violations and
//! surfaced only in the final report.
//!
//! Event placement mirrors where ground truth first becomes known: push and
//! claim events are recorded by the queue-service client, completion events by
//! the scheduler when a promoted job finishes.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::warn;

/// Hard rule breaches. Any of these indicates a scheduler or service bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// A job id was claimed more than once.
    DoubleClaim,
    /// A claim arrived for a job whose push was never confirmed.
    UnknownClaim,
    /// A completion arrived for a promoted job before its claim.
    CompleteBeforeClaim,
    /// A claim surfaced under a different team than the push.
    CrossTenantClaim,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ViolationKind::DoubleClaim => "double_claim",
            ViolationKind::UnknownClaim => "unknown_claim",
            ViolationKind::CompleteBeforeClaim => "complete_before_claim",
            ViolationKind::CrossTenantClaim => "cross_tenant_claim",
        };
        f.write_str(name)
    }
}

/// A recorded rule breach.
#[derive(Debug, Clone)]
pub struct Violation {
    pub kind: ViolationKind,
    pub job_id: String,
    pub detail: String,
}

/// Per-team priority inversion: a claim arrived with more urgency than an
/// earlier claim. Reported as a warning, not fatal — ordering inside the
/// remote queue is the service's contract, and small races are expected when
/// pops from several completions interleave.
#[derive(Debug, Clone)]
pub struct InversionWarning {
    pub team_id: String,
    pub job_id: String,
    pub priority: u32,
    pub previous_priority: u32,
}

/// Everything the oracle knows about one job id.
#[derive(Debug, Clone)]
struct OracleRecord {
    team_id: String,
    priority: u32,
    crawl_id: Option<String>,
    push_confirmed: bool,
    claim_seen: bool,
    complete_seen: bool,
}

#[derive(Default)]
struct OracleInner {
    records: HashMap<String, OracleRecord>,
    claims: HashSet<String>,
    /// Last claimed priority per team, for monotonicity checking.
    last_claim_priority: HashMap<String, u32>,
    violations: Vec<Violation>,
    warnings: Vec<InversionWarning>,
}

/// End-of-test verification output. Produced without mutating oracle state.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// Jobs whose push was confirmed but which were never claimed. These
    /// should match what is still sitting in the remote queues.
    pub confirmed_never_claimed: Vec<String>,
    /// Promoted jobs that were claimed but never completed.
    pub claimed_never_completed: Vec<String>,
    pub pushes_recorded: usize,
    pub pushes_confirmed: usize,
    pub claims: usize,
    pub completions: usize,
    pub violations: Vec<Violation>,
    pub warnings: Vec<InversionWarning>,
}

impl VerificationReport {
    /// True when no hard rule was breached.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Passive observer enforcing the claim/completion rules at record time.
pub struct CorrectnessOracle {
    /// Admit claims for jobs pushed before this run started (e.g. a shared
    /// staging queue) instead of flagging them as unknown.
    admit_preexisting: bool,
    inner: Mutex<OracleInner>,
}

impl CorrectnessOracle {
    pub fn new() -> Self {
        Self {
            admit_preexisting: false,
            inner: Mutex::new(OracleInner::default()),
        }
    }

    /// Oracle that tolerates claims for jobs it never saw pushed.
    pub fn admitting_preexisting() -> Self {
        Self {
            admit_preexisting: true,
            inner: Mutex::new(OracleInner::default()),
        }
    }

    /// Called by the client before the push request goes out.
    pub fn record_push(
        &self,
        job_id: &str,
        team_id: &str,
        priority: u32,
        crawl_id: Option<&str>,
    ) {
        let mut inner = self.inner.lock().expect("oracle lock poisoned");
        inner.records.insert(
            job_id.to_string(),
            OracleRecord {
                team_id: team_id.to_string(),
                priority,
                crawl_id: crawl_id.map(str::to_string),
                push_confirmed: false,
                claim_seen: false,
                complete_seen: false,
            },
        );
    }

    /// Called by the client when the push got a 2xx.
    pub fn confirm_push(&self, job_id: &str) {
        let mut inner = self.inner.lock().expect("oracle lock poisoned");
        if let Some(record) = inner.records.get_mut(job_id) {
            record.push_confirmed = true;
        }
    }

    /// Called by the client on every non-null pop result.
    pub fn record_claim(&self, job_id: &str, team_id: &str, priority: u32) {
        let mut guard = self.inner.lock().expect("oracle lock poisoned");
        let inner = &mut *guard;

        if inner.claims.contains(job_id) {
            let violation = Violation {
                kind: ViolationKind::DoubleClaim,
                job_id: job_id.to_string(),
                detail: format!("job claimed again by team {}", team_id),
            };
            warn!(job_id = job_id, "oracle: double claim");
            inner.violations.push(violation);
            return;
        }
        inner.claims.insert(job_id.to_string());

        match inner.records.get(job_id) {
            Some(record) if !record.push_confirmed => {
                if !self.admit_preexisting {
                    let violation = Violation {
                        kind: ViolationKind::UnknownClaim,
                        job_id: job_id.to_string(),
                        detail: "claim before push confirmation".to_string(),
                    };
                    warn!(job_id = job_id, "oracle: claim before confirmed push");
                    inner.violations.push(violation);
                }
            }
            Some(record) if record.team_id != team_id => {
                let violation = Violation {
                    kind: ViolationKind::CrossTenantClaim,
                    job_id: job_id.to_string(),
                    detail: format!(
                        "pushed for team {} but claimed by team {}",
                        record.team_id, team_id
                    ),
                };
                warn!(job_id = job_id, "oracle: cross-tenant claim");
                inner.violations.push(violation);
            }
            Some(_) => {}
            None => {
                if !self.admit_preexisting {
                    let violation = Violation {
                        kind: ViolationKind::UnknownClaim,
                        job_id: job_id.to_string(),
                        detail: "claim for a job never pushed this run".to_string(),
                    };
                    warn!(job_id = job_id, "oracle: claim for unknown job");
                    inner.violations.push(violation);
                }
            }
        }

        if let Some(record) = inner.records.get_mut(job_id) {
            record.claim_seen = true;
        }

        // Monotonicity: within a team, claimed priorities should be
        // non-decreasing (lower value = more urgent, served first).
        let previous = inner.last_claim_priority.get(team_id).copied();
        if let Some(previous_priority) = previous {
            if priority < previous_priority {
                let warning = InversionWarning {
                    team_id: team_id.to_string(),
                    job_id: job_id.to_string(),
                    priority,
                    previous_priority,
                };
                warn!(
                    team_id = team_id,
                    job_id = job_id,
                    priority = priority,
                    previous_priority = previous_priority,
                    "oracle: priority inversion"
                );
                inner.warnings.push(warning);
            }
        }
        inner
            .last_claim_priority
            .insert(team_id.to_string(), priority);
    }

    /// Called by the client when a claimed job is returned to the queue.
    ///
    /// A released job is claimable again, so its claim bookkeeping is
    /// cleared; without this, the legitimate re-claim would register as a
    /// double claim.
    pub fn record_release(&self, job_id: &str) {
        let mut inner = self.inner.lock().expect("oracle lock poisoned");
        inner.claims.remove(job_id);
        if let Some(record) = inner.records.get_mut(job_id) {
            if !record.complete_seen {
                record.claim_seen = false;
            }
        }
    }

    /// Called by the scheduler when a promoted job completes.
    pub fn record_complete(&self, job_id: &str) {
        let mut guard = self.inner.lock().expect("oracle lock poisoned");
        let inner = &mut *guard;

        if !inner.claims.contains(job_id) {
            let violation = Violation {
                kind: ViolationKind::CompleteBeforeClaim,
                job_id: job_id.to_string(),
                detail: "completion observed before any claim".to_string(),
            };
            warn!(job_id = job_id, "oracle: completion before claim");
            inner.violations.push(violation);
        }

        if let Some(record) = inner.records.get_mut(job_id) {
            if record.complete_seen {
                // A second completion implies a second claim was consumed.
                let violation = Violation {
                    kind: ViolationKind::DoubleClaim,
                    job_id: job_id.to_string(),
                    detail: "job completed more than once".to_string(),
                };
                inner.violations.push(violation);
            }
            record.complete_seen = true;
        }
    }

    /// Current violation list.
    pub fn violations(&self) -> Vec<Violation> {
        self.inner
            .lock()
            .expect("oracle lock poisoned")
            .violations
            .clone()
    }

    /// Current inversion warnings.
    pub fn warnings(&self) -> Vec<InversionWarning> {
        self.inner
            .lock()
            .expect("oracle lock poisoned")
            .warnings
            .clone()
    }

    /// Priority and crawl id observed at push time, if known. Test hook for
    /// round-trip assertions.
    pub fn pushed_priority(&self, job_id: &str) -> Option<(u32, Option<String>)> {
        let inner = self.inner.lock().expect("oracle lock poisoned");
        inner
            .records
            .get(job_id)
            .map(|r| (r.priority, r.crawl_id.clone()))
    }

    /// Builds the end-of-test report. Does not mutate state.
    pub fn run_end_of_test_verification(&self) -> VerificationReport {
        let inner = self.inner.lock().expect("oracle lock poisoned");

        let mut confirmed_never_claimed: Vec<String> = inner
            .records
            .iter()
            .filter(|(_, r)| r.push_confirmed && !r.claim_seen)
            .map(|(id, _)| id.clone())
            .collect();
        confirmed_never_claimed.sort();

        let mut claimed_never_completed: Vec<String> = inner
            .records
            .iter()
            .filter(|(_, r)| r.claim_seen && !r.complete_seen)
            .map(|(id, _)| id.clone())
            .collect();
        claimed_never_completed.sort();

        VerificationReport {
            confirmed_never_claimed,
            claimed_never_completed,
            pushes_recorded: inner.records.len(),
            pushes_confirmed: inner
                .records
                .values()
                .filter(|r| r.push_confirmed)
                .count(),
            claims: inner.claims.len(),
            completions: inner
                .records
                .values()
                .filter(|r| r.complete_seen)
                .count(),
            violations: inner.violations.clone(),
            warnings: inner.warnings.clone(),
        }
    }
}

impl Default for CorrectnessOracle {
    fn default() -> Self {
        Self::new()
    }
}
