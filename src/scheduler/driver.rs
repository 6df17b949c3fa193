//! The main simulation loop.
//!
//! One cooperative loop drives four phases per tick:
//!
//! - **A generate**: append synthetic jobs to the main queue
//! - **B overflow drain**: hand buffered overflow jobs to remote-push tasks
//! - **C dispatch**: pick highest-priority jobs and start them or overflow
//! - **D completion**: finish elapsed jobs and promote from the remote queue
//!
//! All tenant-state, main-queue, and overflow mutations happen behind a
//! single lock that is never held across an HTTP await. Spawned tasks own
//! only HTTP I/O (and the oracle callbacks living inside the client); their
//! results re-enter the loop through an outcome channel or a short re-lock.
//! Concurrent remote work is bounded by one counting semaphore.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::client::QueueService;
use crate::clock::Clock;
use crate::config::RunConfig;
use crate::error::SchedulerError;
use crate::ids::RunIds;
use crate::metrics::MetricsRecorder;
use crate::oracle::{CorrectnessOracle, VerificationReport};
use crate::report;

use super::core::{SchedulerState, SchedulerSnapshot};
use super::job::{ActiveJob, MainQueueJob};

/// Maximum main-queue picks per tick.
const DISPATCH_BATCH: usize = 100;

/// Pending semaphore acquirers beyond which a saturated tick backs off.
const SATURATION_WAITERS: usize = 1000;

const SATURATION_SLEEP: Duration = Duration::from_millis(10);

/// Pacing between drain iterations.
const DRAIN_TICK: Duration = Duration::from_millis(10);

/// 4xx push failures for one job before it is released as poison.
const POISON_4XX_ATTEMPTS: u32 = 3;

const DRAIN_PROGRESS_INTERVAL_MS: u64 = 5_000;

/// Drain declares a stall when the active count sits unchanged this long.
const DRAIN_STALL_MS: u64 = 10_000;

/// Result of a remote push attempt, reported back to the loop.
struct PushOutcome {
    job: MainQueueJob,
    success: bool,
    http_status: Option<u16>,
}

/// Final accounting for one run.
#[derive(Debug)]
pub struct RunOutcome {
    pub snapshot: SchedulerSnapshot,
    /// Completed-job counts per team, grouped by tier name.
    pub tier_team_completions: HashMap<String, Vec<u64>>,
    /// End-of-test oracle report, when correctness checking was on.
    pub verification: Option<VerificationReport>,
    /// Drain gave up because the active count stopped moving.
    pub stalled: bool,
    /// Drain hit its hard time cap with jobs still active.
    pub drain_capped: bool,
}

/// Drives the simulation against a queue service.
pub struct Driver {
    state: Arc<Mutex<SchedulerState>>,
    client: Arc<dyn QueueService>,
    metrics: Arc<MetricsRecorder>,
    oracle: Option<Arc<CorrectnessOracle>>,
    semaphore: Arc<Semaphore>,
    waiters: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    clock: Arc<Clock>,
    config: RunConfig,
    push_outcome_tx: mpsc::UnboundedSender<PushOutcome>,
    push_outcome_rx: mpsc::UnboundedReceiver<PushOutcome>,
    /// 4xx attempt counts per job id, for the poison path.
    poison_counts: HashMap<String, u32>,
    rng: ChaCha8Rng,
}

impl Driver {
    pub fn new(
        config: RunConfig,
        client: Arc<dyn QueueService>,
        metrics: Arc<MetricsRecorder>,
        oracle: Option<Arc<CorrectnessOracle>>,
        ids: RunIds,
    ) -> Self {
        let state = SchedulerState::new(&config.tiers, config.job_processing_delay_ms, ids);
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let (push_outcome_tx, push_outcome_rx) = mpsc::unbounded_channel();

        Self {
            state: Arc::new(Mutex::new(state)),
            client,
            metrics,
            oracle,
            semaphore: Arc::new(Semaphore::new(config.worker_concurrency)),
            waiters: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
            clock: Arc::new(Clock::new()),
            config,
            push_outcome_tx,
            push_outcome_rx,
            poison_counts: HashMap::new(),
            rng,
        }
    }

    /// Flag that moves the loop from load generation into the drain phase.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs the full load-then-drain cycle.
    ///
    /// Fails fast when the service does not answer its health check;
    /// everything after that is reported, not raised.
    pub async fn run(&mut self) -> Result<RunOutcome, SchedulerError> {
        let health = self.client.health().await;
        if !health.success {
            return Err(SchedulerError::HealthCheckFailed(
                health.error.unwrap_or_else(|| "no response".to_string()),
            ));
        }

        info!(
            duration_secs = self.config.duration.as_secs(),
            worker_concurrency = self.config.worker_concurrency,
            tiers = self.config.tiers.len(),
            "starting load phase"
        );

        let start = self.clock.now_ms();
        let duration_ms = self.config.duration.as_millis() as u64;
        let report_interval_ms = self.config.report_interval.as_millis() as u64;
        let mut last_report = start;

        while !self.shutdown.load(Ordering::SeqCst) && self.clock.now_ms() < start + duration_ms {
            self.tick().await;

            let now = self.clock.now_ms();
            if now.saturating_sub(last_report) >= report_interval_ms {
                let snapshot = { self.state.lock().await.snapshot() };
                report::log_progress(now.saturating_sub(start), &snapshot, &self.metrics);
                last_report = now;
            }
        }

        let (stalled, drain_capped) = self.drain().await;

        let (snapshot, tier_team_completions) = {
            let state = self.state.lock().await;
            (state.snapshot(), state.tier_team_completions())
        };
        let verification = self
            .oracle
            .as_ref()
            .map(|oracle| oracle.run_end_of_test_verification());

        report::log_final(&snapshot, &self.metrics, verification.as_ref());

        Ok(RunOutcome {
            snapshot,
            tier_team_completions,
            verification,
            stalled,
            drain_capped,
        })
    }

    async fn tick(&mut self) {
        let now = self.clock.now_ms();

        // Phase A: generate synthetic jobs. No remote calls.
        {
            let mut state = self.state.lock().await;
            state.generate(now, &mut self.rng);
        }

        // Settle earlier push attempts before handing out new ones.
        self.apply_push_outcomes().await;

        // Phase B: one push task per buffered overflow job.
        self.drain_overflow().await;

        // Phase C: dispatch from the main queue.
        self.dispatch(now).await;

        // Phase D: completions and promotions.
        self.run_completions(now).await;

        // Cooperative scheduling point: HTTP tasks make progress here.
        tokio::task::yield_now().await;

        if self.semaphore.available_permits() == 0
            && self.waiters.load(Ordering::Relaxed) > SATURATION_WAITERS
        {
            tokio::time::sleep(SATURATION_SLEEP).await;
        }
    }

    /// Applies buffered push results: successes bump the team's remote-queue
    /// accounting; failures put the job back in the overflow buffer so the
    /// next tick retries it. A job whose push keeps failing with 4xx is
    /// released as poison instead of retrying forever.
    async fn apply_push_outcomes(&mut self) {
        while let Ok(outcome) = self.push_outcome_rx.try_recv() {
            let mut state = self.state.lock().await;
            if outcome.success {
                self.poison_counts.remove(&outcome.job.job_id);
                state.record_push_success(&outcome.job.team_id);
                continue;
            }

            let is_4xx = matches!(outcome.http_status, Some(s) if (400..500).contains(&s));
            if is_4xx {
                let attempts = self
                    .poison_counts
                    .entry(outcome.job.job_id.clone())
                    .or_insert(0);
                *attempts += 1;
                if *attempts >= POISON_4XX_ATTEMPTS {
                    self.poison_counts.remove(&outcome.job.job_id);
                    drop(state);
                    warn!(
                        job_id = %outcome.job.job_id,
                        "push rejected {} times, releasing as poison",
                        POISON_4XX_ATTEMPTS
                    );
                    let client = Arc::clone(&self.client);
                    let job_id = outcome.job.job_id;
                    self.spawn_bounded(async move {
                        let _ = client.release(&job_id).await;
                    });
                    continue;
                }
            }
            state.overflow.push(outcome.job);
        }
    }

    async fn drain_overflow(&self) {
        let jobs = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.overflow)
        };
        for job in jobs {
            let client = Arc::clone(&self.client);
            let tx = self.push_outcome_tx.clone();
            self.spawn_bounded(async move {
                let result = client.push(&job).await;
                let _ = tx.send(PushOutcome {
                    success: result.success,
                    http_status: result.http_status,
                    job,
                });
            });
        }
    }

    async fn dispatch(&self, now: u64) {
        let mut started: Vec<(String, String)> = Vec::new();
        {
            let mut state = self.state.lock().await;
            for _ in 0..DISPATCH_BATCH {
                if self.semaphore.available_permits() == 0 {
                    break;
                }
                let Some(job) = state.pick_from_main_queue() else {
                    break;
                };
                if state.is_at_capacity(&job.team_id) {
                    // Overflow: the job leaves the main queue and waits for a
                    // remote push next tick.
                    state.overflow.push(job);
                } else {
                    let active = state.start_job(&job, String::new(), now, false);
                    started.push((job.team_id, active.job_id));
                }
            }
        }

        // Fire-and-forget monitoring entries for everything just started.
        for (team_id, job_id) in started {
            let client = Arc::clone(&self.client);
            self.spawn_bounded(async move {
                let _ = client.push_active(&team_id, &job_id).await;
            });
        }
    }

    async fn run_completions(&self, now: u64) {
        let finished = {
            let mut state = self.state.lock().await;
            let ready = state.completable(now);
            let mut finished = Vec::with_capacity(ready.len());
            for (team_id, active) in ready {
                if let Some(removed) = state.take_completed(&team_id, &active.job_id) {
                    // Ground truth for promoted completions lives here, not in
                    // the client.
                    if removed.promoted {
                        if let Some(oracle) = &self.oracle {
                            oracle.record_complete(&removed.job_id);
                        }
                    }
                    finished.push((team_id, removed));
                }
            }
            finished
        };

        for (team_id, active) in finished {
            let client = Arc::clone(&self.client);
            let state = Arc::clone(&self.state);
            let clock = Arc::clone(&self.clock);
            self.spawn_bounded(process_completion(client, state, clock, team_id, active));
        }
    }

    /// Runs Phase D until every slot is free or a bound trips.
    ///
    /// Returns `(stalled, capped)`.
    async fn drain(&mut self) -> (bool, bool) {
        let drain_start = self.clock.now_ms();
        let hard_cap_ms = 3 * self.config.job_processing_delay_ms + 30_000;
        let mut last_change = drain_start;
        let mut last_progress = drain_start;
        let mut previous_active = usize::MAX;

        info!("load phase complete, draining active jobs");

        loop {
            self.apply_push_outcomes().await;
            let now = self.clock.now_ms();
            self.run_completions(now).await;
            tokio::task::yield_now().await;
            tokio::time::sleep(DRAIN_TICK).await;

            let now = self.clock.now_ms();
            let active = { self.state.lock().await.snapshot().active };
            let in_flight = self.in_flight.load(Ordering::SeqCst);

            if active != previous_active {
                previous_active = active;
                last_change = now;
            }
            if active == 0 && in_flight == 0 {
                info!(
                    drain_ms = now.saturating_sub(drain_start),
                    "drain complete"
                );
                return (false, false);
            }
            if now.saturating_sub(last_change) >= DRAIN_STALL_MS {
                warn!(
                    active,
                    in_flight, "drain stalled: active count unchanged for 10s"
                );
                return (true, false);
            }
            if now.saturating_sub(drain_start) >= hard_cap_ms {
                warn!(
                    active,
                    in_flight, "drain hard cap reached, leaving remaining jobs"
                );
                return (false, true);
            }
            if now.saturating_sub(last_progress) >= DRAIN_PROGRESS_INTERVAL_MS {
                info!(active, in_flight, "draining");
                last_progress = now;
            }
        }
    }

    /// Spawns a task that runs under one semaphore permit and is tracked by
    /// the in-flight counter.
    fn spawn_bounded(&self, task: impl Future<Output = ()> + Send + 'static) {
        let semaphore = Arc::clone(&self.semaphore);
        let waiters = Arc::clone(&self.waiters);
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            waiters.fetch_add(1, Ordering::SeqCst);
            let permit = semaphore.acquire_owned().await;
            waiters.fetch_sub(1, Ordering::SeqCst);
            if permit.is_ok() {
                task.await;
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

/// Completion tail for one finished job: monitoring removal, remote
/// acknowledgement, then the promotion pop.
///
/// The slot was already freed under the lock, so a dispatched job may retake
/// it while this task is in flight. A claim that finds the team full again is
/// released back to the queue; it is never silently dropped.
async fn process_completion(
    client: Arc<dyn QueueService>,
    state: Arc<Mutex<SchedulerState>>,
    clock: Arc<Clock>,
    team_id: String,
    active: ActiveJob,
) {
    let _ = client.remove_active(&team_id, &active.job_id).await;

    if !active.queue_key.is_empty() {
        let result = client.complete(&active.queue_key).await;
        if !result.success {
            debug!(
                job_id = %active.job_id,
                error = result.error.as_deref().unwrap_or(""),
                "remote complete failed"
            );
        }
    }

    let should_pop = { state.lock().await.has_queued(&team_id) };
    if !should_pop {
        return;
    }

    let result = client.pop(&team_id).await;
    let Some(Some(claim)) = result.data else {
        // Failure or empty queue: the accounting is untouched, the next
        // completion tries again.
        return;
    };

    let promoted = MainQueueJob {
        job_id: claim.job.id.clone(),
        team_id: team_id.clone(),
        priority: claim.job.priority,
        created_at: claim.job.created_at,
        crawl_id: claim.job.crawl_id.clone(),
    };

    let started = {
        let mut state = state.lock().await;
        if state.is_at_capacity(&team_id) {
            false
        } else {
            state.record_pop_success(&team_id);
            state.start_job(&promoted, claim.queue_key.clone(), clock.now_ms(), true);
            true
        }
    };

    if started {
        let _ = client.push_active(&team_id, &promoted.job_id).await;
    } else {
        let _ = client.release(&promoted.job_id).await;
    }
}
