//! Typed, metered, oracle-observed client for the queue service.
//!
//! Every regular operation is one HTTP call that records exactly one metrics
//! sample. Push and pop additionally notify the correctness oracle at the
//! point where ground truth first becomes known: pushes are recorded before
//! the request and confirmed on 2xx, claims are recorded on every non-null
//! pop result.
//!
//! The flush paths are deliberately unmetered and never touch the oracle;
//! they exist to reset a team between runs, not to measure it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::ClientError;
use crate::ids::RunIds;
use crate::metrics::{MetricsRecorder, Operation};
use crate::oracle::CorrectnessOracle;
use crate::scheduler::job::MainQueueJob;

use super::types::{
    ActivePushRequest, ActiveRemoveRequest, ClaimedJob, CompleteRequest, CompleteResponse,
    CountResponse, OpResult, PopRequest, PushJobBody, PushRequest, ReleaseRequest,
};

/// Per-request timeout for flush pops.
const FLUSH_POP_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request timeout for flush active-entry removals.
const FLUSH_REMOVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive empty pops that end a queue flush.
const FLUSH_EMPTY_STREAK: usize = 3;

/// Configuration for the queue-service client.
#[derive(Debug, Clone)]
pub struct QueueClientConfig {
    /// Base URL of the queue service, without trailing slash.
    pub base_url: String,
    /// Timeout applied to every regular request.
    pub request_timeout: Duration,
    /// Time-to-live stamped into push and active-push bodies, milliseconds.
    pub job_timeout_ms: u64,
    /// Log failed calls as they happen.
    pub verbose: bool,
}

impl QueueClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(30),
            job_timeout_ms: 60_000,
            verbose: false,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_job_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.job_timeout_ms = timeout_ms;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// The operations the scheduler needs from the queue service.
///
/// The HTTP client below is the production implementation; tests may provide
/// in-memory implementations to exercise scheduler logic without a server.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Pushes an overflowed job into the team's remote queue.
    async fn push(&self, job: &MainQueueJob) -> OpResult<()>;
    /// Claims the team's most urgent queued job, if any.
    async fn pop(&self, team_id: &str) -> OpResult<Option<ClaimedJob>>;
    /// Acknowledges a claimed job by its queue key.
    async fn complete(&self, queue_key: &str) -> OpResult<bool>;
    /// Returns a claimed job to the queue.
    async fn release(&self, job_id: &str) -> OpResult<()>;
    /// Registers a started job in the remote active-job tracking.
    async fn push_active(&self, team_id: &str, job_id: &str) -> OpResult<()>;
    /// Removes a finished job from the remote active-job tracking.
    async fn remove_active(&self, team_id: &str, job_id: &str) -> OpResult<()>;
    /// Remote active-entry count for a team. Advisory monitoring only.
    async fn active_count(&self, team_id: &str) -> OpResult<u64>;
    /// Number of jobs a team has in the remote queue.
    async fn team_queue_count(&self, team_id: &str) -> OpResult<u64>;
    /// Service liveness. Unmetered.
    async fn health(&self) -> OpResult<()>;
}

/// HTTP implementation of [`QueueService`].
pub struct QueueServiceClient {
    http: reqwest::Client,
    config: QueueClientConfig,
    metrics: Arc<MetricsRecorder>,
    oracle: Option<Arc<CorrectnessOracle>>,
    worker_id: String,
    flush_worker_id: String,
}

impl QueueServiceClient {
    pub fn new(
        config: QueueClientConfig,
        metrics: Arc<MetricsRecorder>,
        oracle: Option<Arc<CorrectnessOracle>>,
        ids: &RunIds,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::BuildFailed(e.to_string()))?;

        Ok(Self {
            http,
            config,
            metrics,
            oracle,
            worker_id: ids.worker_id(),
            flush_worker_id: ids.flush_worker_id(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn record(
        &self,
        operation: Operation,
        started: Instant,
        success: bool,
        http_status: Option<u16>,
        error_message: Option<String>,
        response_body: Option<String>,
    ) {
        if !success && self.config.verbose {
            warn!(
                operation = %operation,
                status = http_status,
                error = error_message.as_deref().unwrap_or(""),
                "queue service call failed"
            );
        }
        self.metrics.record(
            operation,
            started.elapsed().as_millis() as u64,
            success,
            http_status,
            error_message,
            response_body,
        );
    }

    /// Sends a request where a 2xx status is the entire success contract.
    async fn send_ack(&self, operation: Operation, request: RequestBuilder) -> OpResult<()> {
        let started = Instant::now();
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    self.record(operation, started, true, Some(status.as_u16()), None, None);
                    OpResult::ok(())
                } else {
                    self.http_failure(operation, started, status, response).await
                }
            }
            Err(error) => self.transport_failure(operation, started, error),
        }
    }

    /// Sends a request and parses the 2xx body as JSON.
    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> OpResult<T> {
        let started = Instant::now();
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.json::<T>().await {
                        Ok(data) => {
                            self.record(
                                operation,
                                started,
                                true,
                                Some(status.as_u16()),
                                None,
                                None,
                            );
                            OpResult::ok(data)
                        }
                        Err(error) => {
                            // Parse failures are recorded without a status so
                            // they classify separately from HTTP errors.
                            let message = format!("failed to parse response: {}", error);
                            self.record(
                                operation,
                                started,
                                false,
                                None,
                                Some(message.clone()),
                                None,
                            );
                            OpResult::fail(message, None)
                        }
                    }
                } else {
                    self.http_failure(operation, started, status, response).await
                }
            }
            Err(error) => self.transport_failure(operation, started, error),
        }
    }

    async fn http_failure<T>(
        &self,
        operation: Operation,
        started: Instant,
        status: StatusCode,
        response: reqwest::Response,
    ) -> OpResult<T> {
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}", status.as_u16());
        self.record(
            operation,
            started,
            false,
            Some(status.as_u16()),
            Some(message.clone()),
            Some(body),
        );
        OpResult::fail(message, Some(status.as_u16()))
    }

    fn transport_failure<T>(
        &self,
        operation: Operation,
        started: Instant,
        error: reqwest::Error,
    ) -> OpResult<T> {
        let message = if error.is_timeout() {
            format!("timeout: {}", error)
        } else {
            error.to_string()
        };
        self.record(operation, started, false, None, Some(message.clone()), None);
        OpResult::fail(message, None)
    }

    /// Drains a team's remote queue by popping until three consecutive empty
    /// results. Returns the number of jobs drained.
    ///
    /// Uses a distinct flush worker id, an explicit per-request timeout, and
    /// records no metrics.
    pub async fn flush_team_queue(&self, team_id: &str) -> Result<usize, ClientError> {
        let mut drained = 0usize;
        let mut empty_streak = 0usize;
        let body = PopRequest {
            worker_id: self.flush_worker_id.clone(),
            blocked_crawl_ids: Vec::new(),
        };

        while empty_streak < FLUSH_EMPTY_STREAK {
            let response = self
                .http
                .post(self.url(&format!("/queue/pop/{}", team_id)))
                .timeout(FLUSH_POP_TIMEOUT)
                .json(&body)
                .send()
                .await
                .map_err(|e| ClientError::FlushFailed(e.to_string()))?;

            if !response.status().is_success() {
                return Err(ClientError::FlushFailed(format!(
                    "pop returned HTTP {}",
                    response.status().as_u16()
                )));
            }

            let claim: Option<ClaimedJob> = response
                .json()
                .await
                .map_err(|e| ClientError::FlushFailed(e.to_string()))?;

            match claim {
                Some(_) => {
                    drained += 1;
                    empty_streak = 0;
                }
                None => empty_streak += 1,
            }
        }

        Ok(drained)
    }

    /// Removes every remote active-tracking entry for a team. Returns the
    /// number of entries removed. Unmetered, oracle-free.
    pub async fn flush_active_jobs(&self, team_id: &str) -> Result<usize, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/active/jobs/{}", team_id)))
            .timeout(FLUSH_REMOVE_TIMEOUT)
            .send()
            .await
            .map_err(|e| ClientError::FlushFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::FlushFailed(format!(
                "active listing returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let job_ids: Vec<String> = response
            .json()
            .await
            .map_err(|e| ClientError::FlushFailed(e.to_string()))?;

        let removals = job_ids.iter().map(|job_id| {
            self.http
                .delete(self.url("/active/remove"))
                .timeout(FLUSH_REMOVE_TIMEOUT)
                .json(&ActiveRemoveRequest {
                    team_id: team_id.to_string(),
                    job_id: job_id.clone(),
                })
                .send()
        });

        for result in join_all(removals).await {
            result.map_err(|e| ClientError::FlushFailed(e.to_string()))?;
        }

        Ok(job_ids.len())
    }
}

#[async_trait]
impl QueueService for QueueServiceClient {
    async fn push(&self, job: &MainQueueJob) -> OpResult<()> {
        // Record intent before the request goes out; only a 2xx confirms it.
        if let Some(oracle) = &self.oracle {
            oracle.record_push(
                &job.job_id,
                &job.team_id,
                job.priority,
                job.crawl_id.as_deref(),
            );
        }

        let body = PushRequest {
            team_id: job.team_id.clone(),
            job: PushJobBody {
                id: job.job_id.clone(),
                data: serde_json::json!({
                    "jobId": job.job_id,
                    "teamId": job.team_id,
                    "synthetic": true,
                }),
                priority: job.priority,
                listenable: false,
            },
            timeout: self.config.job_timeout_ms,
            crawl_id: job.crawl_id.clone(),
        };

        let result = self
            .send_ack(
                Operation::Push,
                self.http.post(self.url("/queue/push")).json(&body),
            )
            .await;

        if result.success {
            if let Some(oracle) = &self.oracle {
                oracle.confirm_push(&job.job_id);
            }
        }
        result
    }

    async fn pop(&self, team_id: &str) -> OpResult<Option<ClaimedJob>> {
        let body = PopRequest {
            worker_id: self.worker_id.clone(),
            blocked_crawl_ids: Vec::new(),
        };
        let result = self
            .send_json::<Option<ClaimedJob>>(
                Operation::Pop,
                self.http
                    .post(self.url(&format!("/queue/pop/{}", team_id)))
                    .json(&body),
            )
            .await;

        if let Some(Some(claim)) = &result.data {
            if let Some(oracle) = &self.oracle {
                oracle.record_claim(&claim.job.id, team_id, claim.job.priority);
            }
        }
        result
    }

    async fn complete(&self, queue_key: &str) -> OpResult<bool> {
        let body = CompleteRequest {
            queue_key: queue_key.to_string(),
        };
        let result = self
            .send_json::<CompleteResponse>(
                Operation::Complete,
                self.http.post(self.url("/queue/complete")).json(&body),
            )
            .await;
        OpResult {
            success: result.success,
            data: result.data.map(|r| r.success),
            error: result.error,
            http_status: result.http_status,
        }
    }

    async fn release(&self, job_id: &str) -> OpResult<()> {
        let body = ReleaseRequest {
            job_id: job_id.to_string(),
        };
        let result = self
            .send_ack(
                Operation::Release,
                self.http.post(self.url("/queue/release")).json(&body),
            )
            .await;

        // The job is claimable again once the service accepted the release.
        if result.success {
            if let Some(oracle) = &self.oracle {
                oracle.record_release(job_id);
            }
        }
        result
    }

    async fn push_active(&self, team_id: &str, job_id: &str) -> OpResult<()> {
        let body = ActivePushRequest {
            team_id: team_id.to_string(),
            job_id: job_id.to_string(),
            timeout: self.config.job_timeout_ms,
        };
        self.send_ack(
            Operation::ActivePush,
            self.http.post(self.url("/active/push")).json(&body),
        )
        .await
    }

    async fn remove_active(&self, team_id: &str, job_id: &str) -> OpResult<()> {
        let body = ActiveRemoveRequest {
            team_id: team_id.to_string(),
            job_id: job_id.to_string(),
        };
        self.send_ack(
            Operation::ActiveRemove,
            self.http.delete(self.url("/active/remove")).json(&body),
        )
        .await
    }

    async fn active_count(&self, team_id: &str) -> OpResult<u64> {
        let result = self
            .send_json::<CountResponse>(
                Operation::ActiveCount,
                self.http
                    .get(self.url(&format!("/active/count/{}", team_id))),
            )
            .await;
        OpResult {
            success: result.success,
            data: result.data.map(|r| r.count),
            error: result.error,
            http_status: result.http_status,
        }
    }

    async fn team_queue_count(&self, team_id: &str) -> OpResult<u64> {
        let result = self
            .send_json::<CountResponse>(
                Operation::TeamQueueCount,
                self.http
                    .get(self.url(&format!("/queue/count/team/{}", team_id))),
            )
            .await;
        OpResult {
            success: result.success,
            data: result.data.map(|r| r.count),
            error: result.error,
            http_status: result.http_status,
        }
    }

    async fn health(&self) -> OpResult<()> {
        match self.http.get(self.url("/health")).send().await {
            Ok(response) if response.status().is_success() => OpResult::ok(()),
            Ok(response) => OpResult::fail(
                format!("HTTP {}", response.status().as_u16()),
                Some(response.status().as_u16()),
            ),
            Err(error) => OpResult::fail(error.to_string(), None),
        }
    }
}
