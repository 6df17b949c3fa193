//! In-process queue service used by the end-to-end scenarios.
//!
//! Implements the same REST surface as the production service with per-team
//! priority queues, claim tracking, active-entry tracking, and deterministic
//! push fault injection (fail `k` of every `m` push requests with HTTP 500).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

/// One queued job inside the fake service.
#[derive(Debug, Clone)]
struct QueueEntry {
    id: String,
    priority: u32,
    created_at: i64,
    crawl_id: Option<String>,
    /// Insertion sequence for FIFO tie-breaks on equal priority.
    seq: u64,
}

/// A claimed job awaiting completion or release.
#[derive(Debug, Clone)]
struct ClaimedEntry {
    team_id: String,
    entry: QueueEntry,
}

/// Shared state behind the fake service's routes.
pub struct ServiceState {
    queues: Mutex<HashMap<String, Vec<QueueEntry>>>,
    claimed: Mutex<HashMap<String, ClaimedEntry>>,
    active: Mutex<HashMap<String, HashSet<String>>>,
    push_counter: AtomicU64,
    seq_counter: AtomicU64,
    key_counter: AtomicU64,
    /// Fail `0` of every `1` pushes when `None`; otherwise `(k, m)` fails
    /// requests whose counter satisfies `counter % m < k`.
    fail_pushes: Option<(u64, u64)>,
}

impl ServiceState {
    fn new(fail_pushes: Option<(u64, u64)>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            claimed: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            push_counter: AtomicU64::new(0),
            seq_counter: AtomicU64::new(0),
            key_counter: AtomicU64::new(0),
            fail_pushes,
        }
    }

    /// Jobs currently queued for a team.
    pub fn queue_len(&self, team_id: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(team_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Jobs queued across all teams.
    pub fn total_queued(&self) -> usize {
        self.queues.lock().unwrap().values().map(Vec::len).sum()
    }

    /// Claims handed out and never completed or released.
    pub fn outstanding_claims(&self) -> usize {
        self.claimed.lock().unwrap().len()
    }

    /// Active-tracking entries for a team.
    pub fn active_len(&self, team_id: &str) -> usize {
        self.active
            .lock()
            .unwrap()
            .get(team_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Push requests seen, including injected failures.
    pub fn push_attempts(&self) -> u64 {
        self.push_counter.load(Ordering::SeqCst)
    }
}

/// Handle to a running fake service.
pub struct FakeQueueService {
    pub state: Arc<ServiceState>,
    pub base_url: String,
}

/// Starts the fake service on an ephemeral port.
pub async fn spawn(fail_pushes: Option<(u64, u64)>) -> FakeQueueService {
    let state = Arc::new(ServiceState::new(fail_pushes));
    let app = Router::new()
        .route("/queue/push", post(push))
        .route("/queue/pop/:team_id", post(pop))
        .route("/queue/complete", post(complete))
        .route("/queue/release", post(release))
        .route("/active/push", post(active_push))
        .route("/active/remove", delete(active_remove))
        .route("/active/count/:team_id", get(active_count))
        .route("/active/jobs/:team_id", get(active_jobs))
        .route("/queue/count/team/:team_id", get(team_queue_count))
        .route("/health", get(health))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake service");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake service");
    });

    FakeQueueService {
        state,
        base_url: format!("http://{}", addr),
    }
}

#[derive(Deserialize)]
struct PushBody {
    #[serde(rename = "teamId")]
    team_id: String,
    job: PushJob,
    #[serde(rename = "crawlId")]
    crawl_id: Option<String>,
}

#[derive(Deserialize)]
struct PushJob {
    id: String,
    priority: u32,
}

async fn push(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<PushBody>,
) -> impl IntoResponse {
    let attempt = state.push_counter.fetch_add(1, Ordering::SeqCst);
    if let Some((fail, per)) = state.fail_pushes {
        if attempt % per < fail {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "injected failure"})),
            );
        }
    }

    let entry = QueueEntry {
        id: body.job.id,
        priority: body.job.priority,
        created_at: chrono::Utc::now().timestamp_millis(),
        crawl_id: body.crawl_id,
        seq: state.seq_counter.fetch_add(1, Ordering::SeqCst),
    };
    state
        .queues
        .lock()
        .unwrap()
        .entry(body.team_id)
        .or_default()
        .push(entry);
    (StatusCode::OK, Json(json!({"success": true})))
}

async fn pop(
    State(state): State<Arc<ServiceState>>,
    Path(team_id): Path<String>,
    Json(_body): Json<Value>,
) -> Json<Value> {
    let mut queues = state.queues.lock().unwrap();
    let Some(queue) = queues.get_mut(&team_id) else {
        return Json(Value::Null);
    };
    if queue.is_empty() {
        return Json(Value::Null);
    }

    // Lowest priority value wins; earliest insertion breaks ties.
    let mut best = 0;
    for (index, entry) in queue.iter().enumerate().skip(1) {
        let current = &queue[best];
        if (entry.priority, entry.seq) < (current.priority, current.seq) {
            best = index;
        }
    }
    let entry = queue.remove(best);
    drop(queues);

    let queue_key = format!("qk-{}", state.key_counter.fetch_add(1, Ordering::SeqCst));
    let response = json!({
        "job": {
            "id": entry.id,
            "priority": entry.priority,
            "created_at": entry.created_at,
            "crawl_id": entry.crawl_id,
        },
        "queueKey": queue_key,
    });
    state
        .claimed
        .lock()
        .unwrap()
        .insert(queue_key, ClaimedEntry { team_id, entry });
    Json(response)
}

#[derive(Deserialize)]
struct CompleteBody {
    #[serde(rename = "queueKey")]
    queue_key: String,
}

async fn complete(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<CompleteBody>,
) -> Json<Value> {
    let removed = state
        .claimed
        .lock()
        .unwrap()
        .remove(&body.queue_key)
        .is_some();
    Json(json!({"success": removed}))
}

#[derive(Deserialize)]
struct ReleaseBody {
    #[serde(rename = "jobId")]
    job_id: String,
}

async fn release(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<ReleaseBody>,
) -> StatusCode {
    let mut claimed = state.claimed.lock().unwrap();
    let key = claimed
        .iter()
        .find(|(_, claim)| claim.entry.id == body.job_id)
        .map(|(key, _)| key.clone());
    if let Some(key) = key {
        let claim = claimed.remove(&key).expect("key was present");
        state
            .queues
            .lock()
            .unwrap()
            .entry(claim.team_id)
            .or_default()
            .push(claim.entry);
    }
    StatusCode::OK
}

#[derive(Deserialize)]
struct ActiveBody {
    #[serde(rename = "teamId")]
    team_id: String,
    #[serde(rename = "jobId")]
    job_id: String,
}

async fn active_push(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<ActiveBody>,
) -> StatusCode {
    state
        .active
        .lock()
        .unwrap()
        .entry(body.team_id)
        .or_default()
        .insert(body.job_id);
    StatusCode::OK
}

async fn active_remove(
    State(state): State<Arc<ServiceState>>,
    Json(body): Json<ActiveBody>,
) -> StatusCode {
    if let Some(entries) = state.active.lock().unwrap().get_mut(&body.team_id) {
        entries.remove(&body.job_id);
    }
    StatusCode::OK
}

async fn active_count(
    State(state): State<Arc<ServiceState>>,
    Path(team_id): Path<String>,
) -> Json<Value> {
    Json(json!({"count": state.active_len(&team_id)}))
}

async fn active_jobs(
    State(state): State<Arc<ServiceState>>,
    Path(team_id): Path<String>,
) -> Json<Vec<String>> {
    let jobs = state
        .active
        .lock()
        .unwrap()
        .get(&team_id)
        .map(|entries| entries.iter().cloned().collect())
        .unwrap_or_default();
    Json(jobs)
}

async fn team_queue_count(
    State(state): State<Arc<ServiceState>>,
    Path(team_id): Path<String>,
) -> Json<Value> {
    Json(json!({"count": state.queue_len(&team_id)}))
}

async fn health() -> StatusCode {
    StatusCode::OK
}
