//! Wire types for the queue-service REST contract.
//!
//! Request bodies use the service's camelCase field names; the claimed-job
//! payload comes back snake_cased. Field renames below pin the exact shapes.

use serde::{Deserialize, Serialize};

/// Tagged outcome of a remote operation.
///
/// Every client call resolves to one of these; the scheduler never sees a
/// thrown error from the request path. `success == false` means the
/// triggering transition simply did not happen and will be retried by the
/// next tick, because its source state is unchanged.
#[derive(Debug, Clone)]
pub struct OpResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    /// HTTP status when a response was received; absent on network, timeout,
    /// and parse errors.
    pub http_status: Option<u16>,
}

impl<T> OpResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            http_status: None,
        }
    }

    pub fn fail(error: impl Into<String>, http_status: Option<u16>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            http_status,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct PushRequest {
    #[serde(rename = "teamId")]
    pub team_id: String,
    pub job: PushJobBody,
    /// Job time-to-live in the remote queue, milliseconds.
    pub timeout: u64,
    #[serde(rename = "crawlId", skip_serializing_if = "Option::is_none")]
    pub crawl_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PushJobBody {
    pub id: String,
    pub data: serde_json::Value,
    pub priority: u32,
    pub listenable: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct PopRequest {
    #[serde(rename = "workerId")]
    pub worker_id: String,
    #[serde(rename = "blockedCrawlIds")]
    pub blocked_crawl_ids: Vec<String>,
}

/// A job handed out by the remote queue, plus the opaque key needed to
/// complete it.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimedJob {
    pub job: ClaimedJobBody,
    #[serde(rename = "queueKey")]
    pub queue_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimedJobBody {
    pub id: String,
    pub priority: u32,
    pub created_at: i64,
    #[serde(default)]
    pub crawl_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CompleteRequest {
    #[serde(rename = "queueKey")]
    pub queue_key: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompleteResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReleaseRequest {
    #[serde(rename = "jobId")]
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ActivePushRequest {
    #[serde(rename = "teamId")]
    pub team_id: String,
    #[serde(rename = "jobId")]
    pub job_id: String,
    /// Active-entry time-to-live, milliseconds.
    pub timeout: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ActiveRemoveRequest {
    #[serde(rename = "teamId")]
    pub team_id: String,
    #[serde(rename = "jobId")]
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CountResponse {
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_request_wire_shape() {
        let request = PushRequest {
            team_id: "team-1".to_string(),
            job: PushJobBody {
                id: "job-1".to_string(),
                data: serde_json::json!({"url": "https://example.com"}),
                priority: 10,
                listenable: false,
            },
            timeout: 60_000,
            crawl_id: None,
        };
        let value = serde_json::to_value(&request).expect("serializes");
        assert_eq!(value["teamId"], "team-1");
        assert_eq!(value["job"]["priority"], 10);
        // Absent crawl id must be omitted, not null.
        assert!(value.get("crawlId").is_none());
    }

    #[test]
    fn test_claimed_job_parses_null_and_payload() {
        let none: Option<ClaimedJob> = serde_json::from_str("null").expect("null parses");
        assert!(none.is_none());

        let payload = r#"{
            "job": {"id": "j1", "priority": 5, "created_at": 1700000000000, "crawl_id": "c1"},
            "queueKey": "qk-9"
        }"#;
        let claim: Option<ClaimedJob> = serde_json::from_str(payload).expect("claim parses");
        let claim = claim.expect("is some");
        assert_eq!(claim.job.id, "j1");
        assert_eq!(claim.job.priority, 5);
        assert_eq!(claim.job.crawl_id.as_deref(), Some("c1"));
        assert_eq!(claim.queue_key, "qk-9");
    }

    #[test]
    fn test_claimed_job_without_crawl_id() {
        let payload = r#"{
            "job": {"id": "j1", "priority": 5, "created_at": 0},
            "queueKey": "qk"
        }"#;
        let claim: ClaimedJob = serde_json::from_str(payload).expect("parses");
        assert!(claim.job.crawl_id.is_none());
    }

    #[test]
    fn test_op_result_helpers() {
        let ok: OpResult<u32> = OpResult::ok(7);
        assert!(ok.success);
        assert_eq!(ok.data, Some(7));
        assert!(ok.error.is_none());

        let failed: OpResult<u32> = OpResult::fail("boom", Some(500));
        assert!(!failed.success);
        assert!(failed.data.is_none());
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.http_status, Some(500));
    }
}
