//! Ring-buffer metrics recorder with on-demand percentile computation.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

use crate::clock::Clock;

/// Maximum number of characters of a response body kept in a record.
const MAX_RESPONSE_BODY_LEN: usize = 256;

/// Remote operations that are metered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Push,
    Pop,
    Complete,
    Release,
    ActivePush,
    ActiveRemove,
    ActiveCount,
    TeamQueueCount,
}

impl Operation {
    /// All metered operations, in reporting order.
    pub const ALL: [Operation; 8] = [
        Operation::Push,
        Operation::Pop,
        Operation::Complete,
        Operation::Release,
        Operation::ActivePush,
        Operation::ActiveRemove,
        Operation::ActiveCount,
        Operation::TeamQueueCount,
    ];

    /// Short name used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Push => "push",
            Operation::Pop => "pop",
            Operation::Complete => "complete",
            Operation::Release => "release",
            Operation::ActivePush => "active_push",
            Operation::ActiveRemove => "active_remove",
            Operation::ActiveCount => "active_count",
            Operation::TeamQueueCount => "team_queue_count",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metered remote call.
#[derive(Debug, Clone)]
pub struct MetricsRecord {
    /// Which operation this record belongs to.
    pub operation: Operation,
    /// Observed latency in milliseconds (monotonic clock).
    pub latency_ms: u64,
    /// Whether the call succeeded (2xx and parsed).
    pub success: bool,
    /// HTTP status, absent on network or parse errors.
    pub http_status: Option<u16>,
    /// Error message for failed calls.
    pub error_message: Option<String>,
    /// Response body text for non-2xx responses, truncated.
    pub response_body: Option<String>,
    /// Wall-clock ms when the record was appended.
    pub recorded_at: i64,
}

/// Latency percentiles over the current sample buffer.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencyStats {
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
}

/// Per-operation aggregate computed on demand.
#[derive(Debug, Clone)]
pub struct OperationSummary {
    pub operation: Operation,
    pub total_requests: usize,
    pub success_count: usize,
    pub success_rate: f64,
    pub latency: LatencyStats,
}

/// Error counts classified by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorBreakdown {
    pub http_4xx: usize,
    pub http_5xx: usize,
    pub network: usize,
    pub timeout: usize,
    pub other: usize,
}

impl ErrorBreakdown {
    /// Total errors across all categories.
    pub fn total(&self) -> usize {
        self.http_4xx + self.http_5xx + self.network + self.timeout + self.other
    }
}

/// Fixed-capacity metrics recorder.
///
/// One ring buffer per operation; appending past capacity drops the oldest
/// record. Safe to share behind an `Arc` between the scheduler and client.
pub struct MetricsRecorder {
    buffer_size: usize,
    rings: Mutex<HashMap<Operation, VecDeque<MetricsRecord>>>,
}

impl MetricsRecorder {
    /// Creates a recorder keeping at most `buffer_size` samples per operation.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            rings: Mutex::new(HashMap::new()),
        }
    }

    /// Appends one record; drops the oldest sample on overflow.
    pub fn record(
        &self,
        operation: Operation,
        latency_ms: u64,
        success: bool,
        http_status: Option<u16>,
        error_message: Option<String>,
        response_body: Option<String>,
    ) {
        let response_body = response_body.map(|body| {
            if body.len() > MAX_RESPONSE_BODY_LEN {
                let mut end = MAX_RESPONSE_BODY_LEN;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body[..end].to_string()
            } else {
                body
            }
        });

        let record = MetricsRecord {
            operation,
            latency_ms,
            success,
            http_status,
            error_message,
            response_body,
            recorded_at: Clock::wall_ms(),
        };

        let mut rings = self.rings.lock().expect("metrics lock poisoned");
        let ring = rings.entry(operation).or_default();
        if ring.len() == self.buffer_size {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    /// Aggregate for one operation over its current buffer.
    pub fn summary(&self, operation: Operation) -> OperationSummary {
        let rings = self.rings.lock().expect("metrics lock poisoned");
        let empty = VecDeque::new();
        let ring = rings.get(&operation).unwrap_or(&empty);

        let total_requests = ring.len();
        let success_count = ring.iter().filter(|r| r.success).count();
        let success_rate = if total_requests == 0 {
            0.0
        } else {
            success_count as f64 / total_requests as f64
        };

        let mut latencies: Vec<u64> = ring.iter().map(|r| r.latency_ms).collect();
        latencies.sort_unstable();

        OperationSummary {
            operation,
            total_requests,
            success_count,
            success_rate,
            latency: percentiles(&latencies),
        }
    }

    /// Aggregates for every operation, in reporting order.
    pub fn summaries(&self) -> Vec<OperationSummary> {
        Operation::ALL.iter().map(|op| self.summary(*op)).collect()
    }

    /// Total failed records currently buffered, across operations.
    pub fn total_errors(&self) -> usize {
        let rings = self.rings.lock().expect("metrics lock poisoned");
        rings
            .values()
            .flat_map(|ring| ring.iter())
            .filter(|r| !r.success)
            .count()
    }

    /// Failed records classified by cause.
    pub fn error_breakdown(&self) -> ErrorBreakdown {
        let rings = self.rings.lock().expect("metrics lock poisoned");
        let mut breakdown = ErrorBreakdown::default();
        for record in rings.values().flat_map(|ring| ring.iter()) {
            if record.success {
                continue;
            }
            match classify(record) {
                ErrorClass::Http4xx => breakdown.http_4xx += 1,
                ErrorClass::Http5xx => breakdown.http_5xx += 1,
                ErrorClass::Network => breakdown.network += 1,
                ErrorClass::Timeout => breakdown.timeout += 1,
                ErrorClass::Other => breakdown.other += 1,
            }
        }
        breakdown
    }

    /// The `n` most recent failed records, newest first.
    pub fn recent_errors(&self, n: usize) -> Vec<MetricsRecord> {
        let rings = self.rings.lock().expect("metrics lock poisoned");
        let mut errors: Vec<MetricsRecord> = rings
            .values()
            .flat_map(|ring| ring.iter())
            .filter(|r| !r.success)
            .cloned()
            .collect();
        errors.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        errors.truncate(n);
        errors
    }
}

enum ErrorClass {
    Http4xx,
    Http5xx,
    Network,
    Timeout,
    Other,
}

fn classify(record: &MetricsRecord) -> ErrorClass {
    match record.http_status {
        Some(status) if (400..500).contains(&status) => ErrorClass::Http4xx,
        Some(status) if status >= 500 => ErrorClass::Http5xx,
        Some(_) => ErrorClass::Other,
        None => {
            let message = record.error_message.as_deref().unwrap_or("").to_lowercase();
            if message.contains("timeout") || message.contains("timed out") {
                ErrorClass::Timeout
            } else if message.contains("decod") || message.contains("parse") {
                ErrorClass::Other
            } else {
                ErrorClass::Network
            }
        }
    }
}

/// Nearest-rank percentiles over a sorted sample slice.
fn percentiles(sorted: &[u64]) -> LatencyStats {
    if sorted.is_empty() {
        return LatencyStats::default();
    }
    let pick = |p: f64| -> u64 {
        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    };
    LatencyStats {
        p50: pick(50.0),
        p90: pick(90.0),
        p95: pick(95.0),
        p99: pick(99.0),
        max: sorted[sorted.len() - 1],
    }
}
