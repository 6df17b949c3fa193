//! Progress and final-report logging.
//!
//! The heavy terminal reporter lives outside this crate; these hooks print
//! the live 5-second progress line and the end-of-run summary through
//! `tracing` so any subscriber layout works.

use tracing::{info, warn};

use crate::metrics::MetricsRecorder;
use crate::oracle::VerificationReport;
use crate::scheduler::SchedulerSnapshot;

/// Number of recent error records included in the final summary.
const RECENT_ERRORS_SHOWN: usize = 10;

/// Live progress line, printed every report interval during the load phase.
pub fn log_progress(elapsed_ms: u64, snapshot: &SchedulerSnapshot, metrics: &MetricsRecorder) {
    info!(
        elapsed_secs = elapsed_ms / 1000,
        generated = snapshot.generated,
        completed = snapshot.completed,
        active = snapshot.active,
        queued_remote = snapshot.queued,
        main_queue = snapshot.main_queue_len,
        overflow = snapshot.overflow_len,
        errors = metrics.total_errors(),
        "progress"
    );
}

/// End-of-run summary: per-operation counts and latencies, the error
/// breakdown, recent error details, and the oracle verdict.
pub fn log_final(
    snapshot: &SchedulerSnapshot,
    metrics: &MetricsRecorder,
    verification: Option<&VerificationReport>,
) {
    info!(
        generated = snapshot.generated,
        completed = snapshot.completed,
        active = snapshot.active,
        queued_remote = snapshot.queued,
        main_queue = snapshot.main_queue_len,
        overflow = snapshot.overflow_len,
        "run summary"
    );

    for summary in metrics.summaries() {
        if summary.total_requests == 0 {
            continue;
        }
        info!(
            operation = %summary.operation,
            requests = summary.total_requests,
            success_rate = format!("{:.1}%", summary.success_rate * 100.0),
            p50_ms = summary.latency.p50,
            p90_ms = summary.latency.p90,
            p95_ms = summary.latency.p95,
            p99_ms = summary.latency.p99,
            max_ms = summary.latency.max,
            "operation latencies"
        );
    }

    let breakdown = metrics.error_breakdown();
    if breakdown.total() > 0 {
        warn!(
            http_4xx = breakdown.http_4xx,
            http_5xx = breakdown.http_5xx,
            network = breakdown.network,
            timeout = breakdown.timeout,
            other = breakdown.other,
            "error breakdown"
        );
        for record in metrics.recent_errors(RECENT_ERRORS_SHOWN) {
            warn!(
                operation = %record.operation,
                status = record.http_status,
                error = record.error_message.as_deref().unwrap_or(""),
                body = record.response_body.as_deref().unwrap_or(""),
                "recent error"
            );
        }
    }

    if let Some(report) = verification {
        if report.is_clean() {
            info!(
                pushes_confirmed = report.pushes_confirmed,
                claims = report.claims,
                completions = report.completions,
                never_claimed = report.confirmed_never_claimed.len(),
                inversion_warnings = report.warnings.len(),
                "oracle verification passed"
            );
        } else {
            warn!(
                violations = report.violations.len(),
                "oracle verification FAILED"
            );
            for violation in &report.violations {
                warn!(
                    kind = %violation.kind,
                    job_id = %violation.job_id,
                    detail = %violation.detail,
                    "oracle violation"
                );
            }
        }
    }
}
