//! Monotonic and wall-clock time sources.
//!
//! Scheduling decisions (generation intervals, processing delays, drain caps)
//! use a monotonic clock anchored at process start. Wall-clock timestamps are
//! only used inside data payloads sent to the queue service.

use std::time::Instant;

use chrono::Utc;

/// Monotonic millisecond clock anchored at construction time.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Creates a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the clock was created. Never goes backwards.
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Current wall-clock time as Unix milliseconds.
    ///
    /// Payload-layer only; never used for scheduling decisions.
    pub fn wall_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
