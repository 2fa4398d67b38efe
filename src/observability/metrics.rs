//! Pool metrics using metrics-rs.

use metrics::{Counter, Gauge, Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const BUFFERS_ACQUIRED: &str = "portpool_buffers_acquired";
const RELEASES_TO_PORT: &str = "portpool_releases_to_port";
const RELEASE_FAILURES: &str = "portpool_release_failures";
const EXHAUSTED_SEARCHES: &str = "portpool_exhausted_searches";
const BUFFERS_IDLE: &str = "portpool_buffers_idle";

/// Describe all pool metrics.
///
/// Safe to call more than once.
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        BUFFERS_ACQUIRED,
        Unit::Count,
        "Buffers handed out to consumers"
    );
    metrics::describe_counter!(
        RELEASES_TO_PORT,
        Unit::Count,
        "Buffers handed back to the component"
    );
    metrics::describe_counter!(
        RELEASE_FAILURES,
        Unit::Count,
        "Releases the component rejected"
    );
    metrics::describe_counter!(
        EXHAUSTED_SEARCHES,
        Unit::Count,
        "Acquisitions that found no free buffer"
    );
    metrics::describe_gauge!(BUFFERS_IDLE, Unit::Count, "Idle buffers in the pool");
}

/// Record a release the component rejected.
#[inline]
pub fn record_release_failure(pool: &str) {
    counter!(RELEASE_FAILURES, "pool" => pool.to_string()).increment(1);
}

/// Record an acquisition that found no free buffer.
#[inline]
pub fn record_exhausted_search(pool: &str) {
    counter!(EXHAUSTED_SEARCHES, "pool" => pool.to_string()).increment(1);
}

/// Metric handles for one pool, labelled with its name.
#[derive(Clone)]
pub struct PoolMetrics {
    acquired: Counter,
    released: Counter,
    idle: Gauge,
}

impl PoolMetrics {
    /// Handles for the pool called `pool`.
    pub fn new(pool: &str) -> Self {
        Self {
            acquired: counter!(BUFFERS_ACQUIRED, "pool" => pool.to_string()),
            released: counter!(RELEASES_TO_PORT, "pool" => pool.to_string()),
            idle: gauge!(BUFFERS_IDLE, "pool" => pool.to_string()),
        }
    }

    /// Record a buffer handed out.
    #[inline]
    pub fn record_acquired(&self) {
        self.acquired.increment(1);
    }

    /// Record a buffer handed back to the component.
    #[inline]
    pub fn record_released_to_port(&self) {
        self.released.increment(1);
    }

    /// Record the number of idle buffers.
    #[inline]
    pub fn record_idle(&self, idle: usize) {
        self.idle.set(idle as f64);
    }
}

impl std::fmt::Debug for PoolMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_recording_without_recorder() {
        let metrics = PoolMetrics::new("test");
        metrics.record_acquired();
        metrics.record_released_to_port();
        metrics.record_idle(3);
        record_release_failure("test");
        record_exhausted_search("test");
    }
}
