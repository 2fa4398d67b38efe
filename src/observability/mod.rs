//! Observability: tracing spans and metrics for port pools.
//!
//! Pools emit structured logs through `tracing` and record metrics through
//! `metrics-rs`. Without an installed recorder or subscriber both are no-ops.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `portpool_buffers_acquired` | Counter | Buffers handed out to consumers |
//! | `portpool_releases_to_port` | Counter | Buffers handed back to the component |
//! | `portpool_release_failures` | Counter | Releases the component rejected |
//! | `portpool_exhausted_searches` | Counter | Acquisitions that found no buffer |
//! | `portpool_buffers_idle` | Gauge | Idle buffers after the last pool operation |
//!
//! Lifecycle operations (`configure`, `start`, `stop`) run inside a
//! `port_pool` span carrying the pool name and port direction.

mod metrics;
mod tracing_support;

pub use metrics::{
    PoolMetrics, init_metrics, record_exhausted_search, record_release_failure,
};
pub use tracing_support::span_pool;
