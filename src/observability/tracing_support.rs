//! Tracing spans for pool lifecycle operations.

use crate::port::PortDirection;
use tracing::{Level, Span, span};

/// Create a span for lifecycle operations of a pool.
///
/// # Example
///
/// ```rust
/// use portpool::observability::span_pool;
/// use portpool::port::PortDirection;
///
/// let span = span_pool("h264dec-out", PortDirection::Output);
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_pool(name: &str, direction: PortDirection) -> Span {
    span!(
        Level::DEBUG,
        "port_pool",
        name = %name,
        direction = ?direction
    )
}
