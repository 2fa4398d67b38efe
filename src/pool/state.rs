//! Pool and buffer states.

/// Lifecycle phase of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolPhase {
    /// No configuration, no buffers.
    Stopped,
    /// Configuration accepted, no buffers yet.
    Configured,
    /// Buffers built, one per hardware slot.
    Started,
}

/// Who owns a buffer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// In the pool, ready to be acquired (and refilled by the port).
    Idle,
    /// Held by a consumer or producer outside the pool.
    Acquired,
    /// Handed to the hardware, waiting for a completion.
    InFlight,
}

/// Snapshot of pool occupancy and counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers built (equals the slot count while started).
    pub capacity: usize,
    /// Buffers in [`BufferState::Idle`].
    pub idle: usize,
    /// Buffers in [`BufferState::InFlight`].
    pub in_flight: usize,
    /// Buffers in [`BufferState::Acquired`].
    pub acquired: usize,
    /// Successful acquisitions since the pool was created.
    pub acquisitions: u64,
    /// Successful releases to the port.
    pub releases_to_port: u64,
    /// Releases the port rejected.
    pub release_failures: u64,
    /// Acquisitions that found no free buffer.
    pub exhausted_searches: u64,
}

/// Cumulative counters, kept across restarts.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub(crate) acquisitions: u64,
    pub(crate) releases_to_port: u64,
    pub(crate) release_failures: u64,
    pub(crate) exhausted_searches: u64,
}
