//! Error types for the port buffer pool.

use thiserror::Error;

/// Result type alias using the pool's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pool operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The pool could not be configured or started.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A buffer operation on a running pool failed.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Memory allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),
}

/// Errors reported synchronously by `configure` and `start`.
///
/// These never affect buffers already handed out; the pool stays in the
/// phase it was in before the failing call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No caps were supplied in the configuration.
    #[error("no caps in config")]
    MissingCaps,

    /// The caps do not describe data the bound port can carry.
    #[error("caps {caps} are incompatible with a {domain} port")]
    IncompatibleCaps {
        /// Description of the rejected caps.
        caps: String,
        /// Domain of the bound port.
        domain: String,
    },

    /// The pixel format has no known plane layout.
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(String),

    /// The requested buffer count differs from the port's slot count.
    #[error("pool must hold exactly {slots} buffers, config asked for {requested}")]
    BufferCountMismatch {
        /// Number of hardware slots on the port.
        slots: usize,
        /// Number of buffers the config requested.
        requested: usize,
    },

    /// Borrowed buffers must cover every hardware slot.
    #[error("{provided} borrowed buffers supplied for {slots} slots")]
    BorrowedCountMismatch {
        /// Number of hardware slots on the port.
        slots: usize,
        /// Number of borrowed buffers supplied.
        provided: usize,
    },

    /// The configuration is locked while the pool is started.
    #[error("pool is started, configuration is locked")]
    Locked,

    /// The pool has no configuration to start with.
    #[error("pool is not configured")]
    NotConfigured,

    /// The pool is not attached to a port, or the port is gone.
    #[error("pool is not bound to a live port")]
    Unbound,
}

/// Errors from buffer allocation, acquisition and release.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool is not started.
    #[error("pool is not started")]
    NotStarted,

    /// `allocate_next` was called outside of an allocation phase.
    #[error("buffer allocation requested while the pool is not allocating")]
    NotAllocating,

    /// The pool is already started.
    #[error("pool is already started")]
    AlreadyStarted,

    /// Allocation was finished before every slot had a buffer.
    #[error("allocation finished with {built} of {slots} buffers built")]
    IncompleteAllocation {
        /// Buffers built so far.
        built: usize,
        /// Slots on the port.
        slots: usize,
    },

    /// Every hardware slot already has a buffer.
    #[error("all {0} slots already have a buffer")]
    FullyAllocated(usize),

    /// The port has no slot at the given index.
    #[error("port has no buffer slot {0}")]
    MissingSlot(usize),

    /// No output buffer has been completed by the hardware yet.
    #[error("no current output buffer")]
    NoCurrentBuffer,

    /// The requested buffer is still owned by the hardware.
    #[error("buffer {0} is still in flight")]
    InFlight(usize),

    /// The requested buffer is held by a consumer.
    #[error("buffer {0} is already acquired")]
    AlreadyAcquired(usize),

    /// No buffer was available within the search bound.
    #[error("no buffer available after {probes} probes")]
    Exhausted {
        /// Number of candidates examined before giving up.
        probes: usize,
    },

    /// The borrowed pool ran out of buffers to adopt.
    #[error("no borrowed buffer for slot {0}")]
    MissingBorrowed(usize),

    /// DMA export was requested but no exporter is available.
    #[error("dmabuf mode needs an exporter and a physical address")]
    DmaUnavailable,

    /// Exporting a plane of the buffer failed.
    #[error("dmabuf export failed for slot {slot}: {source}")]
    Export {
        /// Slot whose buffer could not be built.
        slot: usize,
        /// Underlying export failure.
        #[source]
        source: ExportError,
    },
}

/// Errors from exporting physical memory as a shareable descriptor.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The exporter refused the request.
    #[error("export of {len} bytes at physical address {phys_addr:#010x} failed")]
    Refused {
        /// Page-aligned physical address requested.
        phys_addr: u64,
        /// Length requested.
        len: usize,
    },

    /// The exported descriptor could not be mapped.
    #[error("mmap of exported descriptor failed: {0}")]
    Map(#[from] rustix::io::Errno),
}

/// Error code returned by the codec port.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The port is disabled and does not accept buffers.
    #[error("port is disabled (0x80001008)")]
    PortDisabled,

    /// The component is in a state that does not accept buffers.
    #[error("incorrect state operation (0x80001018)")]
    InvalidState,

    /// Any other hardware error code.
    #[error("hardware error (0x{0:08x})")]
    Hardware(u32),
}

impl CodecError {
    /// Numeric error code as reported by the component.
    pub fn code(&self) -> u32 {
        match self {
            CodecError::PortDisabled => 0x8000_1008,
            CodecError::InvalidState => 0x8000_1018,
            CodecError::Hardware(code) => *code,
        }
    }
}
