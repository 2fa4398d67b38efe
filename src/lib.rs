//! # portpool
//!
//! Buffer pool for the fixed buffer array of a hardware media codec port.
//!
//! A codec component (decoder or encoder) works on a fixed set of buffers
//! registered with each port ahead of time. `portpool` presents those same
//! buffers to a streaming pipeline as owned [`PortBuffer`]s, tracks who owns
//! each one (the pool, a consumer, or the hardware), and exposes their memory
//! without copies: as a direct view over the slot, as memory lent by another
//! pool, or as page-aligned DMA-BUF descriptors, one per video plane.
//!
//! ## Features
//!
//! - **One buffer per slot**: the slot to buffer mapping is fixed for the
//!   life of a run
//! - **Single owner**: memory views cannot be cloned; dropping a buffer
//!   returns it to the pool, and from there to the component
//! - **DMA-BUF export**: physically addressed planes exported at page
//!   granularity, exports ended at teardown
//! - **Bounded search**: encoder input acquisition fails fast instead of
//!   blocking
//!
//! ## Quick Start
//!
//! ```rust
//! use portpool::prelude::*;
//! use portpool::format::{PixelFormat, VideoInfo};
//! use portpool::port::{PortDefinition, PortDirection};
//! use portpool::testing::MockPort;
//! use std::sync::Arc;
//!
//! let port = Arc::new(MockPort::new(PortDefinition::raw_video(PortDirection::Input, 3, 640, 480)));
//! let pool = PortBufferPool::new("h264enc-in", PortRole::Encoder { no_copy: true }, port);
//!
//! pool.configure(PoolConfig::new(PoolCaps::RawVideo(VideoInfo::new(PixelFormat::I420, 640, 480))))?;
//! pool.start()?;
//!
//! let mut frame = pool.acquire()?;
//! if let Some(bytes) = frame.memory_mut(0).and_then(|m| m.as_mut_slice()) {
//!     bytes[0] = 16;
//! }
//! pool.release(frame);
//! # Ok::<(), portpool::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod error;
pub mod format;
pub mod memory;
pub mod metadata;
pub mod observability;
pub mod pool;
pub mod port;
pub mod testing;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::{ExternalBuffer, ExternalPool, PortBuffer};
    pub use crate::error::{Error, Result};
    pub use crate::format::PoolCaps;
    pub use crate::memory::{DmaExporter, MemoryKind, PortMemory};
    pub use crate::pool::{BufferState, PoolConfig, PoolOption, PortBufferPool};
    pub use crate::port::{CodecPort, HardwareBufferSlot, PortRole};
}

pub use buffer::PortBuffer;
pub use error::{Error, Result};
pub use pool::PortBufferPool;
