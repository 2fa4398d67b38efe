//! Memory backends and views for port buffers.
//!
//! # Architecture
//!
//! - [`MemorySegment`]: trait for raw memory backends (heap, component
//!   memory, exported DMA-BUF)
//! - [`PortMemory`]: the non-shareable view a pool buffer exposes to
//!   consumers
//! - [`ExportRegistry`]: exports physically addressed planes through a
//!   [`DmaExporter`] and ends the exports at teardown

mod dmabuf;
mod export;
mod heap;
mod region;
mod segment;

pub use dmabuf::DmaBufSegment;
pub use export::{
    DmaExporter, ExportId, ExportRegistry, ExportedDmaBuf, PlaneExport, page_size,
};
pub use heap::HeapSegment;
pub use region::{MemoryKind, PortMemory, alignment_mask};
pub use segment::{MemorySegment, MemoryType};
