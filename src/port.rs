//! The codec port boundary.
//!
//! A codec component registers a fixed array of buffers with each of its
//! ports before any data flows. The pool never owns those buffers: it only
//! refers to them through [`HardwareBufferSlot`] and hands them back through
//! [`CodecPort::release_to_port`].

use crate::error::CodecError;
use crate::memory::MemorySegment;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Direction of data through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// Data flows into the component (bitstream for a decoder, frames for an encoder).
    Input,
    /// Data flows out of the component.
    Output,
}

/// Kind of data a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDomain {
    /// Video. `compressed` is false for raw frames.
    Video {
        /// Whether the port carries a compressed bitstream.
        compressed: bool,
    },
    /// Audio samples or bitstream.
    Audio,
    /// Still images.
    Image,
    /// Anything else.
    Other,
}

impl PortDomain {
    /// True for a port carrying uncompressed video frames.
    pub fn is_raw_video(&self) -> bool {
        matches!(self, PortDomain::Video { compressed: false })
    }
}

impl std::fmt::Display for PortDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDomain::Video { compressed: false } => write!(f, "raw video"),
            PortDomain::Video { compressed: true } => write!(f, "compressed video"),
            PortDomain::Audio => write!(f, "audio"),
            PortDomain::Image => write!(f, "image"),
            PortDomain::Other => write!(f, "other"),
        }
    }
}

/// What the element owning the port does with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    /// Video decoder.
    Decoder {
        /// Export decoded frames as DMA-BUF when the component reports
        /// physical addresses.
        use_dmabuf: bool,
    },
    /// Video encoder.
    Encoder {
        /// Upstream writes frames straight into the port buffers.
        no_copy: bool,
    },
    /// Any other component.
    Generic,
}

/// Static description of a port, fixed while the pool is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDefinition {
    /// Input or output.
    pub direction: PortDirection,
    /// Kind of data.
    pub domain: PortDomain,
    /// Number of buffers registered with the port.
    pub buffer_count: usize,
    /// Required buffer alignment in bytes, as reported by the component.
    pub alignment: u32,
    /// Row stride of the first plane in bytes (video ports).
    pub stride: u32,
    /// Number of rows of the first plane (video ports).
    pub slice_height: u32,
}

impl PortDefinition {
    /// A raw video port with the given geometry.
    pub fn raw_video(direction: PortDirection, buffer_count: usize, stride: u32, slice_height: u32) -> Self {
        Self {
            direction,
            domain: PortDomain::Video { compressed: false },
            buffer_count,
            alignment: 0,
            stride,
            slice_height,
        }
    }

    /// Set the alignment requirement.
    pub fn with_alignment(mut self, alignment: u32) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the domain.
    pub fn with_domain(mut self, domain: PortDomain) -> Self {
        self.domain = domain;
        self
    }
}

/// One buffer of a port's fixed buffer array.
///
/// The component owns the memory; the pool and the port share the slot
/// through an `Arc`. The fill state and the in-flight flag are written by
/// the port side and read by the pool.
pub struct HardwareBufferSlot {
    index: usize,
    memory: Arc<dyn MemorySegment>,
    filled_len: AtomicUsize,
    offset: AtomicUsize,
    in_flight: AtomicBool,
    physical_address: Option<u64>,
}

impl HardwareBufferSlot {
    /// Create slot `index` over the component's memory.
    pub fn new(index: usize, memory: Arc<dyn MemorySegment>) -> Self {
        Self {
            index,
            memory,
            filled_len: AtomicUsize::new(0),
            offset: AtomicUsize::new(0),
            in_flight: AtomicBool::new(false),
            physical_address: None,
        }
    }

    /// Record the physical address of the first plane of the decode result.
    pub fn with_physical_address(mut self, address: u64) -> Self {
        self.physical_address = Some(address);
        self
    }

    /// Position of this slot in the port's buffer array.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The component's memory for this slot.
    #[inline]
    pub fn memory(&self) -> &Arc<dyn MemorySegment> {
        &self.memory
    }

    /// Allocated size of the slot in bytes.
    #[inline]
    pub fn alloc_len(&self) -> usize {
        self.memory.len()
    }

    /// Bytes written by the last fill.
    #[inline]
    pub fn filled_len(&self) -> usize {
        self.filled_len.load(Ordering::Acquire)
    }

    /// Offset of the first valid byte of the last fill.
    #[inline]
    pub fn start_offset(&self) -> usize {
        self.offset.load(Ordering::Acquire)
    }

    /// Record the result of a fill. Port side.
    ///
    /// # Panics
    ///
    /// Panics if the filled range exceeds the slot.
    pub fn set_filled(&self, offset: usize, len: usize) {
        assert!(
            offset + len <= self.alloc_len(),
            "filled range exceeds slot size"
        );
        self.offset.store(offset, Ordering::Release);
        self.filled_len.store(len, Ordering::Release);
    }

    /// True while the slot is handed to the component for fill/empty.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Mark the slot as handed to (or returned from) the component. Port side.
    #[inline]
    pub fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::Release);
    }

    /// Physical address of the decode result, if the component reports one.
    #[inline]
    pub fn physical_address(&self) -> Option<u64> {
        self.physical_address
    }
}

impl std::fmt::Debug for HardwareBufferSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareBufferSlot")
            .field("index", &self.index)
            .field("alloc_len", &self.alloc_len())
            .field("filled_len", &self.filled_len())
            .field("offset", &self.start_offset())
            .field("in_flight", &self.is_in_flight())
            .field("physical_address", &self.physical_address)
            .finish()
    }
}

/// A codec port as seen by the pool.
///
/// Completions (fill done, empty done) arrive asynchronously from the
/// component; implementations must not call back into the pool from inside
/// [`release_to_port`](CodecPort::release_to_port).
pub trait CodecPort: Send + Sync {
    /// Current port definition.
    fn definition(&self) -> PortDefinition;

    /// Slot `index` of the buffer array.
    fn slot(&self, index: usize) -> Option<Arc<HardwareBufferSlot>>;

    /// Hand a slot back to the component to be filled again.
    ///
    /// On success the slot is in flight until the component completes it.
    fn release_to_port(&self, slot: &HardwareBufferSlot) -> Result<(), CodecError>;

    /// Whether the component behind the port still exists.
    fn is_live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapSegment;

    #[test]
    fn test_slot_fill_state() {
        let slot = HardwareBufferSlot::new(3, Arc::new(HeapSegment::new(4096).unwrap()));
        assert_eq!(slot.index(), 3);
        assert_eq!(slot.alloc_len(), 4096);
        assert_eq!(slot.filled_len(), 0);
        assert!(!slot.is_in_flight());
        assert!(slot.physical_address().is_none());

        slot.set_filled(128, 1024);
        assert_eq!(slot.start_offset(), 128);
        assert_eq!(slot.filled_len(), 1024);

        slot.set_in_flight(true);
        assert!(slot.is_in_flight());
    }

    #[test]
    #[should_panic(expected = "filled range exceeds slot size")]
    fn test_slot_overfill_panics() {
        let slot = HardwareBufferSlot::new(0, Arc::new(HeapSegment::new(64).unwrap()));
        slot.set_filled(32, 64);
    }

    #[test]
    fn test_domain_raw_video() {
        assert!(PortDomain::Video { compressed: false }.is_raw_video());
        assert!(!PortDomain::Video { compressed: true }.is_raw_video());
        assert!(!PortDomain::Audio.is_raw_video());
        assert_eq!(PortDomain::Audio.to_string(), "audio");
    }
}
