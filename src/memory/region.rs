//! Memory views handed out inside pool buffers.
//!
//! A [`PortMemory`] is the only way consumers see the bytes of a port
//! buffer. It is deliberately not `Clone`: the pool recycles a hardware slot
//! when the buffer holding its view comes back, and a second live view would
//! let a consumer read a slot the component is already refilling.

use super::{DmaBufSegment, MemorySegment, MemoryType};
use crate::port::HardwareBufferSlot;
use rustix::fd::BorrowedFd;
use std::sync::Arc;

/// Where the bytes of a [`PortMemory`] come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Direct read-only view of the component's slot memory.
    Hardware,
    /// Plain writable memory over the slot, for encoder input written by upstream.
    Wrapped,
    /// Memory lent by an external pool and registered with the port.
    Borrowed,
    /// Page-aligned DMA-BUF export of one plane.
    DmaBuf,
}

enum Backing {
    Slot(Arc<HardwareBufferSlot>),
    Segment(Arc<dyn MemorySegment>),
    DmaBuf(DmaBufSegment),
}

/// Convert the component's byte alignment to an alignment mask.
///
/// A value of 0 or 1 means no alignment. Values that are not a power of two
/// are ignored with a warning.
pub fn alignment_mask(alignment: u32) -> usize {
    let mask = alignment.saturating_sub(1) as usize;
    if (mask + 1) & mask != 0 {
        tracing::warn!(alignment, "invalid alignment that is not a power of two");
        return 0;
    }
    mask
}

/// A view over one region of a port buffer.
///
/// The view exposes `size` bytes starting `offset` bytes into a backing
/// region of `maxsize` bytes. Mapping never copies and unmapping is a no-op:
/// the backing memory stays resident for the whole life of the view.
pub struct PortMemory {
    kind: MemoryKind,
    backing: Backing,
    offset: usize,
    size: usize,
    maxsize: usize,
    align_mask: usize,
    read_only: bool,
}

impl PortMemory {
    /// Read-only view of the full slot, honouring the port alignment.
    pub fn hardware(slot: Arc<HardwareBufferSlot>, alignment: u32) -> Self {
        let maxsize = slot.alloc_len();
        Self {
            kind: MemoryKind::Hardware,
            backing: Backing::Slot(slot),
            offset: 0,
            size: maxsize,
            maxsize,
            align_mask: alignment_mask(alignment),
            read_only: true,
        }
    }

    /// Writable view of the full slot, not owned by the pool's allocator.
    pub fn wrapped(slot: Arc<HardwareBufferSlot>) -> Self {
        let maxsize = slot.alloc_len();
        Self {
            kind: MemoryKind::Wrapped,
            backing: Backing::Slot(slot),
            offset: 0,
            size: maxsize,
            maxsize,
            align_mask: 0,
            read_only: false,
        }
    }

    /// View of memory lent by an external pool.
    pub fn borrowed(segment: Arc<dyn MemorySegment>) -> Self {
        let maxsize = segment.len();
        let read_only = segment.as_mut_ptr().is_none();
        Self {
            kind: MemoryKind::Borrowed,
            backing: Backing::Segment(segment),
            offset: 0,
            size: maxsize,
            maxsize,
            align_mask: 0,
            read_only,
        }
    }

    /// View of `size` bytes at `offset` inside an exported descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the visible range exceeds the descriptor.
    pub fn dmabuf(segment: DmaBufSegment, offset: usize, size: usize) -> Self {
        let maxsize = segment.len();
        assert!(offset + size <= maxsize, "visible range exceeds export");
        Self {
            kind: MemoryKind::DmaBuf,
            backing: Backing::DmaBuf(segment),
            offset,
            size,
            maxsize,
            align_mask: 0,
            read_only: false,
        }
    }

    fn base(&self) -> *const u8 {
        match &self.backing {
            Backing::Slot(slot) => slot.memory().as_ptr(),
            Backing::Segment(segment) => segment.as_ptr(),
            Backing::DmaBuf(segment) => segment.as_ptr(),
        }
    }

    /// Pointer to the first visible byte. Never copies.
    #[inline]
    pub fn map(&self) -> *const u8 {
        // SAFETY: offset <= maxsize, which is within the backing region.
        unsafe { self.base().add(self.offset) }
    }

    /// Release a mapping. The memory is always resident, so this does nothing.
    #[inline]
    pub fn unmap(&self) {}

    /// The visible bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: [offset, offset + size) lies inside the backing region and
        // the pool hands each view to exactly one owner at a time.
        unsafe { std::slice::from_raw_parts(self.map(), self.size) }
    }

    /// The visible bytes, mutably. `None` for read-only hardware views.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if self.read_only {
            return None;
        }
        let ptr = self.map() as *mut u8;
        // SAFETY: as for `as_slice`; `&mut self` makes this the only access.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, self.size) })
    }

    /// Where the bytes come from.
    #[inline]
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Memory type of the backing region.
    pub fn memory_type(&self) -> MemoryType {
        match &self.backing {
            Backing::Slot(slot) => slot.memory().memory_type(),
            Backing::Segment(segment) => segment.memory_type(),
            Backing::DmaBuf(segment) => segment.memory_type(),
        }
    }

    /// Offset of the first visible byte in the backing region.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of visible bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size of the backing region.
    #[inline]
    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    /// Alignment of the mapped address in bytes.
    #[inline]
    pub fn alignment(&self) -> usize {
        self.align_mask + 1
    }

    /// Whether the view refuses writes.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Pool memory can never be shared; a view has exactly one holder.
    #[inline]
    pub fn is_shareable(&self) -> bool {
        false
    }

    /// The exported descriptor, for DMA-BUF views.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        match &self.backing {
            Backing::DmaBuf(segment) => Some(segment.as_fd()),
            _ => None,
        }
    }

    /// Move the visible window inside the backing region.
    ///
    /// # Panics
    ///
    /// Panics if the window exceeds the backing region.
    pub(crate) fn set_visible(&mut self, offset: usize, size: usize) {
        assert!(offset + size <= self.maxsize, "visible range exceeds memory");
        self.offset = offset;
        self.size = size;
    }

    /// Give back the lent segment of a borrowed view.
    pub(crate) fn into_borrowed_segment(self) -> Option<Arc<dyn MemorySegment>> {
        match self.backing {
            Backing::Segment(segment) => Some(segment),
            _ => None,
        }
    }
}

impl std::fmt::Debug for PortMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortMemory")
            .field("kind", &self.kind)
            .field("memory", &self.memory_type().name())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("maxsize", &self.maxsize)
            .field("align", &self.alignment())
            .field("read_only", &self.read_only)
            .finish()
    }
}
