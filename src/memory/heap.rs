//! Heap-backed memory segment.

use super::{MemorySegment, MemoryType};
use crate::error::{Error, Result};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// A zero-initialized heap allocation with a guaranteed alignment.
///
/// Used to back hardware slots in software ports and to hold the memory of
/// buffers lent by an external pool.
///
/// # Example
///
/// ```rust
/// use portpool::memory::{HeapSegment, MemorySegment};
///
/// let segment = HeapSegment::with_alignment(4096, 64).unwrap();
/// assert_eq!(segment.len(), 4096);
/// assert_eq!(segment.as_ptr() as usize % 64, 0);
/// ```
pub struct HeapSegment {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl HeapSegment {
    /// Create a new heap segment with the given size.
    ///
    /// # Errors
    ///
    /// Returns an error if size is 0 or allocation fails.
    pub fn new(size: usize) -> Result<Self> {
        Self::with_alignment(size, 1)
    }

    /// Create a new heap segment aligned to `align` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if size is 0, `align` is not a power of two, or the
    /// allocator fails.
    pub fn with_alignment(size: usize, align: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }
        let layout = Layout::from_size_align(size, align)
            .map_err(|e| Error::AllocationFailed(format!("invalid layout: {}", e)))?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            Error::AllocationFailed(format!("allocator returned null for {} bytes", size))
        })?;

        Ok(Self { ptr, layout })
    }

    /// Alignment the segment was allocated with.
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl Drop for HeapSegment {
    fn drop(&mut self) {
        // SAFETY: allocated in `with_alignment` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// SAFETY: the allocation is exclusively owned by the segment.
unsafe impl Send for HeapSegment {}
unsafe impl Sync for HeapSegment {}

impl MemorySegment for HeapSegment {
    fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    fn as_mut_ptr(&self) -> Option<*mut u8> {
        Some(self.ptr.as_ptr())
    }

    fn len(&self) -> usize {
        self.layout.size()
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::Heap
    }
}

impl std::fmt::Debug for HeapSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapSegment")
            .field("len", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_segment_zero_size_fails() {
        assert!(HeapSegment::new(0).is_err());
    }

    #[test]
    fn test_heap_segment_bad_alignment_fails() {
        assert!(HeapSegment::with_alignment(1024, 24).is_err());
    }

    #[test]
    fn test_heap_segment_alignment() {
        for align in [1, 16, 256, 4096] {
            let segment = HeapSegment::with_alignment(1000, align).unwrap();
            assert_eq!(segment.as_ptr() as usize % align, 0);
            assert_eq!(segment.alignment(), align);
        }
    }

    #[test]
    fn test_heap_segment_is_zeroed_and_writable() {
        let segment = HeapSegment::new(128).unwrap();
        let ptr = segment.as_mut_ptr().unwrap();
        unsafe {
            assert!(std::slice::from_raw_parts(ptr, 128).iter().all(|&b| b == 0));
            ptr.add(5).write(9);
            assert_eq!(*segment.as_ptr().add(5), 9);
        }
        assert_eq!(segment.memory_type(), MemoryType::Heap);
    }
}
