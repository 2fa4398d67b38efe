//! Memory segment trait and types.

/// Type of memory backing a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryType {
    /// Host heap memory (single-process only).
    Heap,
    /// Memory allocated by the codec component and registered with a port.
    Hardware,
    /// DMA-BUF exported from physical memory.
    DmaBuf,
}

impl MemoryType {
    /// Human-readable name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            MemoryType::Heap => "heap",
            MemoryType::Hardware => "openmax",
            MemoryType::DmaBuf => "dmabuf",
        }
    }
}

/// Trait for memory segment backends.
///
/// A memory segment represents a contiguous region of memory that outlives
/// every view created over it.
///
/// # Safety
///
/// Implementations must ensure that:
/// - Pointers remain valid for the lifetime of the segment
/// - Thread-safety requirements are met (Send + Sync)
pub trait MemorySegment: Send + Sync {
    /// Get a raw pointer to the start of this segment.
    fn as_ptr(&self) -> *const u8;

    /// Get a mutable pointer to the start of this segment.
    ///
    /// Returns `None` if the segment is read-only.
    fn as_mut_ptr(&self) -> Option<*mut u8>;

    /// Total size of the segment in bytes.
    fn len(&self) -> usize;

    /// Returns true if the segment has zero length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The type of memory backing this segment.
    fn memory_type(&self) -> MemoryType;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_name() {
        assert_eq!(MemoryType::Hardware.name(), "openmax");
        assert_eq!(MemoryType::DmaBuf.name(), "dmabuf");
    }
}
