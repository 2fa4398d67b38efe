//! Buffers handed out by a port pool.

use crate::format::MAX_PLANES;
use crate::memory::{MemoryKind, MemorySegment, PortMemory};
use crate::metadata::VideoMeta;
use crate::pool::PoolShared;
use crate::port::HardwareBufferSlot;
use smallvec::SmallVec;
use std::sync::Arc;

/// A pool whose buffers can be lent to a port pool.
///
/// When the port uses memory from another pool, that pool's buffers are
/// registered with the component and adopted by the port pool for as long as
/// it runs: one [`lend`] per hardware slot at start, and one [`restore`] per
/// adopted buffer when the port pool frees it.
///
/// [`lend`]: ExternalPool::lend
/// [`restore`]: ExternalPool::restore
pub trait ExternalPool: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &str;

    /// Number of buffers that can currently be lent.
    fn available(&self) -> usize;

    /// Lend the next buffer, if any is left.
    fn lend(&self) -> Option<ExternalBuffer>;

    /// Take back a buffer previously lent out.
    fn restore(&self, buffer: ExternalBuffer);
}

/// A buffer owned by an [`ExternalPool`].
pub struct ExternalBuffer {
    /// Memory of the buffer, in order.
    pub segments: Vec<Arc<dyn MemorySegment>>,
    /// Layout metadata, if the owner attached any.
    pub video_meta: Option<VideoMeta>,
}

impl ExternalBuffer {
    /// A single-memory buffer without metadata.
    pub fn new(segment: Arc<dyn MemorySegment>) -> Self {
        Self {
            segments: vec![segment],
            video_meta: None,
        }
    }

    /// Attach layout metadata.
    pub fn with_video_meta(mut self, meta: VideoMeta) -> Self {
        self.video_meta = Some(meta);
        self
    }
}

impl std::fmt::Debug for ExternalBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalBuffer")
            .field("segments", &self.segments.len())
            .field("video_meta", &self.video_meta)
            .finish()
    }
}

/// Who the memory of a buffer belongs to.
pub(crate) enum BufferOrigin {
    /// Built by the port pool; destroyed when freed.
    Owned,
    /// Adopted from an external pool; restored to it when freed.
    Borrowed(Arc<dyn ExternalPool>),
}

/// The contents of a buffer, moved between the pool table and its holder.
pub(crate) struct BufferInner {
    pub(crate) slot: Arc<HardwareBufferSlot>,
    pub(crate) memories: SmallVec<[PortMemory; MAX_PLANES]>,
    pub(crate) video_meta: Option<VideoMeta>,
    pub(crate) origin: BufferOrigin,
    /// Pool run this buffer was built in.
    pub(crate) epoch: u64,
}

impl BufferInner {
    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.slot.index()
    }

    /// Whether the memory is the pool's own hardware view, whose visible
    /// window tracks the slot's fill state.
    pub(crate) fn owns_hardware_memory(&self) -> bool {
        matches!(self.origin, BufferOrigin::Owned)
            && self
                .memories
                .first()
                .is_some_and(|m| m.kind() == MemoryKind::Hardware)
    }

    /// Destroy the buffer, giving borrowed memory back to its owner.
    pub(crate) fn free(self) {
        let index = self.index();
        match self.origin {
            BufferOrigin::Owned => {
                tracing::trace!(index, "freeing buffer");
            }
            BufferOrigin::Borrowed(owner) => {
                tracing::debug!(index, pool = owner.name(), "restoring borrowed buffer");
                let segments = self
                    .memories
                    .into_iter()
                    .filter_map(PortMemory::into_borrowed_segment)
                    .collect();
                owner.restore(ExternalBuffer {
                    segments,
                    video_meta: self.video_meta,
                });
            }
        }
    }
}

/// A buffer of a port pool, corresponding to exactly one hardware slot.
///
/// Holding a `PortBuffer` is holding the buffer: nobody else, neither
/// another consumer nor the component, can reach its memory until it is
/// released. Dropping it releases it back to its pool, which is the same as
/// calling [`PortBufferPool::release`](crate::pool::PortBufferPool::release).
pub struct PortBuffer {
    inner: Option<BufferInner>,
    pool: Arc<PoolShared>,
}

impl PortBuffer {
    pub(crate) fn new(inner: BufferInner, pool: Arc<PoolShared>) -> Self {
        Self {
            inner: Some(inner),
            pool,
        }
    }

    fn inner(&self) -> &BufferInner {
        // Only `Drop` takes the contents.
        self.inner.as_ref().expect("PortBuffer already released")
    }

    fn inner_mut(&mut self) -> &mut BufferInner {
        self.inner.as_mut().expect("PortBuffer already released")
    }

    /// Index of the hardware slot behind this buffer.
    pub fn index(&self) -> usize {
        self.inner().index()
    }

    /// The hardware slot behind this buffer.
    pub fn slot(&self) -> &HardwareBufferSlot {
        &self.inner().slot
    }

    /// Number of memory views (one per plane for DMA-BUF exports).
    pub fn n_memory(&self) -> usize {
        self.inner().memories.len()
    }

    /// All memory views, in order.
    pub fn memories(&self) -> &[PortMemory] {
        &self.inner().memories
    }

    /// Memory view `i`.
    pub fn memory(&self, i: usize) -> Option<&PortMemory> {
        self.inner().memories.get(i)
    }

    /// Memory view `i`, mutably.
    pub fn memory_mut(&mut self, i: usize) -> Option<&mut PortMemory> {
        self.inner_mut().memories.get_mut(i)
    }

    /// Layout metadata, if attached.
    pub fn video_meta(&self) -> Option<&VideoMeta> {
        self.inner().video_meta.as_ref()
    }

    /// Whether the memory was lent by an external pool.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.inner().origin, BufferOrigin::Borrowed(_))
    }

    /// Total visible bytes across all memories.
    pub fn size(&self) -> usize {
        self.inner().memories.iter().map(PortMemory::size).sum()
    }
}

impl Drop for PortBuffer {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            self.pool.give_back(inner);
        }
    }
}

impl std::fmt::Debug for PortBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("PortBuffer")
                .field("index", &inner.index())
                .field("memories", &inner.memories)
                .field("video_meta", &inner.video_meta)
                .field("borrowed", &matches!(inner.origin, BufferOrigin::Borrowed(_)))
                .finish(),
            None => f.write_str("PortBuffer(released)"),
        }
    }
}
