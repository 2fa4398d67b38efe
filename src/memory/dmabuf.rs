//! DMA-BUF memory segment for exported codec output.
//!
//! Exported planes are page-granular: the descriptor always starts at a page
//! boundary and covers a whole number of pages, so the segment maps the full
//! descriptor and leaves the in-page offset to the view built on top of it.

use crate::memory::{MemorySegment, MemoryType};
use rustix::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use rustix::mm::{MapFlags, ProtFlags};
use std::ptr::NonNull;

/// A memory segment backed by a DMA-BUF file descriptor.
///
/// The segment owns the descriptor and keeps it mapped for CPU access until
/// dropped. Consumers that import the descriptor themselves (GPU, display)
/// map it at page granularity, which is why exports are page aligned.
///
/// # Thread Safety
///
/// `DmaBufSegment` is `Send + Sync`. The fd can be used from any thread and
/// the single-owner rule of the pool serializes writes.
pub struct DmaBufSegment {
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
}

impl DmaBufSegment {
    /// Map an exported descriptor of `len` bytes.
    ///
    /// `len` must be the full (page rounded) export length.
    ///
    /// # Errors
    ///
    /// Returns the errno if mmap fails (e.g., invalid fd, length past the end
    /// of the buffer).
    pub fn from_fd(fd: OwnedFd, len: usize) -> Result<Self, rustix::io::Errno> {
        // SAFETY: mapping a fresh shared region; nothing else aliases it yet.
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )?
        };

        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or(rustix::io::Errno::NOMEM)?;

        Ok(Self { fd, ptr, len })
    }

    /// Borrow the descriptor, e.g. for GPU import or fd passing.
    #[inline]
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for DmaBufSegment {
    fn drop(&mut self) {
        // Unmap before the fd is closed.
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

// SAFETY: the fd is just a number and the mapping is process-wide.
unsafe impl Send for DmaBufSegment {}

// SAFETY: mutable access is only handed out through `&mut` on the owning view.
unsafe impl Sync for DmaBufSegment {}

impl MemorySegment for DmaBufSegment {
    fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    fn as_mut_ptr(&self) -> Option<*mut u8> {
        Some(self.ptr.as_ptr())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::DmaBuf
    }
}

impl std::fmt::Debug for DmaBufSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBufSegment")
            .field("fd", &self.fd.as_raw_fd())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memfd(len: usize) -> OwnedFd {
        // memfd stands in for a real exported buffer; both are mmap-able fds.
        let fd = rustix::fs::memfd_create("test_dmabuf", rustix::fs::MemfdFlags::CLOEXEC).unwrap();
        rustix::fs::ftruncate(&fd, len as u64).unwrap();
        fd
    }

    #[test]
    fn test_dmabuf_from_memfd() {
        let segment = DmaBufSegment::from_fd(memfd(8192), 8192).unwrap();

        assert_eq!(segment.len(), 8192);
        assert_eq!(segment.memory_type(), MemoryType::DmaBuf);
        assert!(segment.as_fd().as_raw_fd() >= 0);
    }

    #[test]
    fn test_dmabuf_write_is_visible_through_fd() {
        let fd = memfd(4096);
        let dup = rustix::io::dup(&fd).unwrap();
        let segment = DmaBufSegment::from_fd(fd, 4096).unwrap();

        unsafe {
            let ptr = segment.as_mut_ptr().unwrap();
            std::ptr::copy_nonoverlapping(b"plane".as_ptr(), ptr.add(16), 5);
        }

        let other = DmaBufSegment::from_fd(dup, 4096).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(other.as_ptr().add(16), 5) };
        assert_eq!(bytes, b"plane");
    }

    #[test]
    fn test_dmabuf_debug() {
        let segment = DmaBufSegment::from_fd(memfd(4096), 4096).unwrap();
        let debug_str = format!("{:?}", segment);

        assert!(debug_str.contains("DmaBufSegment"));
        assert!(debug_str.contains("len: 4096"));
    }
}
