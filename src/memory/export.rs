//! DMA-BUF export of physically addressed video planes.
//!
//! Some decoders report the physical address of each decoded frame. Instead
//! of mapping the slot, the pool asks a [`DmaExporter`] (a kernel memory
//! manager) to export every plane as a DMA-BUF descriptor so downstream
//! consumers can import the frame without touching the CPU.
//!
//! Consumers map descriptors at page granularity. A plane rarely starts on
//! a page boundary, so each export starts at the page containing the plane
//! and is rounded up to whole pages; the view over it then skips the
//! in-page offset and exposes only the plane bytes:
//!
//! ```text
//!  page boundary          phys                       phys + plane_size
//!  |<---- page_offset ---->|<-------- plane_size -------->|<- padding ->|
//!  |<------------------------- export_size -------------------------->|
//! ```

use super::{DmaBufSegment, PortMemory};
use crate::error::ExportError;
use crate::format::{MAX_PLANES, PlaneLayout};
use rustix::fd::{AsRawFd, OwnedFd};
use smallvec::SmallVec;
use std::sync::{Arc, Mutex};

/// Identifier the exporter assigns to an export, needed to end it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExportId(pub i32);

impl ExportId {
    /// Exporters report failure with negative ids.
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }
}

/// A freshly exported descriptor.
#[derive(Debug)]
pub struct ExportedDmaBuf {
    /// Id to pass to [`DmaExporter::unexport`].
    pub id: ExportId,
    /// The shareable descriptor.
    pub fd: OwnedFd,
}

/// Exports physical memory as DMA-BUF descriptors.
pub trait DmaExporter: Send + Sync {
    /// Export `len` bytes starting at the page-aligned `phys_addr`.
    fn export(&self, phys_addr: u64, len: usize) -> Result<ExportedDmaBuf, ExportError>;

    /// End an export. The descriptor may still be open elsewhere.
    fn unexport(&self, id: ExportId);
}

/// Host page size.
pub fn page_size() -> usize {
    rustix::param::page_size()
}

/// Page arithmetic for exporting one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneExport {
    /// Physical address of the first plane byte.
    pub phys_addr: u64,
    /// Distance from the start of the page to the plane.
    pub page_offset: usize,
    /// Bytes of plane data (`stride * slice_height`).
    pub plane_size: usize,
    /// Page-rounded length of the export.
    pub export_size: usize,
}

impl PlaneExport {
    /// Compute the export of `plane` in a frame starting at `base_phys`.
    ///
    /// `page_size` must be a power of two.
    pub fn plan(base_phys: u64, plane: &PlaneLayout, page_size: usize) -> Self {
        debug_assert!(page_size.is_power_of_two());
        let phys_addr = base_phys + plane.offset as u64;
        let page_offset = (phys_addr & (page_size as u64 - 1)) as usize;
        let plane_size = plane.size();
        let export_size = (plane_size + page_offset).div_ceil(page_size) * page_size;

        Self {
            phys_addr,
            page_offset,
            plane_size,
            export_size,
        }
    }

    /// Page-aligned address the export starts at.
    #[inline]
    pub fn aligned_addr(&self) -> u64 {
        self.phys_addr - self.page_offset as u64
    }
}

/// Exports planes and keeps every export id until teardown.
///
/// Export ids outlive the buffers built from them: a buffer can be
/// discarded and rebuilt while its descriptors stay exported, so ids are
/// only ended when the registry is dropped (or [`release_all`] is called).
///
/// [`release_all`]: ExportRegistry::release_all
pub struct ExportRegistry {
    exporter: Arc<dyn DmaExporter>,
    page_size: usize,
    ids: Mutex<Vec<ExportId>>,
}

impl ExportRegistry {
    /// Registry using the host page size.
    pub fn new(exporter: Arc<dyn DmaExporter>) -> Self {
        Self::with_page_size(exporter, page_size())
    }

    /// Registry using an explicit page size.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two.
    pub fn with_page_size(exporter: Arc<dyn DmaExporter>, page_size: usize) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        Self {
            exporter,
            page_size,
            ids: Mutex::new(Vec::new()),
        }
    }

    /// Page size used for rounding.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Export every plane of a frame starting at `base_phys`.
    ///
    /// Returns one view per plane, each exposing exactly the plane bytes. If
    /// any plane fails, the planes already exported for this frame are ended
    /// and closed and nothing is recorded.
    pub fn export_planes(
        &self,
        base_phys: u64,
        planes: &[PlaneLayout],
    ) -> Result<SmallVec<[PortMemory; MAX_PLANES]>, ExportError> {
        let mut memories = SmallVec::<[PortMemory; MAX_PLANES]>::new();
        let mut attempt = SmallVec::<[ExportId; MAX_PLANES]>::new();

        for (i, plane) in planes.iter().enumerate() {
            let plan = PlaneExport::plan(base_phys, plane, self.page_size);
            tracing::debug!(
                plane = i,
                plane_size = plan.plane_size,
                export_size = plan.export_size,
                page_offset = plan.page_offset,
                "plane size extended to page boundary"
            );

            match self.export_plane(&plan) {
                Ok((id, memory)) => {
                    attempt.push(id);
                    memories.push(memory);
                }
                Err(e) => {
                    tracing::error!(plane = i, error = %e, "dmabuf exporting failed");
                    drop(memories);
                    for id in attempt {
                        self.exporter.unexport(id);
                    }
                    return Err(e);
                }
            }
        }

        self.lock_ids().extend(attempt);
        Ok(memories)
    }

    fn export_plane(&self, plan: &PlaneExport) -> Result<(ExportId, PortMemory), ExportError> {
        let exported = self.exporter.export(plan.aligned_addr(), plan.export_size)?;
        tracing::debug!(
            fd = exported.fd.as_raw_fd(),
            id_export = exported.id.0,
            phys_addr = format_args!("{:#010x}", plan.phys_addr),
            "export dmabuf"
        );

        let id = exported.id;
        match DmaBufSegment::from_fd(exported.fd, plan.export_size) {
            Ok(segment) => Ok((
                id,
                PortMemory::dmabuf(segment, plan.page_offset, plan.plane_size),
            )),
            Err(errno) => {
                self.exporter.unexport(id);
                Err(ExportError::Map(errno))
            }
        }
    }

    /// Ids exported so far, in export order.
    pub fn exported_ids(&self) -> Vec<ExportId> {
        self.lock_ids().clone()
    }

    /// End every recorded export.
    pub fn release_all(&self) {
        let ids = std::mem::take(&mut *self.lock_ids());
        for id in ids {
            if id.is_valid() {
                tracing::debug!(id = id.0, "export end");
                self.exporter.unexport(id);
            } else {
                tracing::warn!(id = id.0, "invalid dmabuf id");
            }
        }
    }

    fn lock_ids(&self) -> std::sync::MutexGuard<'_, Vec<ExportId>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ExportRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for ExportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportRegistry")
            .field("page_size", &self.page_size)
            .field("exports", &self.lock_ids().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKind;
    use crate::testing::MemfdExporter;

    const PAGE: usize = 4096;

    #[test]
    fn test_plan_1080p_luma() {
        let plane = PlaneLayout {
            offset: 0,
            stride: 1920,
            slice_height: 1080,
        };
        let plan = PlaneExport::plan(0x1000_0010, &plane, PAGE);

        assert_eq!(plan.page_offset, 16);
        assert_eq!(plan.plane_size, 2_073_600);
        assert_eq!(plan.export_size, 2_076_672);
        assert_eq!(plan.aligned_addr(), 0x1000_0000);
    }

    #[test]
    fn test_plan_aligned_plane_needs_no_padding_page() {
        let plane = PlaneLayout {
            offset: 0,
            stride: 4096,
            slice_height: 2,
        };
        let plan = PlaneExport::plan(0x2000_0000, &plane, PAGE);

        assert_eq!(plan.page_offset, 0);
        assert_eq!(plan.export_size, 8192);
    }

    #[test]
    fn test_plan_uses_plane_offset() {
        let plane = PlaneLayout {
            offset: 1920 * 1080,
            stride: 1920,
            slice_height: 540,
        };
        let plan = PlaneExport::plan(0x1000_0000, &plane, PAGE);

        assert_eq!(plan.phys_addr, 0x1000_0000 + 2_073_600);
        assert_eq!(plan.page_offset, 2_073_600 % PAGE);
    }

    #[test]
    fn test_export_planes_records_ids() {
        let exporter = Arc::new(MemfdExporter::new());
        let registry = ExportRegistry::with_page_size(exporter.clone(), PAGE);
        let planes = [
            PlaneLayout { offset: 0, stride: 64, slice_height: 64 },
            PlaneLayout { offset: 4096, stride: 64, slice_height: 32 },
        ];

        let memories = registry.export_planes(0x3000_0100, &planes).unwrap();

        assert_eq!(memories.len(), 2);
        assert_eq!(memories[0].kind(), MemoryKind::DmaBuf);
        assert_eq!(memories[0].offset(), 0x100);
        assert_eq!(memories[0].size(), 64 * 64);
        assert_eq!(memories[0].maxsize(), PAGE * 2);
        assert!(memories[0].fd().is_some());
        assert_eq!(registry.exported_ids().len(), 2);

        drop(memories);
        // Ids stay exported after the views are gone.
        assert!(exporter.unexported().is_empty());

        drop(registry);
        assert_eq!(exporter.unexported().len(), 2);
    }

    #[test]
    fn test_export_failure_rolls_back_attempt() {
        let exporter = Arc::new(MemfdExporter::new().fail_after(2));
        let registry = ExportRegistry::with_page_size(exporter.clone(), PAGE);
        let plane = PlaneLayout { offset: 0, stride: 64, slice_height: 16 };

        registry.export_planes(0x1000, &[plane]).unwrap();
        let err = registry.export_planes(0x8000, &[plane, plane, plane]).unwrap_err();

        assert!(matches!(err, ExportError::Refused { .. }));
        // The one plane exported for the failed frame was ended immediately.
        assert_eq!(exporter.unexported(), vec![ExportId(1)]);
        assert_eq!(registry.exported_ids(), vec![ExportId(0)]);
    }

    #[test]
    fn test_release_all_skips_invalid_ids() {
        let exporter = Arc::new(MemfdExporter::new());
        let registry = ExportRegistry::with_page_size(exporter.clone(), PAGE);
        registry.lock_ids().extend([ExportId(7), ExportId(-1)]);

        registry.release_all();

        assert_eq!(exporter.unexported(), vec![ExportId(7)]);
        assert!(registry.exported_ids().is_empty());
    }
}
