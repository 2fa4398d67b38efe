//! Per-frame layout metadata attached to pool buffers.

use crate::format::{MAX_PLANES, PixelFormat, PlaneLayout, VideoInfo};

/// Layout of a video frame inside a buffer's memory.
///
/// Consumers that understand this metadata can read frames whose strides or
/// plane offsets differ from the default packed layout without copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMeta {
    /// Pixel format.
    pub format: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Number of valid entries in `offsets` and `strides`.
    pub n_planes: usize,
    /// Byte offset of each plane.
    pub offsets: [usize; MAX_PLANES],
    /// Bytes per row of each plane.
    pub strides: [usize; MAX_PLANES],
}

impl VideoMeta {
    /// Metadata describing the default packed layout of `info`.
    pub fn new(info: &VideoInfo) -> Self {
        Self::with_layout(info, &info.default_layout())
    }

    /// Metadata describing an explicit plane layout.
    ///
    /// Planes beyond [`MAX_PLANES`] are ignored.
    pub fn with_layout(info: &VideoInfo, planes: &[PlaneLayout]) -> Self {
        let mut offsets = [0; MAX_PLANES];
        let mut strides = [0; MAX_PLANES];
        let n_planes = planes.len().min(MAX_PLANES);
        for (i, plane) in planes.iter().take(n_planes).enumerate() {
            offsets[i] = plane.offset;
            strides[i] = plane.stride;
        }

        Self {
            format: info.format,
            width: info.width,
            height: info.height,
            n_planes,
            offsets,
            strides,
        }
    }

    /// Offsets of the valid planes.
    pub fn plane_offsets(&self) -> &[usize] {
        &self.offsets[..self.n_planes]
    }

    /// Strides of the valid planes.
    pub fn plane_strides(&self) -> &[usize] {
        &self.strides[..self.n_planes]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_meta() {
        let info = VideoInfo::new(PixelFormat::Nv12, 640, 480);
        let meta = VideoMeta::new(&info);

        assert_eq!(meta.n_planes, 2);
        assert_eq!(meta.plane_strides(), &[640, 640]);
        assert_eq!(meta.plane_offsets(), &[0, 640 * 480]);
    }

    #[test]
    fn test_meta_with_port_layout() {
        let info = VideoInfo::new(PixelFormat::I420, 1920, 1080);
        let layout = info.port_layout(2048, 1088).unwrap();
        let meta = VideoMeta::with_layout(&info, &layout);

        assert_eq!(meta.format, PixelFormat::I420);
        assert_eq!(meta.width, 1920);
        assert_eq!(meta.plane_strides(), &[2048, 1024, 1024]);
        assert_eq!(meta.plane_offsets()[1], 2048 * 1088);
    }
}
