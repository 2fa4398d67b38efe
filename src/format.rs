//! Media format and caps types.
//!
//! A pool attached to a raw video port needs two layouts for every frame:
//!
//! - the **port layout**, dictated by the component's stride and slice
//!   height ([`VideoInfo::port_layout`]);
//! - the **default layout**, the tightly packed layout consumers assume when
//!   a buffer carries no layout metadata ([`VideoInfo::default_layout`]).
//!
//! When the two differ and no metadata is attached, consumers must copy.

use crate::error::ConfigError;
use smallvec::SmallVec;

/// Maximum number of planes in a video frame.
pub const MAX_PLANES: usize = 4;

#[inline]
const fn round_up(value: usize, n: usize) -> usize {
    value.div_ceil(n) * n
}

/// Pixel formats (color space and memory layout).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u8)]
pub enum PixelFormat {
    // ========================================================================
    // YUV formats
    // ========================================================================
    /// YUV 4:2:0 planar (Y plane, then U plane, then V plane).
    #[default]
    I420 = 0,
    /// YUV 4:2:0 semi-planar (Y plane, then interleaved UV plane).
    Nv12,
    /// YUV 4:2:2 semi-planar (Y plane, then interleaved UV plane).
    Nv16,
    /// YUV 4:2:0 semi-planar, 10-bit in 16-bit words.
    P010,
    /// YUV 4:2:2 packed (Y0 U Y1 V).
    Yuy2,
    /// YUV 4:2:2 packed (U Y0 V Y1).
    Uyvy,
    /// YUV 4:2:2 packed (Y0 V Y1 U).
    Yvyu,

    // ========================================================================
    // RGB formats
    // ========================================================================
    /// ARGB 8-bit per channel, packed (32 bits/pixel).
    Argb,
    /// ABGR 8-bit per channel, packed (32 bits/pixel).
    Abgr,
    /// RGB 5-6-5, packed (16 bits/pixel).
    Rgb16,
    /// BGR 5-6-5, packed (16 bits/pixel).
    Bgr16,

    // ========================================================================
    // Grayscale formats
    // ========================================================================
    /// 8-bit grayscale.
    Gray8,
}

impl PixelFormat {
    /// Number of planes.
    pub const fn n_planes(&self) -> usize {
        match self {
            PixelFormat::I420 => 3,
            PixelFormat::Nv12 | PixelFormat::Nv16 | PixelFormat::P010 => 2,
            _ => 1,
        }
    }

    /// Short name, as used in caps strings.
    pub const fn name(&self) -> &'static str {
        match self {
            PixelFormat::I420 => "I420",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Nv16 => "NV16",
            PixelFormat::P010 => "P010_10LE",
            PixelFormat::Yuy2 => "YUY2",
            PixelFormat::Uyvy => "UYVY",
            PixelFormat::Yvyu => "YVYU",
            PixelFormat::Argb => "ARGB",
            PixelFormat::Abgr => "ABGR",
            PixelFormat::Rgb16 => "RGB16",
            PixelFormat::Bgr16 => "BGR16",
            PixelFormat::Gray8 => "GRAY8",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Video codecs carried by compressed ports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VideoCodec {
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    H265,
    /// VP8.
    Vp8,
    /// VP9.
    Vp9,
}

/// Position and geometry of one plane inside a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Byte offset of the plane from the start of the frame.
    pub offset: usize,
    /// Bytes per row.
    pub stride: usize,
    /// Number of rows.
    pub slice_height: usize,
}

impl PlaneLayout {
    /// Size of the plane in bytes.
    #[inline]
    pub const fn size(&self) -> usize {
        self.stride * self.slice_height
    }
}

/// Plane layouts of a frame, one per plane.
pub type PlaneLayouts = SmallVec<[PlaneLayout; MAX_PLANES]>;

/// Raw video frame description.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VideoInfo {
    /// Pixel format.
    pub format: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl VideoInfo {
    /// Create a new video info.
    pub const fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    /// Number of planes.
    #[inline]
    pub const fn n_planes(&self) -> usize {
        self.format.n_planes()
    }

    /// Tightly packed layout with rows aligned to 4 bytes.
    ///
    /// This is the layout consumers assume when a buffer has no metadata.
    pub fn default_layout(&self) -> PlaneLayouts {
        let w = self.width as usize;
        let h = self.height as usize;
        let h2 = round_up(h, 2);
        let mut planes = PlaneLayouts::new();

        match self.format {
            PixelFormat::I420 => {
                let s0 = round_up(w, 4);
                let s1 = round_up(round_up(w, 2) / 2, 4);
                let o1 = s0 * h2;
                planes.push(PlaneLayout { offset: 0, stride: s0, slice_height: h });
                planes.push(PlaneLayout { offset: o1, stride: s1, slice_height: h2 / 2 });
                planes.push(PlaneLayout {
                    offset: o1 + s1 * (h2 / 2),
                    stride: s1,
                    slice_height: h2 / 2,
                });
            }
            PixelFormat::Nv12 => {
                let s0 = round_up(w, 4);
                planes.push(PlaneLayout { offset: 0, stride: s0, slice_height: h });
                planes.push(PlaneLayout { offset: s0 * h2, stride: s0, slice_height: h2 / 2 });
            }
            PixelFormat::Nv16 => {
                let s0 = round_up(w, 4);
                planes.push(PlaneLayout { offset: 0, stride: s0, slice_height: h });
                planes.push(PlaneLayout { offset: s0 * h, stride: s0, slice_height: h });
            }
            PixelFormat::P010 => {
                let s0 = round_up(w * 2, 4);
                planes.push(PlaneLayout { offset: 0, stride: s0, slice_height: h });
                planes.push(PlaneLayout { offset: s0 * h2, stride: s0, slice_height: h2 / 2 });
            }
            PixelFormat::Yuy2 | PixelFormat::Uyvy | PixelFormat::Yvyu => {
                planes.push(PlaneLayout {
                    offset: 0,
                    stride: round_up(round_up(w, 2) * 2, 4),
                    slice_height: h,
                });
            }
            PixelFormat::Argb | PixelFormat::Abgr => {
                planes.push(PlaneLayout { offset: 0, stride: w * 4, slice_height: h });
            }
            PixelFormat::Rgb16 | PixelFormat::Bgr16 => {
                planes.push(PlaneLayout { offset: 0, stride: round_up(w * 2, 4), slice_height: h });
            }
            PixelFormat::Gray8 => {
                planes.push(PlaneLayout { offset: 0, stride: round_up(w, 4), slice_height: h });
            }
        }

        planes
    }

    /// Layout of a frame inside a port buffer with the given first-plane
    /// stride and slice height.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedFormat`] for formats the component
    /// layout rules do not cover.
    pub fn port_layout(&self, stride: u32, slice_height: u32) -> Result<PlaneLayouts, ConfigError> {
        let stride = stride as usize;
        let slice = slice_height as usize;
        let mut planes = PlaneLayouts::new();
        planes.push(PlaneLayout { offset: 0, stride, slice_height: slice });

        match self.format {
            PixelFormat::Argb
            | PixelFormat::Abgr
            | PixelFormat::Rgb16
            | PixelFormat::Bgr16
            | PixelFormat::Yuy2
            | PixelFormat::Uyvy
            | PixelFormat::Yvyu
            | PixelFormat::Gray8 => {}
            PixelFormat::I420 => {
                let o1 = stride * slice;
                let chroma = PlaneLayout {
                    offset: o1,
                    stride: stride / 2,
                    slice_height: slice / 2,
                };
                planes.push(chroma);
                planes.push(PlaneLayout {
                    offset: o1 + chroma.stride * slice / 2,
                    ..chroma
                });
            }
            PixelFormat::Nv12 => {
                planes.push(PlaneLayout {
                    offset: stride * slice,
                    stride,
                    slice_height: slice / 2,
                });
            }
            PixelFormat::Nv16 => {
                planes.push(PlaneLayout {
                    offset: stride * slice,
                    stride,
                    slice_height: slice,
                });
            }
            PixelFormat::P010 => {
                return Err(ConfigError::UnsupportedFormat(self.format.to_string()));
            }
        }

        Ok(planes)
    }

    /// Whether a frame laid out as `layout` differs from the default layout.
    pub fn needs_copy(&self, layout: &[PlaneLayout]) -> bool {
        self.default_layout()
            .iter()
            .zip(layout)
            .any(|(default, actual)| {
                default.stride != actual.stride || default.offset != actual.offset
            })
    }
}

impl std::fmt::Display for VideoInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "video/x-raw, format={}, width={}, height={}",
            self.format, self.width, self.height
        )
    }
}

/// Caps a pool is configured with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolCaps {
    /// Uncompressed video frames.
    RawVideo(VideoInfo),
    /// Compressed video bitstream.
    EncodedVideo(VideoCodec),
    /// Any other media type, by name.
    Other(String),
}

impl PoolCaps {
    /// The video info for raw video caps.
    pub fn video_info(&self) -> Option<&VideoInfo> {
        match self {
            PoolCaps::RawVideo(info) => Some(info),
            _ => None,
        }
    }
}

impl std::fmt::Display for PoolCaps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolCaps::RawVideo(info) => write!(f, "{}", info),
            PoolCaps::EncodedVideo(codec) => write!(f, "video/{:?}", codec),
            PoolCaps::Other(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i420_port_layout() {
        let info = VideoInfo::new(PixelFormat::I420, 1920, 1080);
        let planes = info.port_layout(2048, 1088).unwrap();

        assert_eq!(planes.len(), 3);
        assert_eq!(planes[1].offset, 2048 * 1088);
        assert_eq!(planes[1].stride, 1024);
        assert_eq!(planes[1].slice_height, 544);
        assert_eq!(planes[2].offset, 2048 * 1088 + 1024 * 544);
        assert_eq!(planes[2].stride, 1024);
    }

    #[test]
    fn test_nv12_and_nv16_port_layout() {
        let nv12 = VideoInfo::new(PixelFormat::Nv12, 1920, 1080).port_layout(1920, 1080).unwrap();
        assert_eq!(nv12.len(), 2);
        assert_eq!(nv12[1].offset, 1920 * 1080);
        assert_eq!(nv12[1].size(), 1920 * 540);

        let nv16 = VideoInfo::new(PixelFormat::Nv16, 1920, 1080).port_layout(1920, 1080).unwrap();
        assert_eq!(nv16[1].size(), 1920 * 1080);
    }

    #[test]
    fn test_packed_port_layout() {
        let planes = VideoInfo::new(PixelFormat::Yuy2, 640, 480).port_layout(1280, 480).unwrap();
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0], PlaneLayout { offset: 0, stride: 1280, slice_height: 480 });
    }

    #[test]
    fn test_unsupported_port_layout() {
        let err = VideoInfo::new(PixelFormat::P010, 64, 64).port_layout(128, 64).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedFormat("P010_10LE".into()));
    }

    #[test]
    fn test_default_layout_odd_sizes() {
        let planes = VideoInfo::new(PixelFormat::I420, 321, 241).default_layout();
        assert_eq!(planes[0].stride, 324);
        assert_eq!(planes[1].stride, 164);
        assert_eq!(planes[1].offset, 324 * 242);
        assert_eq!(planes[2].offset, 324 * 242 + 164 * 121);
    }

    #[test]
    fn test_needs_copy() {
        let info = VideoInfo::new(PixelFormat::Nv12, 1920, 1080);

        let exact = info.port_layout(1920, 1080).unwrap();
        assert!(!info.needs_copy(&exact));

        // Slice height padded to a macroblock multiple moves the chroma plane.
        let padded = info.port_layout(1920, 1088).unwrap();
        assert!(info.needs_copy(&padded));

        let wide = info.port_layout(2048, 1080).unwrap();
        assert!(info.needs_copy(&wide));
    }

    #[test]
    fn test_caps_display() {
        let caps = PoolCaps::RawVideo(VideoInfo::new(PixelFormat::Nv12, 64, 32));
        assert_eq!(caps.to_string(), "video/x-raw, format=NV12, width=64, height=32");
        assert!(caps.video_info().is_some());
        assert!(PoolCaps::EncodedVideo(VideoCodec::H264).video_info().is_none());
    }
}
