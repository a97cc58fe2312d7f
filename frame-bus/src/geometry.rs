use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Pixel layout of the raw stream written by the transcoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Y plane followed by one interleaved Cb/Cr plane (4:2:0).
    Nv12,
    /// Y plane followed by one interleaved Cr/Cb plane (4:2:0).
    Nv21,
    /// Y, Cb and Cr in three separate planes (4:2:0), ffmpeg's `yuv420p`.
    I420,
    /// Single luma plane.
    Gray8,
}

/// Size of one plane inside a tightly packed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneLayout {
    pub row_bytes: usize,
    pub rows: usize,
}

impl PlaneLayout {
    pub fn byte_size(&self) -> usize {
        self.row_bytes * self.rows
    }
}

impl PixelLayout {
    pub fn plane_count(&self) -> usize {
        match self {
            PixelLayout::Nv12 | PixelLayout::Nv21 => 2,
            PixelLayout::I420 => 3,
            PixelLayout::Gray8 => 1,
        }
    }

    /// Whether chroma is subsampled by two in both directions.
    pub fn is_420(&self) -> bool {
        !matches!(self, PixelLayout::Gray8)
    }

    /// Plane sizes in stream order for a `width` x `height` frame.
    pub fn planes(&self, width: usize, height: usize) -> Vec<PlaneLayout> {
        let luma = PlaneLayout {
            row_bytes: width,
            rows: height,
        };
        match self {
            PixelLayout::Nv12 | PixelLayout::Nv21 => vec![
                luma,
                PlaneLayout {
                    row_bytes: width,
                    rows: height / 2,
                },
            ],
            PixelLayout::I420 => {
                let chroma = PlaneLayout {
                    row_bytes: width / 2,
                    rows: height / 2,
                };
                vec![luma, chroma, chroma]
            }
            PixelLayout::Gray8 => vec![luma],
        }
    }

    /// `-pix_fmt` value ffmpeg uses for this layout.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelLayout::Nv12 => "nv12",
            PixelLayout::Nv21 => "nv21",
            PixelLayout::I420 => "yuv420p",
            PixelLayout::Gray8 => "gray",
        }
    }
}

impl Display for PixelLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        let name = match self {
            PixelLayout::Nv12 => "NV12",
            PixelLayout::Nv21 => "NV21",
            PixelLayout::I420 => "I420",
            PixelLayout::Gray8 => "GRAY8",
        };
        f.write_str(name)
    }
}

impl FromStr for PixelLayout {
    type Err = String;

    /// Accepts the layout names as well as ffmpeg's `pix_fmt` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nv12" => Ok(PixelLayout::Nv12),
            "nv21" => Ok(PixelLayout::Nv21),
            "i420" | "yuv420p" => Ok(PixelLayout::I420),
            "gray8" | "gray" => Ok(PixelLayout::Gray8),
            other => Err(format!("unknown pixel layout {:?}", other)),
        }
    }
}

/// Frame geometry of one pipeline run. Only constructible through [`StreamGeometry::new`],
/// which also guards the config deserializer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GeometryConfig", into = "GeometryConfig")]
pub struct StreamGeometry {
    width: u32,
    height: u32,
    layout: PixelLayout,
    frame_size: usize,
}

impl StreamGeometry {
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Result<Self, GeometryError> {
        if width == 0 || height == 0 {
            return Err(GeometryError::ZeroDimension { width, height });
        }
        if layout.is_420() && (width % 2 != 0 || height % 2 != 0) {
            return Err(GeometryError::OddDimension {
                layout,
                width,
                height,
            });
        }
        let frame_size = layout
            .planes(width as usize, height as usize)
            .iter()
            .try_fold(0usize, |acc, p| {
                p.row_bytes
                    .checked_mul(p.rows)
                    .and_then(|n| acc.checked_add(n))
            })
            .ok_or(GeometryError::TooLarge { width, height })?;

        Ok(Self {
            width,
            height,
            layout,
            frame_size,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Bytes of one tightly packed frame on the wire.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn planes(&self) -> Vec<PlaneLayout> {
        self.layout
            .planes(self.width as usize, self.height as usize)
    }
}

/// 1920x1080 NV12, what the camera transcode produces unless told otherwise.
impl Default for StreamGeometry {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            layout: PixelLayout::Nv12,
            frame_size: 1920 * 1080 * 3 / 2,
        }
    }
}

impl Display for StreamGeometry {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}x{} {}", self.width, self.height, self.layout)
    }
}

#[derive(Serialize, Deserialize)]
struct GeometryConfig {
    width: u32,
    height: u32,
    #[serde(default = "default_layout")]
    layout: PixelLayout,
}

fn default_layout() -> PixelLayout {
    PixelLayout::Nv12
}

impl TryFrom<GeometryConfig> for StreamGeometry {
    type Error = GeometryError;

    fn try_from(value: GeometryConfig) -> Result<Self, Self::Error> {
        StreamGeometry::new(value.width, value.height, value.layout)
    }
}

impl From<StreamGeometry> for GeometryConfig {
    fn from(value: StreamGeometry) -> Self {
        Self {
            width: value.width,
            height: value.height,
            layout: value.layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_420_frame_size_is_one_and_a_half_bytes_per_pixel() {
        for (w, h) in [(2, 2), (4, 2), (640, 360), (1920, 1080), (3840, 2160)] {
            for layout in [PixelLayout::Nv12, PixelLayout::Nv21, PixelLayout::I420] {
                let g = StreamGeometry::new(w, h, layout).unwrap();
                assert_eq!(g.frame_size(), (w * h * 3 / 2) as usize, "{}", g);
            }
        }
        assert_eq!(StreamGeometry::default().frame_size(), 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn test_invalid_dimensions() {
        assert_eq!(
            StreamGeometry::new(0, 1080, PixelLayout::Nv12),
            Err(GeometryError::ZeroDimension {
                width: 0,
                height: 1080
            })
        );
        assert!(matches!(
            StreamGeometry::new(641, 360, PixelLayout::Nv12),
            Err(GeometryError::OddDimension { .. })
        ));
        assert!(StreamGeometry::new(641, 361, PixelLayout::Gray8).is_ok());
    }

    #[test]
    fn test_parse_layout() {
        assert_eq!("NV12".parse::<PixelLayout>().unwrap(), PixelLayout::Nv12);
        assert_eq!("yuv420p".parse::<PixelLayout>().unwrap(), PixelLayout::I420);
        assert!("rgb24".parse::<PixelLayout>().is_err());
    }
}
