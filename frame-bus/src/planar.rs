use bytes::Bytes;

use crate::{
    deframer::RawChunk,
    error::BufferError,
    geometry::{PixelLayout, StreamGeometry},
};

/// One plane of a frame. Rows are `stride` bytes apart, of which the first
/// `row_bytes` carry pixels and the rest is zero padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plane {
    data: Bytes,
    stride: usize,
    rows: usize,
    row_bytes: usize,
}

impl Plane {
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Pixel bytes of row `index`, padding excluded.
    pub fn row(&self, index: usize) -> Option<&[u8]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.stride;
        self.data.get(start..start + self.row_bytes)
    }
}

/// Frame image in its own plane memory, never aliasing the raw chunk it was
/// built from. Cheap to clone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanarBuffer {
    width: u32,
    height: u32,
    layout: PixelLayout,
    planes: Vec<Plane>,
}

impl PlanarBuffer {
    /// Copies the planes of `chunk` out in stream order. Every row is padded to
    /// a multiple of `stride_align` bytes (`0` and `1` mean tightly packed).
    pub fn from_chunk(
        geometry: &StreamGeometry,
        chunk: RawChunk<'_>,
        stride_align: usize,
    ) -> Result<Self, BufferError> {
        let expected = geometry.frame_size();
        if chunk.len() != expected {
            return Err(BufferError::SizeMismatch {
                expected,
                actual: chunk.len(),
            });
        }

        let align = stride_align.max(1);
        let bytes = chunk.as_bytes();
        let mut offset = 0;
        let mut planes = Vec::with_capacity(geometry.layout().plane_count());

        for layout in geometry.planes() {
            let src = &bytes[offset..offset + layout.byte_size()];
            offset += layout.byte_size();
            planes.push(copy_plane(src, layout.row_bytes, layout.rows, align)?);
        }

        Ok(Self {
            width: geometry.width(),
            height: geometry.height(),
            layout: geometry.layout(),
            planes,
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

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes.get(index)
    }

    pub fn luma(&self) -> &Plane {
        &self.planes[0]
    }

    /// First chroma plane: interleaved CbCr for NV12, Cb for I420, `None` for GRAY8.
    pub fn chroma(&self) -> Option<&Plane> {
        self.planes.get(1)
    }

    /// Converts to packed RGB24 using BT.601 coefficients.
    pub fn to_rgb(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;
        let mut rgb = Vec::with_capacity(width * height * 3);

        for j in 0..height {
            let y_row = self.luma().row(j).unwrap_or_default();
            for i in 0..width {
                let (u, v) = self.chroma_at(i, j);
                let y = y_row.get(i).copied().unwrap_or(0) as f32;
                let u = u as f32 - 128.0;
                let v = v as f32 - 128.0;

                let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
                let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
                let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;

                rgb.extend_from_slice(&[r, g, b]);
            }
        }

        rgb
    }

    fn chroma_at(&self, x: usize, y: usize) -> (u8, u8) {
        let sample = |plane: usize, col: usize| {
            self.plane(plane)
                .and_then(|p| p.row(y / 2))
                .and_then(|row| row.get(col))
                .copied()
                .unwrap_or(128)
        };
        let pair = (x / 2) * 2;
        match self.layout {
            PixelLayout::Nv12 => (sample(1, pair), sample(1, pair + 1)),
            PixelLayout::Nv21 => (sample(1, pair + 1), sample(1, pair)),
            PixelLayout::I420 => (sample(1, x / 2), sample(2, x / 2)),
            PixelLayout::Gray8 => (128, 128),
        }
    }
}

fn copy_plane(
    src: &[u8],
    row_bytes: usize,
    rows: usize,
    align: usize,
) -> Result<Plane, BufferError> {
    let stride = row_bytes.div_ceil(align).saturating_mul(align);
    let size = stride.saturating_mul(rows);

    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|source| BufferError::Allocation {
            bytes: size,
            source,
        })?;

    if stride == row_bytes {
        data.extend_from_slice(src);
    } else {
        for row in src.chunks_exact(row_bytes) {
            data.extend_from_slice(row);
            data.resize(data.len() + stride - row_bytes, 0);
        }
    }

    Ok(Plane {
        data: Bytes::from(data),
        stride,
        rows,
        row_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(width: u32, height: u32, layout: PixelLayout) -> StreamGeometry {
        StreamGeometry::new(width, height, layout).unwrap()
    }

    fn counting(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn test_nv12_plane_split() {
        let g = geometry(4, 2, PixelLayout::Nv12);
        let raw = counting(12);
        let buffer = PlanarBuffer::from_chunk(&g, RawChunk::new(&raw), 1).unwrap();

        assert_eq!(buffer.planes().len(), 2);
        assert_eq!(&buffer.luma().data()[..], &raw[..8]);
        assert_eq!(&buffer.chroma().unwrap().data()[..], &raw[8..12]);
        assert_eq!(buffer.luma().stride(), 4);
        assert_eq!(buffer.chroma().unwrap().rows(), 1);
    }

    #[test]
    fn test_i420_plane_split() {
        let g = geometry(4, 4, PixelLayout::I420);
        let raw = counting(24);
        let buffer = PlanarBuffer::from_chunk(&g, RawChunk::new(&raw), 1).unwrap();

        assert_eq!(buffer.planes().len(), 3);
        assert_eq!(&buffer.luma().data()[..], &raw[..16]);
        assert_eq!(&buffer.plane(1).unwrap().data()[..], &raw[16..20]);
        assert_eq!(&buffer.plane(2).unwrap().data()[..], &raw[20..24]);
    }

    #[test]
    fn test_rows_are_padded_to_alignment() {
        let g = geometry(4, 2, PixelLayout::Nv12);
        let raw = counting(12);
        let buffer = PlanarBuffer::from_chunk(&g, RawChunk::new(&raw), 8).unwrap();

        let luma = buffer.luma();
        assert_eq!(luma.stride(), 8);
        assert_eq!(luma.data().len(), 16);
        assert_eq!(luma.row(0).unwrap(), &[0, 1, 2, 3]);
        assert_eq!(luma.row(1).unwrap(), &[4, 5, 6, 7]);
        assert_eq!(&luma.data()[4..8], &[0, 0, 0, 0]);
        assert!(luma.row(2).is_none());
        assert_eq!(buffer.chroma().unwrap().row(0).unwrap(), &[8, 9, 10, 11]);
    }

    #[test]
    fn test_wrong_chunk_size_is_rejected() {
        let g = geometry(4, 2, PixelLayout::Nv12);
        let raw = counting(11);
        match PlanarBuffer::from_chunk(&g, RawChunk::new(&raw), 1) {
            Err(BufferError::SizeMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (12, 11));
            }
            other => panic!("expected size mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_buffer_does_not_alias_chunk() {
        let g = geometry(2, 2, PixelLayout::Nv12);
        let mut raw = counting(6);
        let buffer = PlanarBuffer::from_chunk(&g, RawChunk::new(&raw), 1).unwrap();
        raw.fill(0xff);
        assert_eq!(&buffer.luma().data()[..], &[0, 1, 2, 3]);
    }

    #[test]
    fn test_neutral_gray_to_rgb() {
        for layout in [PixelLayout::Nv12, PixelLayout::Nv21, PixelLayout::I420, PixelLayout::Gray8] {
            let g = geometry(2, 2, layout);
            let raw = vec![128u8; g.frame_size()];
            let buffer = PlanarBuffer::from_chunk(&g, RawChunk::new(&raw), 1).unwrap();
            assert_eq!(buffer.to_rgb(), vec![128u8; 12], "{}", layout);
        }
    }

    #[test]
    fn test_nv21_swaps_chroma_order() {
        // strong red: Cr high, Cb neutral
        let nv12: [u8; 6] = [76, 76, 76, 76, 128, 255];
        let nv21: [u8; 6] = [76, 76, 76, 76, 255, 128];
        let to_rgb = |layout, raw: &[u8]| {
            let g = geometry(2, 2, layout);
            PlanarBuffer::from_chunk(&g, RawChunk::new(raw), 1)
                .unwrap()
                .to_rgb()
        };
        let a = to_rgb(PixelLayout::Nv12, &nv12);
        assert_eq!(a, to_rgb(PixelLayout::Nv21, &nv21));
        assert!(a[0] > 200 && a[2] < 100);
    }
}
