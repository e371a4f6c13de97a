use std::collections::TryReserveError;
use std::num::NonZeroU32;

use smallvec::{SmallVec, smallvec};

use crate::format::{Layout, PixelFormat, Resolution, buffer_size};

/// Plane descriptor inside a frame buffer.
///
/// `width`/`height` count plane samples, so chroma planes of 4:2:0 formats
/// report half the luma dimensions.
///
/// # Example
/// ```rust
/// use std::num::NonZeroU32;
/// use pixpipe_core::prelude::plane_layout_from_dims;
///
/// let layout = plane_layout_from_dims(
///     NonZeroU32::new(4).unwrap(),
///     NonZeroU32::new(4).unwrap(),
///     3,
/// );
/// assert_eq!(layout.stride, 12);
/// assert_eq!(layout.len, 48);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Byte offset into the owning buffer.
    pub offset: usize,
    /// Length of the plane in bytes.
    pub len: usize,
    /// Stride in bytes.
    pub stride: usize,
    /// Samples per row.
    pub width: usize,
    /// Rows.
    pub height: usize,
}

impl PlaneLayout {
    /// Bytes per plane sample (0 for compressed payloads).
    pub fn bytes_per_sample(&self) -> usize {
        self.stride.checked_div(self.width).unwrap_or(0)
    }

    /// Byte range covered by this plane.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Byte offset of sample `(x, y)` relative to the start of the buffer.
    #[inline(always)]
    pub fn sample_offset(&self, x: usize, y: usize) -> usize {
        self.offset + y * self.stride + x * self.bytes_per_sample()
    }
}

/// Helper for building a tightly packed single-plane geometry.
pub fn plane_layout_from_dims(
    width: NonZeroU32,
    height: NonZeroU32,
    bytes_per_pixel: usize,
) -> PlaneLayout {
    let stride = width.get() as usize * bytes_per_pixel;
    let len = stride * height.get() as usize;
    PlaneLayout {
        offset: 0,
        len,
        stride,
        width: width.get() as usize,
        height: height.get() as usize,
    }
}

/// Plane descriptors for a tightly packed frame of `format` at `res`.
///
/// Packed formats yield one plane whose samples are whole pixels (4:2:2
/// macropixels count as two 2-byte samples). Compressed formats yield one
/// opaque plane covering the size bound.
///
/// # Example
/// ```rust
/// use pixpipe_core::prelude::{PixelFormat, Resolution, plane_layouts};
///
/// let planes = plane_layouts(PixelFormat::Yuv420, Resolution::new(4, 2).unwrap());
/// assert_eq!(planes.len(), 3);
/// assert_eq!(planes[1].offset, 8);
/// assert_eq!((planes[2].width, planes[2].height), (2, 1));
/// ```
pub fn plane_layouts(format: PixelFormat, res: Resolution) -> SmallVec<[PlaneLayout; 3]> {
    let (w, h) = (res.w(), res.h());
    match format.layout() {
        Layout::Packed { bytes_per_pixel } => {
            smallvec![plane_layout_from_dims(res.width, res.height, bytes_per_pixel as usize)]
        }
        Layout::Packed422 => smallvec![PlaneLayout {
            offset: 0,
            len: w.next_multiple_of(2) * 2 * h,
            stride: w.next_multiple_of(2) * 2,
            width: w.next_multiple_of(2),
            height: h,
        }],
        Layout::Planar { planes } => {
            let mut offset = 0;
            planes
                .iter()
                .map(|p| {
                    let width = w.div_ceil(p.h_sub as usize);
                    let height = h.div_ceil(p.v_sub as usize);
                    let stride = width * p.bytes_per_sample as usize;
                    let layout = PlaneLayout {
                        offset,
                        len: stride * height,
                        stride,
                        width,
                        height,
                    };
                    offset += layout.len;
                    layout
                })
                .collect()
        }
        Layout::Compressed => smallvec![PlaneLayout {
            offset: 0,
            len: buffer_size(format, res.width.get(), res.height.get()),
            stride: 0,
            width: w,
            height: h,
        }],
    }
}

const CANARY: u8 = 0xA5;

/// Fixed-capacity scratch buffer reused across frames.
///
/// Optional canary bytes past `capacity` let tests prove kernels never write
/// beyond the size computed at construction.
///
/// # Example
/// ```rust
/// use pixpipe_core::prelude::ScratchBuffer;
///
/// let mut scratch = ScratchBuffer::try_new(8, 4).unwrap();
/// scratch.as_mut_slice().fill(1);
/// assert_eq!(scratch.capacity(), 8);
/// assert!(scratch.intact());
/// ```
#[derive(Debug, Default)]
pub struct ScratchBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl ScratchBuffer {
    /// Allocate `capacity` usable bytes followed by `canary` guard bytes.
    pub fn try_new(capacity: usize, canary: usize) -> Result<Self, TryReserveError> {
        let total = capacity.saturating_add(canary);
        let mut buf = Vec::new();
        buf.try_reserve_exact(total)?;
        buf.resize(capacity, 0);
        buf.resize(total, CANARY);
        Ok(Self { buf, capacity })
    }

    /// Usable bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Guard bytes following the usable region.
    pub fn canary_len(&self) -> usize {
        self.buf.len() - self.capacity
    }

    /// Usable region.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.capacity]
    }

    /// Mutable usable region; the canary tail is never exposed.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[..self.capacity]
    }

    /// Whether every canary byte still holds its sentinel value.
    pub fn intact(&self) -> bool {
        self.buf[self.capacity..].iter().all(|b| *b == CANARY)
    }

    /// Free the backing memory.
    pub fn release(&mut self) {
        self.buf = Vec::new();
        self.capacity = 0;
    }
}
