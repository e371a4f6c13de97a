use std::{fmt, num::NonZeroU32, str::FromStr};

/// Four-character code describing a pixel/stream format.
///
/// # Example
/// ```rust
/// use pixpipe_core::prelude::FourCc;
///
/// let fcc = FourCc::new(*b"YU12");
/// assert_eq!(fcc.to_string(), "YU12");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// Construct from raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Little-endian u32 encoding.
    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Try to convert to a printable string.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<u32> for FourCc {
    fn from(value: u32) -> Self {
        Self(value.to_le_bytes())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.as_str() {
            write!(f, "{s}")
        } else {
            write!(f, "0x{:08x}", self.to_u32())
        }
    }
}

impl FromStr for FourCc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 {
            return Err("fourcc must be four ASCII bytes".into());
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(FourCc(arr))
    }
}

/// Frame dimensions in pixels.
///
/// # Example
/// ```rust
/// use pixpipe_core::prelude::Resolution;
///
/// let res = Resolution::new(640, 480).unwrap();
/// assert_eq!(res.width.get(), 640);
/// assert_eq!(res.transposed(), Resolution::new(480, 640).unwrap());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    /// Width in pixels (non-zero).
    pub width: NonZeroU32,
    /// Height in pixels (non-zero).
    pub height: NonZeroU32,
}

impl Resolution {
    /// Create a resolution, returning `None` if width or height are zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    /// Width as `usize`.
    pub fn w(&self) -> usize {
        self.width.get() as usize
    }

    /// Height as `usize`.
    pub fn h(&self) -> usize {
        self.height.get() as usize
    }

    /// Swap width and height (quarter-turn rotations).
    pub fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    /// Whether both dimensions are multiples of the given alignment.
    pub fn is_aligned(&self, (h_align, v_align): (u32, u32)) -> bool {
        self.width.get() % h_align.max(1) == 0 && self.height.get() % v_align.max(1) == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One plane of a planar layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneSpec {
    /// Horizontal subsampling divisor relative to luma.
    pub h_sub: u8,
    /// Vertical subsampling divisor relative to luma.
    pub v_sub: u8,
    /// Bytes stored per plane sample.
    pub bytes_per_sample: u8,
}

const LUMA: PlaneSpec = PlaneSpec {
    h_sub: 1,
    v_sub: 1,
    bytes_per_sample: 1,
};

const CHROMA_420: PlaneSpec = PlaneSpec {
    h_sub: 2,
    v_sub: 2,
    bytes_per_sample: 1,
};

// Interleaved UV/VU pairs at quarter resolution.
const CHROMA_420_PAIRED: PlaneSpec = PlaneSpec {
    h_sub: 2,
    v_sub: 2,
    bytes_per_sample: 2,
};

const PLANES_I420: [PlaneSpec; 3] = [LUMA, CHROMA_420, CHROMA_420];
const PLANES_NV: [PlaneSpec; 2] = [LUMA, CHROMA_420_PAIRED];

/// Byte layout of a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Interleaved components, fixed bytes per pixel.
    Packed { bytes_per_pixel: u8 },
    /// Interleaved 4:2:2 macropixels (two pixels in four bytes).
    Packed422,
    /// Separate component planes stored back to back.
    Planar { planes: &'static [PlaneSpec] },
    /// Variable-length compressed payload.
    Compressed,
}

/// Pixel formats known to the catalog.
///
/// Discriminants are stable and index [`PixelFormat::ALL`].
///
/// # Example
/// ```rust
/// use pixpipe_core::prelude::{FourCc, PixelFormat};
///
/// let fmt = PixelFormat::from_fourcc(FourCc::new(*b"NV12")).unwrap();
/// assert_eq!(fmt, PixelFormat::Nv12);
/// assert_eq!(PixelFormat::from_id(fmt.id()), Some(fmt));
/// assert_eq!(fmt.bits_per_pixel(), 12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PixelFormat {
    Rgb24 = 0,
    Bgr24 = 1,
    Rgb32 = 2,
    Bgr32 = 3,
    Rgb565 = 4,
    Grey = 5,
    Yuyv = 6,
    Yvyu = 7,
    Uyvy = 8,
    Vyuy = 9,
    Yuv420 = 10,
    Yvu420 = 11,
    Nv12 = 12,
    Nv21 = 13,
    Jpeg = 14,
    Mjpeg = 15,
}

/// Byte allowance added to the compressed-size bound for headers and tables.
pub const COMPRESSED_HEADER_ALLOWANCE: usize = 1024;

impl PixelFormat {
    /// Every format in id order.
    pub const ALL: [PixelFormat; 16] = [
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Rgb32,
        PixelFormat::Bgr32,
        PixelFormat::Rgb565,
        PixelFormat::Grey,
        PixelFormat::Yuyv,
        PixelFormat::Yvyu,
        PixelFormat::Uyvy,
        PixelFormat::Vyuy,
        PixelFormat::Yuv420,
        PixelFormat::Yvu420,
        PixelFormat::Nv12,
        PixelFormat::Nv21,
        PixelFormat::Jpeg,
        PixelFormat::Mjpeg,
    ];

    /// Stable small integer identifier.
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Reverse of [`PixelFormat::id`].
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Wire code for the format.
    pub const fn fourcc(self) -> FourCc {
        FourCc::new(match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Bgr24 => *b"BGR3",
            PixelFormat::Rgb32 => *b"RGB4",
            PixelFormat::Bgr32 => *b"BGR4",
            PixelFormat::Rgb565 => *b"RGBP",
            PixelFormat::Grey => *b"GREY",
            PixelFormat::Yuyv => *b"YUYV",
            PixelFormat::Yvyu => *b"YVYU",
            PixelFormat::Uyvy => *b"UYVY",
            PixelFormat::Vyuy => *b"VYUY",
            PixelFormat::Yuv420 => *b"YU12",
            PixelFormat::Yvu420 => *b"YV12",
            PixelFormat::Nv12 => *b"NV12",
            PixelFormat::Nv21 => *b"NV21",
            PixelFormat::Jpeg => *b"JPEG",
            PixelFormat::Mjpeg => *b"MJPG",
        })
    }

    /// Look up a format by wire code.
    pub fn from_fourcc(code: FourCc) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.fourcc() == code)
    }

    /// Short human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
            PixelFormat::Rgb32 => "RGB32",
            PixelFormat::Bgr32 => "BGR32",
            PixelFormat::Rgb565 => "RGB565",
            PixelFormat::Grey => "GREY",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Yvyu => "YVYU",
            PixelFormat::Uyvy => "UYVY",
            PixelFormat::Vyuy => "VYUY",
            PixelFormat::Yuv420 => "YUV420",
            PixelFormat::Yvu420 => "YVU420",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Nv21 => "NV21",
            PixelFormat::Jpeg => "JPEG",
            PixelFormat::Mjpeg => "MJPEG",
        }
    }

    /// Byte layout descriptor.
    pub const fn layout(self) -> Layout {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Layout::Packed { bytes_per_pixel: 3 },
            PixelFormat::Rgb32 | PixelFormat::Bgr32 => Layout::Packed { bytes_per_pixel: 4 },
            PixelFormat::Rgb565 => Layout::Packed { bytes_per_pixel: 2 },
            PixelFormat::Grey => Layout::Packed { bytes_per_pixel: 1 },
            PixelFormat::Yuyv | PixelFormat::Yvyu | PixelFormat::Uyvy | PixelFormat::Vyuy => {
                Layout::Packed422
            }
            PixelFormat::Yuv420 | PixelFormat::Yvu420 => Layout::Planar {
                planes: &PLANES_I420,
            },
            PixelFormat::Nv12 | PixelFormat::Nv21 => Layout::Planar { planes: &PLANES_NV },
            PixelFormat::Jpeg | PixelFormat::Mjpeg => Layout::Compressed,
        }
    }

    /// Average bits per pixel (0 for compressed formats).
    pub fn bits_per_pixel(self) -> u32 {
        match self.layout() {
            Layout::Packed { bytes_per_pixel } => bytes_per_pixel as u32 * 8,
            Layout::Packed422 => 16,
            Layout::Planar { planes } => planes
                .iter()
                .map(|p| p.bytes_per_sample as u32 * 8 / (p.h_sub as u32 * p.v_sub as u32))
                .sum(),
            Layout::Compressed => 0,
        }
    }

    /// Pixel multiples that widths and heights must respect.
    pub fn alignment(self) -> (u32, u32) {
        match self.layout() {
            Layout::Packed422 => (2, 1),
            Layout::Planar { planes } => planes.iter().fold((1, 1), |(h, v), p| {
                (h.max(p.h_sub as u32), v.max(p.v_sub as u32))
            }),
            Layout::Packed { .. } | Layout::Compressed => (1, 1),
        }
    }

    /// Whether the buffer is uncompressed pixel data.
    pub fn is_raw(self) -> bool {
        !matches!(self.layout(), Layout::Compressed)
    }

    /// Required buffer size for the given resolution.
    pub fn buffer_size(self, res: Resolution) -> usize {
        buffer_size(self, res.width.get(), res.height.get())
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(fmt) = PixelFormat::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
        {
            return Ok(fmt);
        }
        let code = FourCc::from_str(s)?;
        PixelFormat::from_fourcc(code).ok_or_else(|| format!("unknown pixel format {s}"))
    }
}

/// Bytes needed to hold one `width` x `height` frame in `format`.
///
/// Planar sizes sum every plane with subsampled dimensions rounded up; for
/// compressed formats this is the worst-case encoder output bound.
///
/// # Example
/// ```rust
/// use pixpipe_core::prelude::{PixelFormat, buffer_size};
///
/// assert_eq!(buffer_size(PixelFormat::Yuv420, 640, 480), 640 * 480 * 3 / 2);
/// assert_eq!(buffer_size(PixelFormat::Yuyv, 640, 480), 640 * 480 * 2);
/// ```
pub fn buffer_size(format: PixelFormat, width: u32, height: u32) -> usize {
    checked_buffer_size(format, width, height).unwrap_or(usize::MAX)
}

/// Like [`buffer_size`] but reports arithmetic overflow as `None`.
pub fn checked_buffer_size(format: PixelFormat, width: u32, height: u32) -> Option<usize> {
    let w = width as usize;
    let h = height as usize;
    match format.layout() {
        Layout::Packed { bytes_per_pixel } => w.checked_mul(h)?.checked_mul(bytes_per_pixel as usize),
        Layout::Packed422 => w.next_multiple_of(2).checked_mul(h)?.checked_mul(2),
        Layout::Planar { planes } => planes.iter().try_fold(0usize, |acc, p| {
            let pw = w.div_ceil(p.h_sub as usize);
            let ph = h.div_ceil(p.v_sub as usize);
            acc.checked_add(pw.checked_mul(ph)?.checked_mul(p.bytes_per_sample as usize)?)
        }),
        Layout::Compressed => w
            .checked_mul(h)?
            .checked_mul(3)?
            .checked_add(COMPRESSED_HEADER_ALLOWANCE),
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for FourCc {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let encoded = self.as_str().unwrap_or("FFFF");
        serializer.serialize_str(encoded)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for FourCc {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        FourCc::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for PixelFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for PixelFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        PixelFormat::from_str(&s).map_err(serde::de::Error::custom)
    }
}
