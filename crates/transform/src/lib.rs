#![doc = include_str!("../README.md")]

use std::fmt;
use std::ops::BitOr;

use pixpipe_core::prelude::*;

pub mod builtin;
#[cfg(feature = "image")]
pub mod jpeg;
pub mod primitive;
pub mod registry;

/// Operation family a prototype belongs to.
///
/// # Example
/// ```rust
/// use pixpipe_transform::Family;
///
/// assert!(Family::Rotate90.is_geometric());
/// assert_eq!(Family::HFlip.to_string(), "hflip");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Family {
    /// Direct copy, source and destination formats are equal.
    Identity,
    /// Pixel encoding change without geometric effect.
    FormatConversion,
    /// Remove margins from each edge.
    Crop,
    /// Reframe with signed margins; uncovered pixels take the fill value.
    Pad,
    /// Rational resize.
    Scale,
    /// Quarter turn (90 or 270 degrees).
    Rotate90,
    /// Half turn.
    Rotate180,
    /// Mirror left-right.
    HFlip,
    /// Mirror top-bottom.
    VFlip,
}

impl Family {
    pub const ALL: [Family; 9] = [
        Family::Identity,
        Family::FormatConversion,
        Family::Crop,
        Family::Pad,
        Family::Scale,
        Family::Rotate90,
        Family::Rotate180,
        Family::HFlip,
        Family::VFlip,
    ];

    /// Stable lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Family::Identity => "identity",
            Family::FormatConversion => "format",
            Family::Crop => "crop",
            Family::Pad => "pad",
            Family::Scale => "scale",
            Family::Rotate90 => "rotate90",
            Family::Rotate180 => "rotate180",
            Family::HFlip => "hflip",
            Family::VFlip => "vflip",
        }
    }

    /// Whether the family changes pixel geometry.
    pub fn is_geometric(self) -> bool {
        !matches!(self, Family::Identity | Family::FormatConversion)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Colorspace conversion accuracy tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum QualityTier {
    /// Shift-and-add approximation.
    Fast,
    /// Integer multiply approximation.
    Integer,
    /// 10-bit fixed point with rounding.
    FixedPoint,
    /// Single-precision floating point.
    #[default]
    Float,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [
        QualityTier::Fast,
        QualityTier::Integer,
        QualityTier::FixedPoint,
        QualityTier::Float,
    ];

    /// Variant flag carried by prototypes of this tier.
    pub fn flags(self) -> VariantFlags {
        match self {
            QualityTier::Fast => VariantFlags::FAST,
            QualityTier::Integer => VariantFlags::INTEGER,
            QualityTier::FixedPoint => VariantFlags::FIXED_POINT,
            QualityTier::Float => VariantFlags::FLOAT,
        }
    }
}

/// Option flags that disambiguate prototypes sharing `(family, src, dst)`.
///
/// # Example
/// ```rust
/// use pixpipe_transform::{QualityTier, VariantFlags};
///
/// let flags = VariantFlags::FIXED_POINT | VariantFlags::EXTERNAL;
/// assert!(flags.contains(VariantFlags::EXTERNAL));
/// assert_eq!(flags.tier(), Some(QualityTier::FixedPoint));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct VariantFlags(u32);

impl VariantFlags {
    pub const NONE: VariantFlags = VariantFlags(0);
    pub const FAST: VariantFlags = VariantFlags(1 << 0);
    pub const INTEGER: VariantFlags = VariantFlags(1 << 1);
    pub const FIXED_POINT: VariantFlags = VariantFlags(1 << 2);
    pub const FLOAT: VariantFlags = VariantFlags(1 << 3);
    /// Contributed by a provider outside the built-in set.
    pub const EXTERNAL: VariantFlags = VariantFlags(1 << 8);

    const TIER_MASK: u32 = 0b1111;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set in `self`.
    pub const fn contains(self, other: VariantFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Quality tier encoded in the flags, if exactly one tier bit is set.
    pub fn tier(self) -> Option<QualityTier> {
        match self.0 & Self::TIER_MASK {
            b if b == Self::FAST.0 => Some(QualityTier::Fast),
            b if b == Self::INTEGER.0 => Some(QualityTier::Integer),
            b if b == Self::FIXED_POINT.0 => Some(QualityTier::FixedPoint),
            b if b == Self::FLOAT.0 => Some(QualityTier::Float),
            _ => None,
        }
    }
}

impl BitOr for VariantFlags {
    type Output = VariantFlags;

    fn bitor(self, rhs: VariantFlags) -> VariantFlags {
        VariantFlags(self.0 | rhs.0)
    }
}

/// Estimated per-pixel CPU cost and multiplicative quality factor of a stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    /// Relative CPU cost in per-pixel units.
    pub cpu_cost: u32,
    /// Fraction of fidelity kept, in `(0, 1]`.
    pub quality: f32,
}

impl CostEstimate {
    pub const fn new(cpu_cost: u32, quality: f32) -> Self {
        Self { cpu_cost, quality }
    }

    /// Whether `quality` lies in `(0, 1]`.
    pub fn is_valid(&self) -> bool {
        self.quality > 0.0 && self.quality <= 1.0
    }
}

/// Signed per-edge margins; positive values remove pixels, negative values add them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Margins {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

impl Margins {
    pub fn is_zero(&self) -> bool {
        *self == Margins::default()
    }

    /// No edge grows the frame.
    pub fn is_crop(&self) -> bool {
        self.top >= 0 && self.left >= 0 && self.bottom >= 0 && self.right >= 0
    }

    /// Every margin is a multiple of the alignment on its axis.
    pub fn is_aligned(&self, (h_align, v_align): (u32, u32)) -> bool {
        let h = h_align.max(1) as i32;
        let v = v_align.max(1) as i32;
        self.left % h == 0 && self.right % h == 0 && self.top % v == 0 && self.bottom % v == 0
    }

    /// Frame size after applying the margins to `input`.
    pub fn apply(&self, input: Resolution) -> Option<Resolution> {
        let w = input.width.get() as i64 - self.left as i64 - self.right as i64;
        let h = input.height.get() as i64 - self.top as i64 - self.bottom as i64;
        Resolution::new(u32::try_from(w).ok()?, u32::try_from(h).ok()?)
    }
}

/// Reduced scale fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaleRatio {
    pub num: u32,
    pub den: u32,
}

impl ScaleRatio {
    pub const ONE: ScaleRatio = ScaleRatio { num: 1, den: 1 };

    /// Reduce `num/den` to lowest terms; `None` when either term is zero.
    ///
    /// # Example
    /// ```rust
    /// use pixpipe_transform::ScaleRatio;
    ///
    /// assert_eq!(ScaleRatio::reduced(4, 8), ScaleRatio::reduced(1, 2));
    /// assert!(ScaleRatio::reduced(0, 3).is_none());
    /// ```
    pub fn reduced(num: u32, den: u32) -> Option<Self> {
        if num == 0 || den == 0 {
            return None;
        }
        let g = gcd(num, den);
        Some(Self {
            num: num / g,
            den: den / g,
        })
    }

    pub fn is_identity(&self) -> bool {
        self.num == self.den
    }

    /// Scaled extent, rounded down.
    pub fn apply_extent(&self, extent: u32) -> u32 {
        (extent as u64 * self.num as u64 / self.den as u64).min(u32::MAX as u64) as u32
    }

    /// Scaled resolution; `None` if a dimension collapses to zero.
    pub fn apply(&self, input: Resolution) -> Option<Resolution> {
        Resolution::new(
            self.apply_extent(input.width.get()),
            self.apply_extent(input.height.get()),
        )
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Operation parameters for one stage, tagged by family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageOp {
    Copy,
    Convert,
    Crop(Margins),
    Pad(Margins),
    Scale(ScaleRatio),
    Rotate90 { clockwise: bool },
    Rotate180,
    HFlip,
    VFlip,
}

impl StageOp {
    pub fn family(&self) -> Family {
        match self {
            StageOp::Copy => Family::Identity,
            StageOp::Convert => Family::FormatConversion,
            StageOp::Crop(_) => Family::Crop,
            StageOp::Pad(_) => Family::Pad,
            StageOp::Scale(_) => Family::Scale,
            StageOp::Rotate90 { .. } => Family::Rotate90,
            StageOp::Rotate180 => Family::Rotate180,
            StageOp::HFlip => Family::HFlip,
            StageOp::VFlip => Family::VFlip,
        }
    }

    /// Output resolution this operation produces from `input`.
    pub fn output_for(&self, input: Resolution) -> Option<Resolution> {
        match self {
            StageOp::Copy
            | StageOp::Convert
            | StageOp::Rotate180
            | StageOp::HFlip
            | StageOp::VFlip => Some(input),
            StageOp::Crop(m) | StageOp::Pad(m) => m.apply(input),
            StageOp::Scale(ratio) => ratio.apply(input),
            StageOp::Rotate90 { .. } => Some(input.transposed()),
        }
    }
}

/// Concrete parameters a prototype is estimated and bound against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageSpec {
    pub src: PixelFormat,
    pub dst: PixelFormat,
    pub input: Resolution,
    pub output: Resolution,
    pub op: StageOp,
    pub flags: VariantFlags,
}

impl StageSpec {
    /// Build a spec whose output resolution is derived from `op`.
    pub fn new(
        src: PixelFormat,
        dst: PixelFormat,
        input: Resolution,
        op: StageOp,
    ) -> Result<Self, TransformError> {
        let output = op.output_for(input).ok_or_else(|| {
            TransformError::InvalidParameters(format!("{op:?} collapses {input}"))
        })?;
        Ok(Self {
            src,
            dst,
            input,
            output,
            op,
            flags: VariantFlags::NONE,
        })
    }

    pub fn with_flags(mut self, flags: VariantFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Input buffer size in bytes.
    pub fn src_len(&self) -> Result<usize, TransformError> {
        checked_buffer_size(self.src, self.input.width.get(), self.input.height.get())
            .ok_or(TransformError::SizeOverflow(self.src))
    }

    /// Output buffer size in bytes.
    pub fn dst_len(&self) -> Result<usize, TransformError> {
        checked_buffer_size(self.dst, self.output.width.get(), self.output.height.get())
            .ok_or(TransformError::SizeOverflow(self.dst))
    }

    /// Reject specs whose output disagrees with the operation.
    pub fn validate(&self) -> Result<(), TransformError> {
        if self.op.output_for(self.input) != Some(self.output) {
            return Err(TransformError::InvalidParameters(format!(
                "{:?} maps {} to {:?}, not {}",
                self.op,
                self.input,
                self.op.output_for(self.input),
                self.output
            )));
        }
        Ok(())
    }
}

/// Errors raised while estimating, binding or running a transform.
///
/// # Example
/// ```rust
/// use pixpipe_core::prelude::PixelFormat;
/// use pixpipe_transform::{Family, TransformError};
///
/// let err = TransformError::UnsupportedFormat {
///     family: Family::Rotate90,
///     src: PixelFormat::Yuyv,
///     dst: PixelFormat::Yuyv,
/// };
/// assert_eq!(err.code(), "unsupported_format");
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("{family} does not support {src} -> {dst}")]
    UnsupportedFormat {
        family: Family,
        src: PixelFormat,
        dst: PixelFormat,
    },
    #[error("{format} cannot be processed at {input} -> {output}")]
    UnsupportedDimensions {
        format: PixelFormat,
        input: Resolution,
        output: Resolution,
    },
    #[error("invalid stage parameters: {0}")]
    InvalidParameters(String),
    #[error("{what} buffer too short: need {needed} bytes, got {actual}")]
    BufferTooShort {
        what: &'static str,
        needed: usize,
        actual: usize,
    },
    #[error("{0} buffer size overflow")]
    SizeOverflow(PixelFormat),
    #[error("transform construction failed: {0}")]
    Construction(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("transform already released")]
    Released,
}

impl TransformError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            TransformError::UnsupportedFormat { .. } => "unsupported_format",
            TransformError::UnsupportedDimensions { .. } => "unsupported_dimensions",
            TransformError::InvalidParameters(_) => "invalid_parameters",
            TransformError::BufferTooShort { .. } => "buffer_too_short",
            TransformError::SizeOverflow(_) => "size_overflow",
            TransformError::Construction(_) => "construction_failed",
            TransformError::Encode(_) => "encode_failed",
            TransformError::Decode(_) => "decode_failed",
            TransformError::Released => "released",
        }
    }
}

/// Unbound half of a prototype: prices and instantiates stages.
///
/// # Example
/// ```rust
/// use pixpipe_transform::prelude::*;
///
/// struct Invert;
///
/// struct BoundInvert { len: usize }
///
/// impl BoundTransform for BoundInvert {
///     fn src_len(&self) -> usize { self.len }
///     fn dst_len(&self) -> usize { self.len }
///     fn apply(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
///         for (d, s) in dst[..self.len].iter_mut().zip(&src[..self.len]) {
///             *d = 255 - *s;
///         }
///         Ok(self.len)
///     }
///     fn release(&mut self) {}
/// }
///
/// impl TransformFactory for Invert {
///     fn estimate(&self, _spec: &StageSpec) -> Result<CostEstimate, TransformError> {
///         Ok(CostEstimate::new(1, 1.0))
///     }
///     fn bind(&self, spec: &StageSpec) -> Result<Box<dyn BoundTransform>, TransformError> {
///         Ok(Box::new(BoundInvert { len: spec.src_len()? }))
///     }
/// }
/// ```
pub trait TransformFactory: Send + Sync + 'static {
    /// Price a stage without allocating.
    fn estimate(&self, spec: &StageSpec) -> Result<CostEstimate, TransformError>;

    /// Instantiate the stage for concrete dimensions.
    fn bind(&self, spec: &StageSpec) -> Result<Box<dyn BoundTransform>, TransformError>;
}

/// A prototype instantiated for one stage of a pipeline.
pub trait BoundTransform: Send {
    /// Bytes a full input frame occupies (upper bound for compressed input).
    fn src_len(&self) -> usize;

    /// Bytes the output may occupy (upper bound for compressed output).
    fn dst_len(&self) -> usize;

    /// Convert one frame, returning the bytes written to `dst`.
    fn apply(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError>;

    /// Drop per-instance state. Called once by the owning pipeline; must tolerate repeats.
    fn release(&mut self);
}

/// Static description of a registered prototype.
///
/// # Example
/// ```rust
/// use pixpipe_core::prelude::PixelFormat;
/// use pixpipe_transform::{Family, PrototypeDescriptor, VariantFlags};
///
/// let desc = PrototypeDescriptor::new(Family::HFlip, PixelFormat::Rgb24, PixelFormat::Rgb24, "hflip")
///     .impl_name("scalar")
///     .flags(VariantFlags::NONE);
/// assert_eq!(desc.impl_name, "scalar");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PrototypeDescriptor {
    pub family: Family,
    pub src: PixelFormat,
    pub dst: PixelFormat,
    pub flags: VariantFlags,
    /// Operation name (e.g. "yuv420-to-rgb24").
    pub name: &'static str,
    /// Implementation/backend identifier (e.g. "scalar", "jpeg-encoder").
    pub impl_name: &'static str,
}

impl PrototypeDescriptor {
    pub fn new(family: Family, src: PixelFormat, dst: PixelFormat, name: &'static str) -> Self {
        Self {
            family,
            src,
            dst,
            flags: VariantFlags::NONE,
            name,
            impl_name: "scalar",
        }
    }

    pub fn flags(mut self, flags: VariantFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn impl_name(mut self, impl_name: &'static str) -> Self {
        self.impl_name = impl_name;
        self
    }
}

pub mod prelude {
    #[cfg(feature = "image")]
    pub use crate::jpeg::{JpegDecoderFactory, JpegEncoderFactory};
    pub use crate::{
        BoundTransform, CostEstimate, Family, Margins, PrototypeDescriptor, QualityTier,
        ScaleRatio, StageOp, StageSpec, TransformError, TransformFactory, VariantFlags,
        builtin::register_builtin,
        primitive::{BoundPrimitive, Conversion, PrimitiveFactory},
        registry::{Prototype, PrototypeId, RegistryBuilder, RegistryError, TransformRegistry},
    };
    pub use pixpipe_core::prelude::*;
}
