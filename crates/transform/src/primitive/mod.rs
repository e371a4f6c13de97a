//! Built-in CPU kernels and the factory that prices and binds them.
//!
//! Every primitive is a tagged [`Kernel`] variant carrying exactly the
//! parameters its apply function needs. Plane addressing goes through
//! [`PlaneLayout`] descriptors computed once at bind time.

mod colorspace;
mod geometry;
mod packed;

use pixpipe_core::prelude::*;
use smallvec::SmallVec;

use crate::{
    BoundTransform, CostEstimate, Family, PrototypeDescriptor, QualityTier, StageOp, StageSpec,
    TransformError, TransformFactory,
};

pub use colorspace::YuvSource;
pub use packed::PackedOrder;

/// Pixel-encoding change implemented by a built-in kernel.
///
/// # Example
/// ```rust
/// use pixpipe_core::prelude::PixelFormat;
/// use pixpipe_transform::primitive::{Conversion, PackedOrder};
///
/// let conv = Conversion::between(PixelFormat::Uyvy, PixelFormat::Yvu420).unwrap();
/// assert_eq!(conv, Conversion::PackedToYuv420 { order: PackedOrder::Uyvy, yvu: true });
/// assert!(Conversion::between(PixelFormat::Grey, PixelFormat::Nv12).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// RGB24 <-> BGR24.
    SwapRgb24,
    /// RGB32 <-> BGR32, alpha kept.
    SwapRgb32,
    /// 32-bit to 24-bit, optionally swapping red and blue.
    StripAlpha { swap: bool },
    /// 24-bit to 32-bit with opaque alpha, optionally swapping red and blue.
    AddAlpha { swap: bool },
    Rgb565ToRgb24 { bgr: bool },
    GreyToRgb,
    GreyToYuv420,
    RgbToGrey { bgr: bool },
    RgbToYuv420 { bgr: bool, yvu: bool },
    /// Luma plane of a 4:2:0 frame.
    LumaFromPlanar,
    LumaFromPacked(PackedOrder),
    PackedToYuv420 { order: PackedOrder, yvu: bool },
    /// YUV420 <-> YVU420.
    SwapChromaPlanes,
    NvToYuv420 { nv21: bool, yvu: bool },
    Yuv420ToNv { yvu: bool, nv21: bool },
    /// Tiered colorspace conversion to 24-bit RGB.
    YuvToRgb { source: YuvSource, bgr: bool },
}

impl Conversion {
    /// Kernel converting `src` into `dst`, if one exists.
    pub fn between(src: PixelFormat, dst: PixelFormat) -> Option<Self> {
        use PixelFormat::*;

        let conv = match (src, dst) {
            (Rgb24, Bgr24) | (Bgr24, Rgb24) => Conversion::SwapRgb24,
            (Rgb32, Bgr32) | (Bgr32, Rgb32) => Conversion::SwapRgb32,
            (Rgb32, Rgb24) | (Bgr32, Bgr24) => Conversion::StripAlpha { swap: false },
            (Rgb32, Bgr24) | (Bgr32, Rgb24) => Conversion::StripAlpha { swap: true },
            (Rgb24, Rgb32) | (Bgr24, Bgr32) => Conversion::AddAlpha { swap: false },
            (Rgb24, Bgr32) | (Bgr24, Rgb32) => Conversion::AddAlpha { swap: true },
            (Rgb565, Rgb24 | Bgr24) => Conversion::Rgb565ToRgb24 { bgr: dst == Bgr24 },
            (Grey, Rgb24 | Bgr24) => Conversion::GreyToRgb,
            (Grey, Yuv420 | Yvu420) => Conversion::GreyToYuv420,
            (Rgb24 | Bgr24, Grey) => Conversion::RgbToGrey { bgr: src == Bgr24 },
            (Rgb24 | Bgr24, Yuv420 | Yvu420) => Conversion::RgbToYuv420 {
                bgr: src == Bgr24,
                yvu: dst == Yvu420,
            },
            (Yuv420 | Yvu420 | Nv12 | Nv21, Grey) => Conversion::LumaFromPlanar,
            (Yuv420, Yvu420) | (Yvu420, Yuv420) => Conversion::SwapChromaPlanes,
            (Nv12 | Nv21, Yuv420 | Yvu420) => Conversion::NvToYuv420 {
                nv21: src == Nv21,
                yvu: dst == Yvu420,
            },
            (Yuv420 | Yvu420, Nv12 | Nv21) => Conversion::Yuv420ToNv {
                yvu: src == Yvu420,
                nv21: dst == Nv21,
            },
            _ => match (PackedOrder::of(src), YuvSource::of(src), dst) {
                (Some(order), _, Grey) => Conversion::LumaFromPacked(order),
                (Some(order), _, Yuv420 | Yvu420) => Conversion::PackedToYuv420 {
                    order,
                    yvu: dst == Yvu420,
                },
                (_, Some(source), Rgb24 | Bgr24) => Conversion::YuvToRgb {
                    source,
                    bgr: dst == Bgr24,
                },
                _ => return None,
            },
        };
        Some(conv)
    }

    /// Whether the kernel comes in one variant per [`QualityTier`].
    pub fn is_tiered(self) -> bool {
        matches!(self, Conversion::YuvToRgb { .. })
    }

    /// Operation name used for registered prototypes.
    pub fn name(self) -> &'static str {
        match self {
            Conversion::SwapRgb24 | Conversion::SwapRgb32 => "swap-rb",
            Conversion::StripAlpha { .. } => "strip-alpha",
            Conversion::AddAlpha { .. } => "add-alpha",
            Conversion::Rgb565ToRgb24 { .. } => "rgb565-expand",
            Conversion::GreyToRgb => "grey-expand",
            Conversion::GreyToYuv420 => "grey-to-yuv420",
            Conversion::RgbToGrey { .. } => "rgb-to-grey",
            Conversion::RgbToYuv420 { .. } => "rgb-to-yuv420",
            Conversion::LumaFromPlanar | Conversion::LumaFromPacked(_) => "luma-extract",
            Conversion::PackedToYuv420 { .. } => "yuv422-to-yuv420",
            Conversion::SwapChromaPlanes => "swap-chroma",
            Conversion::NvToYuv420 { .. } => "nv-deinterleave",
            Conversion::Yuv420ToNv { .. } => "nv-interleave",
            Conversion::YuvToRgb { .. } => "yuv-to-rgb",
        }
    }

    /// Per-pixel cost and retained quality.
    pub fn estimate(self, tier: QualityTier) -> CostEstimate {
        match self {
            Conversion::SwapRgb24
            | Conversion::SwapRgb32
            | Conversion::StripAlpha { .. }
            | Conversion::AddAlpha { .. }
            | Conversion::SwapChromaPlanes
            | Conversion::GreyToRgb => CostEstimate::new(2, 1.0),
            Conversion::Rgb565ToRgb24 { .. } => CostEstimate::new(3, 1.0),
            Conversion::GreyToYuv420
            | Conversion::NvToYuv420 { .. }
            | Conversion::Yuv420ToNv { .. } => CostEstimate::new(3, 1.0),
            Conversion::LumaFromPlanar | Conversion::LumaFromPacked(_) => {
                CostEstimate::new(1, 0.5)
            }
            Conversion::RgbToGrey { .. } => CostEstimate::new(4, 0.5),
            Conversion::PackedToYuv420 { .. } => CostEstimate::new(3, 0.9),
            Conversion::RgbToYuv420 { .. } => CostEstimate::new(10, 0.9),
            Conversion::YuvToRgb { .. } => match tier {
                QualityTier::Float => CostEstimate::new(12, 1.0),
                QualityTier::FixedPoint => CostEstimate::new(8, 0.995),
                QualityTier::Integer => CostEstimate::new(6, 0.99),
                QualityTier::Fast => CostEstimate::new(4, 0.97),
            },
        }
    }

    fn run(self, tier: QualityTier, src: &[u8], dst: &mut [u8], res: Resolution) {
        let pixels = res.w() * res.h();
        match self {
            Conversion::SwapRgb24 => packed::swap_rb(3, &src[..pixels * 3], dst),
            Conversion::SwapRgb32 => packed::swap_rb(4, &src[..pixels * 4], dst),
            Conversion::StripAlpha { swap } => packed::strip_alpha(swap, &src[..pixels * 4], dst),
            Conversion::AddAlpha { swap } => packed::add_alpha(swap, &src[..pixels * 3], dst),
            Conversion::Rgb565ToRgb24 { bgr } => packed::rgb565_to_rgb24(bgr, &src[..pixels * 2], dst),
            Conversion::GreyToRgb => packed::grey_to_rgb(&src[..pixels], dst),
            Conversion::GreyToYuv420 => packed::grey_to_yuv420(&src[..pixels], dst),
            Conversion::RgbToGrey { bgr } => colorspace::rgb_to_grey(bgr, src, dst, res),
            Conversion::RgbToYuv420 { bgr, yvu } => colorspace::rgb_to_yuv420(bgr, yvu, src, dst, res),
            Conversion::LumaFromPlanar => dst[..pixels].copy_from_slice(&src[..pixels]),
            Conversion::LumaFromPacked(order) => packed::luma_from_packed(order, &src[..pixels * 2], dst),
            Conversion::PackedToYuv420 { order, yvu } => {
                packed::packed_to_yuv420(order, yvu, src, dst, res)
            }
            Conversion::SwapChromaPlanes => packed::swap_chroma_planes(src, dst, res),
            Conversion::NvToYuv420 { nv21, yvu } => packed::nv_to_yuv420(nv21, yvu, src, dst, res),
            Conversion::Yuv420ToNv { yvu, nv21 } => packed::yuv420_to_nv(yvu, nv21, src, dst, res),
            Conversion::YuvToRgb { source, bgr } => {
                colorspace::yuv_to_rgb(source, tier, bgr, src, dst, res)
            }
        }
    }
}

/// Run `f(row_index, row)` over every `row_len`-byte row of `dst`.
///
/// Rows are processed on the rayon pool when the `parallel` feature is on; the
/// call returns only after every row is written.
pub(crate) fn for_each_row<F>(dst: &mut [u8], row_len: usize, f: F)
where
    F: Fn(usize, &mut [u8]) + Send + Sync,
{
    if row_len == 0 {
        return;
    }
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        dst.par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, line)| f(y, line));
    }
    #[cfg(not(feature = "parallel"))]
    {
        dst.chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, line)| f(y, line));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FactoryKind {
    Identity,
    Conversion(Conversion),
    Geometry(Family),
}

/// Factory for every built-in kernel.
///
/// # Example
/// ```rust
/// use pixpipe_transform::prelude::*;
///
/// let factory = PrimitiveFactory::conversion(
///     Conversion::between(PixelFormat::Rgb24, PixelFormat::Bgr24).unwrap(),
/// );
/// let spec = StageSpec::new(
///     PixelFormat::Rgb24,
///     PixelFormat::Bgr24,
///     Resolution::new(1, 1).unwrap(),
///     StageOp::Convert,
/// )
/// .unwrap();
/// let mut bound = factory.bind(&spec).unwrap();
/// let mut out = [0u8; 3];
/// assert_eq!(bound.apply(&[1, 2, 3], &mut out).unwrap(), 3);
/// assert_eq!(out, [3, 2, 1]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveFactory {
    kind: FactoryKind,
}

impl PrimitiveFactory {
    /// Byte-for-byte copy.
    pub fn identity() -> Self {
        Self {
            kind: FactoryKind::Identity,
        }
    }

    pub fn conversion(conversion: Conversion) -> Self {
        Self {
            kind: FactoryKind::Conversion(conversion),
        }
    }

    /// Geometry kernel for a geometric family (format preserved).
    pub fn geometry(family: Family) -> Self {
        Self {
            kind: FactoryKind::Geometry(family),
        }
    }

    /// Built-in factory able to serve `descriptor`, if any.
    pub fn for_descriptor(descriptor: &PrototypeDescriptor) -> Option<Self> {
        let (src, dst) = (descriptor.src, descriptor.dst);
        match descriptor.family {
            Family::Identity => (src == dst).then(Self::identity),
            Family::FormatConversion => Conversion::between(src, dst).map(Self::conversion),
            family => (src == dst && geometry::supports(src)).then(|| Self::geometry(family)),
        }
    }

    fn prepare(&self, spec: &StageSpec) -> Result<(Kernel, CostEstimate), TransformError> {
        spec.validate()?;
        let family = spec.op.family();
        let expected = match self.kind {
            FactoryKind::Identity => Family::Identity,
            FactoryKind::Conversion(_) => Family::FormatConversion,
            FactoryKind::Geometry(f) => f,
        };
        if family != expected {
            return Err(TransformError::InvalidParameters(format!(
                "{expected} factory cannot run a {family} stage"
            )));
        }
        let unsupported = || TransformError::UnsupportedFormat {
            family,
            src: spec.src,
            dst: spec.dst,
        };
        match self.kind {
            FactoryKind::Identity => {
                if spec.src != spec.dst {
                    return Err(unsupported());
                }
                let kernel = Kernel::Copy {
                    variable: !spec.src.is_raw(),
                };
                Ok((kernel, CostEstimate::new(1, 1.0)))
            }
            FactoryKind::Conversion(conversion) => {
                if Conversion::between(spec.src, spec.dst) != Some(conversion) {
                    return Err(unsupported());
                }
                check_aligned(spec.src, spec)?;
                check_aligned(spec.dst, spec)?;
                let tier = if conversion.is_tiered() {
                    spec.flags.tier().unwrap_or_default()
                } else {
                    QualityTier::default()
                };
                let kernel = Kernel::Convert {
                    conversion,
                    tier,
                    res: spec.input,
                };
                Ok((kernel, conversion.estimate(tier)))
            }
            FactoryKind::Geometry(_) => {
                if spec.src != spec.dst || !geometry::supports(spec.src) {
                    return Err(unsupported());
                }
                check_aligned(spec.src, spec)?;
                if let StageOp::Crop(m) | StageOp::Pad(m) = spec.op {
                    let aligned = m.is_aligned(spec.src.alignment());
                    let shape_ok = match spec.op {
                        StageOp::Crop(_) => m.is_crop(),
                        _ => !m.is_crop(),
                    };
                    if !aligned {
                        return Err(unsupported_dims(spec));
                    }
                    if !shape_ok {
                        return Err(TransformError::InvalidParameters(format!(
                            "{family} cannot apply margins {m:?}"
                        )));
                    }
                }
                let planes = geometry::plane_maps(spec.src, spec.input, spec.output);
                let kernel = Kernel::Geometry {
                    op: spec.op,
                    planes,
                };
                Ok((kernel, geometry_cost(spec.src, spec.op)))
            }
        }
    }
}

fn unsupported_dims(spec: &StageSpec) -> TransformError {
    TransformError::UnsupportedDimensions {
        format: spec.src,
        input: spec.input,
        output: spec.output,
    }
}

fn check_aligned(format: PixelFormat, spec: &StageSpec) -> Result<(), TransformError> {
    let align = format.alignment();
    if spec.input.is_aligned(align) && spec.output.is_aligned(align) {
        Ok(())
    } else {
        Err(TransformError::UnsupportedDimensions {
            format,
            input: spec.input,
            output: spec.output,
        })
    }
}

fn geometry_cost(format: PixelFormat, op: StageOp) -> CostEstimate {
    let base = (format.bits_per_pixel() / 4).max(1);
    let cost = match op {
        StageOp::Rotate90 { .. } => base * 2,
        StageOp::Scale(_) => base + 1,
        _ => base,
    };
    CostEstimate::new(cost, 1.0)
}

impl TransformFactory for PrimitiveFactory {
    fn estimate(&self, spec: &StageSpec) -> Result<CostEstimate, TransformError> {
        self.prepare(spec).map(|(_, cost)| cost)
    }

    fn bind(&self, spec: &StageSpec) -> Result<Box<dyn BoundTransform>, TransformError> {
        let (kernel, _) = self.prepare(spec)?;
        Ok(Box::new(BoundPrimitive {
            kernel,
            src_len: spec.src_len()?,
            dst_len: spec.dst_len()?,
            released: false,
        }))
    }
}

#[derive(Debug, Clone)]
enum Kernel {
    /// `variable` inputs (compressed payloads) copy only the bytes supplied.
    Copy { variable: bool },
    Convert {
        conversion: Conversion,
        tier: QualityTier,
        res: Resolution,
    },
    Geometry {
        op: StageOp,
        planes: SmallVec<[geometry::PlaneMap; 3]>,
    },
}

/// A built-in kernel bound to concrete frame sizes.
#[derive(Debug)]
pub struct BoundPrimitive {
    kernel: Kernel,
    src_len: usize,
    dst_len: usize,
    released: bool,
}

impl BoundTransform for BoundPrimitive {
    fn src_len(&self) -> usize {
        self.src_len
    }

    fn dst_len(&self) -> usize {
        self.dst_len
    }

    fn apply(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
        if self.released {
            return Err(TransformError::Released);
        }
        if dst.len() < self.dst_len {
            return Err(TransformError::BufferTooShort {
                what: "output",
                needed: self.dst_len,
                actual: dst.len(),
            });
        }
        if let Kernel::Copy { variable: true } = self.kernel {
            if src.len() > self.dst_len {
                return Err(TransformError::BufferTooShort {
                    what: "output",
                    needed: src.len(),
                    actual: self.dst_len,
                });
            }
            dst[..src.len()].copy_from_slice(src);
            return Ok(src.len());
        }
        if src.len() < self.src_len {
            return Err(TransformError::BufferTooShort {
                what: "input",
                needed: self.src_len,
                actual: src.len(),
            });
        }
        let (src, dst) = (&src[..self.src_len], &mut dst[..self.dst_len]);
        match &self.kernel {
            Kernel::Copy { .. } => dst.copy_from_slice(src),
            Kernel::Convert {
                conversion,
                tier,
                res,
            } => conversion.run(*tier, src, dst, *res),
            Kernel::Geometry { op, planes } => geometry::run(*op, planes, src, dst),
        }
        Ok(self.dst_len)
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Margins, VariantFlags};

    fn make_res(w: u32, h: u32) -> Resolution {
        Resolution::new(w, h).unwrap()
    }

    fn make_spec(src: PixelFormat, dst: PixelFormat, w: u32, h: u32, op: StageOp) -> StageSpec {
        StageSpec::new(src, dst, make_res(w, h), op).unwrap()
    }

    #[test]
    fn every_conversion_pair_is_priced_validly() {
        for src in PixelFormat::ALL {
            for dst in PixelFormat::ALL {
                let Some(conv) = Conversion::between(src, dst) else {
                    continue;
                };
                assert_ne!(src, dst);
                for tier in QualityTier::ALL {
                    assert!(conv.estimate(tier).is_valid(), "{src} -> {dst}");
                }
            }
        }
    }

    #[test]
    fn tier_flag_selects_yuv_cost() {
        let conv = Conversion::between(PixelFormat::Nv12, PixelFormat::Rgb24).unwrap();
        let factory = PrimitiveFactory::conversion(conv);
        let spec = make_spec(PixelFormat::Nv12, PixelFormat::Rgb24, 4, 4, StageOp::Convert);
        let fast = factory.estimate(&spec.with_flags(VariantFlags::FAST)).unwrap();
        let float = factory.estimate(&spec).unwrap();
        assert_eq!(fast, CostEstimate::new(4, 0.97));
        assert_eq!(float, CostEstimate::new(12, 1.0));
    }

    #[test]
    fn odd_dimensions_rejected_for_subsampled_formats() {
        let factory = PrimitiveFactory::conversion(
            Conversion::between(PixelFormat::Rgb24, PixelFormat::Yuv420).unwrap(),
        );
        let spec = make_spec(PixelFormat::Rgb24, PixelFormat::Yuv420, 3, 2, StageOp::Convert);
        assert!(matches!(
            factory.estimate(&spec),
            Err(TransformError::UnsupportedDimensions { format: PixelFormat::Yuv420, .. })
        ));
    }

    #[test]
    fn mismatched_family_is_invalid() {
        let factory = PrimitiveFactory::geometry(Family::HFlip);
        let spec = make_spec(PixelFormat::Grey, PixelFormat::Grey, 2, 2, StageOp::VFlip);
        assert_eq!(factory.estimate(&spec).unwrap_err().code(), "invalid_parameters");
    }

    #[test]
    fn geometry_costs_scale_with_depth() {
        let factory = PrimitiveFactory::geometry(Family::Rotate90);
        let op = StageOp::Rotate90 { clockwise: true };
        let rgb = factory
            .estimate(&make_spec(PixelFormat::Rgb24, PixelFormat::Rgb24, 2, 2, op))
            .unwrap();
        let grey = factory
            .estimate(&make_spec(PixelFormat::Grey, PixelFormat::Grey, 2, 2, op))
            .unwrap();
        assert_eq!(rgb.cpu_cost, 12);
        assert_eq!(grey.cpu_cost, 4);
    }

    #[test]
    fn pad_margins_on_crop_factory_are_invalid() {
        let margins = Margins {
            top: -2,
            left: 0,
            bottom: 0,
            right: 0,
        };
        let factory = PrimitiveFactory::geometry(Family::Crop);
        let spec = make_spec(PixelFormat::Grey, PixelFormat::Grey, 2, 2, StageOp::Crop(margins));
        assert!(matches!(
            factory.estimate(&spec),
            Err(TransformError::InvalidParameters(_))
        ));
    }

    #[test]
    fn bound_primitive_checks_buffers_and_release() {
        let spec = make_spec(PixelFormat::Grey, PixelFormat::Grey, 2, 2, StageOp::Copy);
        let mut bound = PrimitiveFactory::identity().bind(&spec).unwrap();
        let mut out = [0u8; 4];
        assert!(matches!(
            bound.apply(&[1, 2, 3], &mut out),
            Err(TransformError::BufferTooShort { what: "input", .. })
        ));
        assert_eq!(bound.apply(&[1, 2, 3, 4], &mut out), Ok(4));
        assert_eq!(out, [1, 2, 3, 4]);
        bound.release();
        bound.release();
        assert_eq!(bound.apply(&[1, 2, 3, 4], &mut out), Err(TransformError::Released));
    }

    #[test]
    fn compressed_identity_copies_payload_length() {
        let spec = make_spec(PixelFormat::Mjpeg, PixelFormat::Mjpeg, 2, 2, StageOp::Copy);
        let mut bound = PrimitiveFactory::identity().bind(&spec).unwrap();
        let mut out = vec![0u8; bound.dst_len()];
        assert_eq!(bound.apply(&[0xff, 0xd8, 0xff, 0xd9], &mut out), Ok(4));
        assert_eq!(&out[..4], &[0xff, 0xd8, 0xff, 0xd9]);
    }
}
