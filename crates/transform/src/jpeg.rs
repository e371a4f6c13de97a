//! JPEG encode/decode prototypes backed by the `image` crate.

use std::io::Cursor;

use image::{
    ColorType, DynamicImage, ExtendedColorType, ImageDecoder,
    codecs::jpeg::{JpegDecoder, JpegEncoder},
};
use pixpipe_core::prelude::*;

use crate::{
    BoundTransform, CostEstimate, Family, PrototypeDescriptor, StageOp, StageSpec, TransformError,
    TransformFactory,
    primitive::{Conversion, PrimitiveFactory},
    registry::RegistryBuilder,
};

const IMPL_NAME: &str = "image-jpeg";

fn check_stage(spec: &StageSpec, accepts: fn(PixelFormat, PixelFormat) -> bool) -> Result<(), TransformError> {
    spec.validate()?;
    if spec.op != StageOp::Convert || !accepts(spec.src, spec.dst) {
        return Err(TransformError::UnsupportedFormat {
            family: spec.op.family(),
            src: spec.src,
            dst: spec.dst,
        });
    }
    Ok(())
}

/// Sources the encoder takes directly; YUV ones are expanded to RGB24 first.
const ENCODER_SOURCES: [PixelFormat; 7] = [
    PixelFormat::Rgb24,
    PixelFormat::Grey,
    PixelFormat::Yuv420,
    PixelFormat::Yuyv,
    PixelFormat::Yvyu,
    PixelFormat::Uyvy,
    PixelFormat::Vyuy,
];

fn encodes(src: PixelFormat, dst: PixelFormat) -> bool {
    ENCODER_SOURCES.contains(&src) && dst == PixelFormat::Jpeg
}

/// Conversion to RGB24 ahead of encoding, for YUV sources.
fn staging_conversion(src: PixelFormat) -> Option<Conversion> {
    match src {
        PixelFormat::Rgb24 | PixelFormat::Grey => None,
        other => Conversion::between(other, PixelFormat::Rgb24),
    }
}

fn decodes(src: PixelFormat, dst: PixelFormat) -> bool {
    matches!(src, PixelFormat::Jpeg | PixelFormat::Mjpeg) && dst == PixelFormat::Rgb24
}

/// Baseline JPEG encoder for RGB24, GREY, YUV420 and packed 4:2:2 frames.
///
/// YUV input is expanded to RGB24 into a staging buffer held by the bound
/// encoder, using the conversion tier the stage flags select.
///
/// # Example
/// ```rust
/// use pixpipe_transform::prelude::*;
///
/// let spec = StageSpec::new(
///     PixelFormat::Grey,
///     PixelFormat::Jpeg,
///     Resolution::new(8, 8).unwrap(),
///     StageOp::Convert,
/// )
/// .unwrap();
/// let mut bound = JpegEncoderFactory::default().bind(&spec).unwrap();
/// let mut out = vec![0u8; bound.dst_len()];
/// let written = bound.apply(&[128u8; 64], &mut out).unwrap();
/// assert_eq!(&out[..2], &[0xff, 0xd8]);
/// assert!(written < out.len());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegEncoderFactory {
    quality: u8,
}

impl JpegEncoderFactory {
    pub const DEFAULT_QUALITY: u8 = 100;

    /// Encoder with `quality` clamped to `1..=100`.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegEncoderFactory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_QUALITY)
    }
}

impl TransformFactory for JpegEncoderFactory {
    fn estimate(&self, spec: &StageSpec) -> Result<CostEstimate, TransformError> {
        check_stage(spec, encodes)?;
        let base = CostEstimate::new(40, 0.85);
        match staging_conversion(spec.src) {
            Some(conversion) => {
                let pre = conversion.estimate(spec.flags.tier().unwrap_or_default());
                Ok(CostEstimate::new(
                    base.cpu_cost + pre.cpu_cost,
                    base.quality * pre.quality,
                ))
            }
            None => Ok(base),
        }
    }

    fn bind(&self, spec: &StageSpec) -> Result<Box<dyn BoundTransform>, TransformError> {
        check_stage(spec, encodes)?;
        let dst_len = spec.dst_len()?;
        let mut context = Vec::new();
        context
            .try_reserve(dst_len)
            .map_err(|e| TransformError::Construction(e.to_string()))?;
        let staging = match staging_conversion(spec.src) {
            Some(conversion) => {
                let rgb_spec =
                    StageSpec::new(spec.src, PixelFormat::Rgb24, spec.input, StageOp::Convert)?
                        .with_flags(spec.flags);
                let expand = PrimitiveFactory::conversion(conversion).bind(&rgb_spec)?;
                let mut rgb = Vec::new();
                rgb.try_reserve_exact(expand.dst_len())
                    .map_err(|e| TransformError::Construction(e.to_string()))?;
                rgb.resize(expand.dst_len(), 0);
                Some(Staging { expand, rgb })
            }
            None => None,
        };
        Ok(Box::new(BoundJpegEncoder {
            quality: self.quality,
            color: if spec.src == PixelFormat::Grey {
                ExtendedColorType::L8
            } else {
                ExtendedColorType::Rgb8
            },
            res: spec.input,
            src_len: spec.src_len()?,
            dst_len,
            context: Some(context),
            staging,
        }))
    }
}

struct Staging {
    expand: Box<dyn BoundTransform>,
    rgb: Vec<u8>,
}

struct BoundJpegEncoder {
    quality: u8,
    color: ExtendedColorType,
    res: Resolution,
    src_len: usize,
    dst_len: usize,
    /// Reused compressed-output buffer; `None` once released.
    context: Option<Vec<u8>>,
    staging: Option<Staging>,
}

impl BoundTransform for BoundJpegEncoder {
    fn src_len(&self) -> usize {
        self.src_len
    }

    fn dst_len(&self) -> usize {
        self.dst_len
    }

    fn apply(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
        let context = self.context.as_mut().ok_or(TransformError::Released)?;
        if src.len() < self.src_len {
            return Err(TransformError::BufferTooShort {
                what: "input",
                needed: self.src_len,
                actual: src.len(),
            });
        }
        let pixels = match self.staging.as_mut() {
            Some(staging) => {
                staging.expand.apply(&src[..self.src_len], &mut staging.rgb)?;
                &staging.rgb[..]
            }
            None => &src[..self.src_len],
        };
        context.clear();
        JpegEncoder::new_with_quality(&mut *context, self.quality)
            .encode(
                pixels,
                self.res.width.get(),
                self.res.height.get(),
                self.color,
            )
            .map_err(|e| TransformError::Encode(e.to_string()))?;
        let written = context.len();
        if written > dst.len() {
            return Err(TransformError::BufferTooShort {
                what: "output",
                needed: written,
                actual: dst.len(),
            });
        }
        dst[..written].copy_from_slice(&context[..]);
        Ok(written)
    }

    fn release(&mut self) {
        self.context = None;
        if let Some(mut staging) = self.staging.take() {
            staging.expand.release();
        }
    }
}

/// JPEG/MJPEG to RGB24 decoder.
///
/// Frames whose decoded size differs from the stage resolution are rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JpegDecoderFactory;

impl TransformFactory for JpegDecoderFactory {
    fn estimate(&self, spec: &StageSpec) -> Result<CostEstimate, TransformError> {
        check_stage(spec, decodes)?;
        Ok(CostEstimate::new(30, 1.0))
    }

    fn bind(&self, spec: &StageSpec) -> Result<Box<dyn BoundTransform>, TransformError> {
        check_stage(spec, decodes)?;
        Ok(Box::new(BoundJpegDecoder {
            format: spec.src,
            res: spec.input,
            src_len: spec.src_len()?,
            dst_len: spec.dst_len()?,
            released: false,
        }))
    }
}

struct BoundJpegDecoder {
    format: PixelFormat,
    res: Resolution,
    src_len: usize,
    dst_len: usize,
    released: bool,
}

impl BoundTransform for BoundJpegDecoder {
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
        let decode_err = |e: image::ImageError| TransformError::Decode(e.to_string());
        let decoder = JpegDecoder::new(Cursor::new(src)).map_err(decode_err)?;
        let (width, height) = decoder.dimensions();
        if (width, height) != (self.res.width.get(), self.res.height.get()) {
            return Err(TransformError::Decode(format!(
                "{} frame is {width}x{height}, expected {}",
                self.format, self.res
            )));
        }
        let out = &mut dst[..self.dst_len];
        if decoder.color_type() == ColorType::Rgb8 {
            decoder.read_image(out).map_err(decode_err)?;
        } else {
            let rgb = DynamicImage::from_decoder(decoder)
                .map_err(decode_err)?
                .to_rgb8();
            out.copy_from_slice(rgb.as_raw());
        }
        Ok(self.dst_len)
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Register the JPEG prototypes; returns how many were added.
pub(crate) fn register_jpeg(builder: &mut RegistryBuilder) -> usize {
    let encoders = ENCODER_SOURCES.map(|src| {
        let desc = PrototypeDescriptor::new(Family::FormatConversion, src, PixelFormat::Jpeg, "jpeg-encode")
            .impl_name(IMPL_NAME);
        builder.register_factory(desc, JpegEncoderFactory::default())
    });
    let decoders = [PixelFormat::Jpeg, PixelFormat::Mjpeg].map(|src| {
        let desc = PrototypeDescriptor::new(Family::FormatConversion, src, PixelFormat::Rgb24, "jpeg-decode")
            .impl_name(IMPL_NAME);
        builder.register_factory(desc, JpegDecoderFactory)
    });
    encoders
        .into_iter()
        .chain(decoders)
        .filter(|res| match res {
            Ok(_) => true,
            Err(err) => {
                tracing::trace!(error = %err, "jpeg prototype not registered");
                false
            }
        })
        .count()
}
