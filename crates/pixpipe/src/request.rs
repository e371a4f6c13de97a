use std::fmt;

use pixpipe_core::prelude::*;
use pixpipe_transform::{Family, Margins, ScaleRatio, StageOp};
use smallvec::SmallVec;

use crate::planner::PlanningError;

/// Set of geometric operations, one bit per operation.
///
/// Bits are ordered the way operations are applied: scale, rotate, hflip,
/// vflip, crop/pad.
///
/// # Example
/// ```rust
/// use pixpipe::prelude::OpSet;
///
/// let ops = OpSet::ROTATE | OpSet::CROP;
/// assert_eq!(ops.first(), Some(OpSet::ROTATE));
/// assert_eq!(ops.without(OpSet::ROTATE), OpSet::CROP);
/// assert_eq!(ops.to_string(), "rotate|crop");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpSet(u8);

impl OpSet {
    pub const EMPTY: OpSet = OpSet(0);
    pub const SCALE: OpSet = OpSet(1 << 0);
    pub const ROTATE: OpSet = OpSet(1 << 1);
    pub const HFLIP: OpSet = OpSet(1 << 2);
    pub const VFLIP: OpSet = OpSet(1 << 3);
    /// Crop or pad by margins.
    pub const CROP: OpSet = OpSet(1 << 4);

    /// Single-bit sets in application order.
    pub const ORDER: [OpSet; 5] = [
        OpSet::SCALE,
        OpSet::ROTATE,
        OpSet::HFLIP,
        OpSet::VFLIP,
        OpSet::CROP,
    ];

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: OpSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn without(self, other: OpSet) -> OpSet {
        OpSet(self.0 & !other.0)
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Earliest operation in application order.
    pub fn first(self) -> Option<OpSet> {
        (!self.is_empty()).then(|| OpSet(1 << self.0.trailing_zeros()))
    }

    /// Single-bit members in application order.
    pub fn iter(self) -> impl Iterator<Item = OpSet> {
        OpSet::ORDER.into_iter().filter(move |op| self.contains(*op))
    }

    fn name(self) -> &'static str {
        match self {
            OpSet::SCALE => "scale",
            OpSet::ROTATE => "rotate",
            OpSet::HFLIP => "hflip",
            OpSet::VFLIP => "vflip",
            OpSet::CROP => "crop",
            _ => "?",
        }
    }
}

impl std::ops::BitOr for OpSet {
    type Output = OpSet;

    fn bitor(self, rhs: OpSet) -> OpSet {
        OpSet(self.0 | rhs.0)
    }
}

impl fmt::Display for OpSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (idx, op) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str("|")?;
            }
            f.write_str(op.name())?;
        }
        Ok(())
    }
}

/// What the caller wants done to each frame.
///
/// Rotation is clockwise in degrees; scale is a rational factor applied first;
/// `top`/`left` offsets place the destination window on the scaled, rotated
/// frame and may be negative to pad.
///
/// # Example
/// ```rust
/// use pixpipe::prelude::*;
///
/// let request = ConversionRequest::new(PixelFormat::Yuyv, 640, 480, PixelFormat::Rgb24, 480, 640)
///     .rotation(-270)
///     .hflip(true);
/// let canon = request.canonicalize().unwrap();
/// assert_eq!(canon.rotation, 90);
/// assert_eq!(canon.ops, OpSet::ROTATE | OpSet::HFLIP);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConversionRequest {
    pub src_format: PixelFormat,
    pub src_width: u32,
    pub src_height: u32,
    pub dst_format: PixelFormat,
    pub dst_width: u32,
    pub dst_height: u32,
    pub rotation: i32,
    pub hflip: bool,
    pub vflip: bool,
    pub scale_num: i32,
    pub scale_den: i32,
    pub top: i32,
    pub left: i32,
}

impl ConversionRequest {
    /// Plain format conversion; chain setters to add geometry.
    pub fn new(
        src_format: PixelFormat,
        src_width: u32,
        src_height: u32,
        dst_format: PixelFormat,
        dst_width: u32,
        dst_height: u32,
    ) -> Self {
        Self {
            src_format,
            src_width,
            src_height,
            dst_format,
            dst_width,
            dst_height,
            rotation: 0,
            hflip: false,
            vflip: false,
            scale_num: 1,
            scale_den: 1,
            top: 0,
            left: 0,
        }
    }

    /// Same as [`ConversionRequest::new`] with formats given as wire codes.
    pub fn from_fourcc(
        src: FourCc,
        src_width: u32,
        src_height: u32,
        dst: FourCc,
        dst_width: u32,
        dst_height: u32,
    ) -> Result<Self, PlanningError> {
        let lookup = |code: FourCc| {
            PixelFormat::from_fourcc(code)
                .ok_or_else(|| PlanningError::InvalidRequest(format!("unknown fourcc {code}")))
        };
        Ok(Self::new(
            lookup(src)?,
            src_width,
            src_height,
            lookup(dst)?,
            dst_width,
            dst_height,
        ))
    }

    pub fn rotation(mut self, degrees: i32) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn hflip(mut self, enable: bool) -> Self {
        self.hflip = enable;
        self
    }

    pub fn vflip(mut self, enable: bool) -> Self {
        self.vflip = enable;
        self
    }

    pub fn scale(mut self, num: i32, den: i32) -> Self {
        self.scale_num = num;
        self.scale_den = den;
        self
    }

    /// Destination window origin on the scaled, rotated frame.
    pub fn offsets(mut self, top: i32, left: i32) -> Self {
        self.top = top;
        self.left = left;
        self
    }

    /// Normalize the request into the form the planner searches over.
    pub fn canonicalize(&self) -> Result<CanonicalRequest, PlanningError> {
        CanonicalRequest::from_request(self)
    }
}

/// A request reduced to the operations that actually change the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub src: PixelFormat,
    pub dst: PixelFormat,
    pub input: Resolution,
    pub output: Resolution,
    /// Clockwise degrees, one of 0, 90, 180, 270.
    pub rotation: u16,
    pub hflip: bool,
    pub vflip: bool,
    pub scale: ScaleRatio,
    pub margins: Margins,
    /// Operations still to perform.
    pub ops: OpSet,
    /// `sizes[k]` is the frame size after the first `k` operations of `ops`.
    sizes: SmallVec<[Resolution; 6]>,
}

fn invalid(msg: impl Into<String>) -> PlanningError {
    PlanningError::InvalidRequest(msg.into())
}

impl CanonicalRequest {
    fn from_request(req: &ConversionRequest) -> Result<Self, PlanningError> {
        let input = Resolution::new(req.src_width, req.src_height)
            .ok_or_else(|| invalid(format!("source {}x{} is empty", req.src_width, req.src_height)))?;
        let output = Resolution::new(req.dst_width, req.dst_height).ok_or_else(|| {
            invalid(format!("destination {}x{} is empty", req.dst_width, req.dst_height))
        })?;

        let mut rotation = req.rotation.rem_euclid(360);
        if rotation % 90 != 0 {
            return Err(invalid(format!("rotation {} is not a quarter turn", req.rotation)));
        }
        let (mut hflip, mut vflip) = (req.hflip, req.vflip);
        if hflip && vflip && rotation % 180 == 0 {
            rotation = (rotation + 180) % 360;
            hflip = false;
            vflip = false;
        }

        if req.scale_num <= 0 || req.scale_den <= 0 {
            return Err(invalid(format!(
                "scale {}/{} must be positive",
                req.scale_num, req.scale_den
            )));
        }
        let scale = ScaleRatio::reduced(req.scale_num as u32, req.scale_den as u32)
            .ok_or_else(|| invalid("scale reduces to zero"))?;
        let scaled = scale
            .apply(input)
            .ok_or_else(|| invalid(format!("scale {}/{} collapses {input}", scale.num, scale.den)))?;
        let rotated = if rotation % 180 == 90 {
            scaled.transposed()
        } else {
            scaled
        };

        let margin = |v: i64| {
            i32::try_from(v).map_err(|_| invalid(format!("margin {v} out of range")))
        };
        let margins = Margins {
            top: req.top,
            left: req.left,
            bottom: margin(
                rotated.height.get() as i64 - req.top as i64 - output.height.get() as i64,
            )?,
            right: margin(rotated.width.get() as i64 - req.left as i64 - output.width.get() as i64)?,
        };

        let mut ops = OpSet::EMPTY;
        if !scale.is_identity() {
            ops = ops | OpSet::SCALE;
        }
        if rotation != 0 {
            ops = ops | OpSet::ROTATE;
        }
        if hflip {
            ops = ops | OpSet::HFLIP;
        }
        if vflip {
            ops = ops | OpSet::VFLIP;
        }
        if !margins.is_zero() {
            ops = ops | OpSet::CROP;
        }

        let mut canon = Self {
            src: req.src_format,
            dst: req.dst_format,
            input,
            output,
            rotation: rotation as u16,
            hflip,
            vflip,
            scale,
            margins,
            ops,
            sizes: SmallVec::new(),
        };
        let mut res = input;
        canon.sizes.push(res);
        for op in ops.iter() {
            res = canon
                .stage_op(op)
                .and_then(|stage| stage.output_for(res))
                .ok_or_else(|| invalid(format!("{} cannot be applied to {res}", op.name())))?;
            canon.sizes.push(res);
        }
        if res != output {
            return Err(invalid(format!("operations produce {res}, not {output}")));
        }
        Ok(canon)
    }

    /// Whether the request is a plain copy.
    pub fn is_identity(&self) -> bool {
        self.ops.is_empty() && self.src == self.dst
    }

    /// Stage parameters for a single operation bit.
    pub fn stage_op(&self, op: OpSet) -> Option<StageOp> {
        let stage = match op {
            OpSet::SCALE => StageOp::Scale(self.scale),
            OpSet::ROTATE => match self.rotation {
                180 => StageOp::Rotate180,
                90 => StageOp::Rotate90 { clockwise: true },
                270 => StageOp::Rotate90 { clockwise: false },
                _ => return None,
            },
            OpSet::HFLIP => StageOp::HFlip,
            OpSet::VFLIP => StageOp::VFlip,
            OpSet::CROP if self.margins.is_crop() => StageOp::Crop(self.margins),
            OpSet::CROP => StageOp::Pad(self.margins),
            _ => return None,
        };
        Some(stage)
    }

    /// Prototype family serving a single operation bit.
    pub fn family(&self, op: OpSet) -> Option<Family> {
        self.stage_op(op).map(|stage| stage.family())
    }

    /// Frame size once every operation outside `remaining` has been applied.
    ///
    /// Operations run in a fixed order, so the applied set is always a prefix
    /// of `ops` and its length determines the size.
    pub fn resolution_at(&self, remaining: OpSet) -> Resolution {
        let applied = self.ops.len().saturating_sub(remaining.len());
        self.sizes
            .get(applied)
            .copied()
            .unwrap_or(self.output)
    }
}

impl fmt::Display for CanonicalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} {} [{}]",
            self.src, self.input, self.dst, self.output, self.ops
        )
    }
}
