//! Per-plane flips, rotations, reframing and nearest-neighbour scaling.

use pixpipe_core::prelude::*;
use smallvec::SmallVec;

use crate::{Margins, ScaleRatio, StageOp};

const LUMA_FILL: u8 = 0x00;
const CHROMA_FILL: u8 = 0x80;

/// Whether geometry kernels can address every plane of `format`.
pub(crate) fn supports(format: PixelFormat) -> bool {
    matches!(format.layout(), Layout::Packed { .. } | Layout::Planar { .. })
}

/// Source and destination descriptors of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlaneMap {
    src: PlaneLayout,
    dst: PlaneLayout,
    /// Subsampling divisors of this plane relative to luma.
    sub: (u32, u32),
    fill: u8,
}

pub(crate) fn plane_maps(
    format: PixelFormat,
    input: Resolution,
    output: Resolution,
) -> SmallVec<[PlaneMap; 3]> {
    let subs: SmallVec<[(u32, u32); 3]> = match format.layout() {
        Layout::Planar { planes } => planes
            .iter()
            .map(|p| (p.h_sub as u32, p.v_sub as u32))
            .collect(),
        _ => smallvec::smallvec![(1, 1)],
    };
    plane_layouts(format, input)
        .into_iter()
        .zip(plane_layouts(format, output))
        .zip(subs)
        .enumerate()
        .map(|(idx, ((src, dst), sub))| PlaneMap {
            src,
            dst,
            sub,
            fill: if idx == 0 { LUMA_FILL } else { CHROMA_FILL },
        })
        .collect()
}

pub(crate) fn run(op: StageOp, planes: &[PlaneMap], src: &[u8], dst: &mut [u8]) {
    for plane in planes {
        let s = &src[plane.src.range()];
        let d = &mut dst[plane.dst.range()];
        let bps = plane.src.bytes_per_sample();
        match op {
            StageOp::HFlip => mirror(s, d, &plane.src, bps, true, false),
            StageOp::VFlip => mirror(s, d, &plane.src, bps, false, true),
            StageOp::Rotate180 => mirror(s, d, &plane.src, bps, true, true),
            StageOp::Rotate90 { clockwise } => rotate90(s, d, &plane.src, &plane.dst, bps, clockwise),
            StageOp::Crop(m) | StageOp::Pad(m) => reframe(s, d, plane, bps, m),
            StageOp::Scale(ratio) => scale(s, d, &plane.src, &plane.dst, bps, ratio),
            StageOp::Copy | StageOp::Convert => d.copy_from_slice(s),
        }
    }
}

fn mirror(src: &[u8], dst: &mut [u8], layout: &PlaneLayout, bps: usize, h: bool, v: bool) {
    let (w, rows) = (layout.width, layout.height);
    for (y, out) in dst.chunks_exact_mut(layout.stride).enumerate() {
        let sy = if v { rows - 1 - y } else { y };
        let line = &src[sy * layout.stride..][..layout.stride];
        if !h {
            out.copy_from_slice(line);
            continue;
        }
        for (x, sample) in out.chunks_exact_mut(bps).enumerate() {
            sample.copy_from_slice(&line[(w - 1 - x) * bps..][..bps]);
        }
    }
}

fn rotate90(
    src: &[u8],
    dst: &mut [u8],
    from: &PlaneLayout,
    to: &PlaneLayout,
    bps: usize,
    clockwise: bool,
) {
    for (y, out) in dst.chunks_exact_mut(to.stride).enumerate() {
        for (x, sample) in out.chunks_exact_mut(bps).enumerate() {
            let (sx, sy) = if clockwise {
                (y, from.height - 1 - x)
            } else {
                (from.width - 1 - y, x)
            };
            sample.copy_from_slice(&src[sy * from.stride + sx * bps..][..bps]);
        }
    }
}

// dst(x, y) = src(x + left, y + top), fill outside the source.
fn reframe(src: &[u8], dst: &mut [u8], plane: &PlaneMap, bps: usize, m: Margins) {
    let (from, to) = (&plane.src, &plane.dst);
    let left = m.left as i64 / plane.sub.0 as i64;
    let top = m.top as i64 / plane.sub.1 as i64;
    let (sw, sh) = (from.width as i64, from.height as i64);
    let dw = to.width as i64;
    // Destination columns that land inside the source.
    let x0 = (-left).clamp(0, dw);
    let x1 = (sw - left).clamp(x0, dw);
    for (y, out) in dst.chunks_exact_mut(to.stride).enumerate() {
        let sy = y as i64 + top;
        if sy < 0 || sy >= sh || x0 == x1 {
            out.fill(plane.fill);
            continue;
        }
        let (a, b) = (x0 as usize * bps, x1 as usize * bps);
        let sx = (x0 + left) as usize * bps;
        out[..a].fill(plane.fill);
        out[a..b].copy_from_slice(&src[sy as usize * from.stride + sx..][..b - a]);
        out[b..].fill(plane.fill);
    }
}

fn scale(
    src: &[u8],
    dst: &mut [u8],
    from: &PlaneLayout,
    to: &PlaneLayout,
    bps: usize,
    ratio: ScaleRatio,
) {
    let map = |d: usize, limit: usize| {
        let s = d as u64 * ratio.den as u64 / ratio.num as u64;
        (s as usize).min(limit - 1)
    };
    for (y, out) in dst.chunks_exact_mut(to.stride).enumerate() {
        let line = &src[map(y, from.height) * from.stride..][..from.stride];
        for (x, sample) in out.chunks_exact_mut(bps).enumerate() {
            sample.copy_from_slice(&line[map(x, from.width) * bps..][..bps]);
        }
    }
}
