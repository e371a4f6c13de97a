//! RGB <-> YUV colorspace math.
//!
//! Forward conversions use 15-bit BT.601 studio-swing coefficients. The
//! inverse comes in four accuracy tiers; each tier's arithmetic is fixed so
//! outputs are reproducible bit for bit.

use pixpipe_core::prelude::*;

use super::{PackedOrder, for_each_row};
use crate::QualityTier;

/// Chroma storage of a YUV source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum YuvSource {
    /// Three planes; `yvu` when V precedes U.
    Planar { yvu: bool },
    /// Luma plane plus one interleaved chroma plane; `nv21` for VU pairs.
    SemiPlanar { nv21: bool },
    Packed(PackedOrder),
}

impl YuvSource {
    pub fn of(format: PixelFormat) -> Option<Self> {
        match format {
            PixelFormat::Yuv420 => Some(YuvSource::Planar { yvu: false }),
            PixelFormat::Yvu420 => Some(YuvSource::Planar { yvu: true }),
            PixelFormat::Nv12 => Some(YuvSource::SemiPlanar { nv21: false }),
            PixelFormat::Nv21 => Some(YuvSource::SemiPlanar { nv21: true }),
            other => PackedOrder::of(other).map(YuvSource::Packed),
        }
    }
}

#[inline(always)]
fn clip(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline(always)]
fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    clip((8453 * r + 16594 * g + 3223 * b + 524288) >> 15)
}

#[inline(always)]
fn rgb_to_u(r: i32, g: i32, b: i32) -> u8 {
    clip((-4878 * r - 9578 * g + 14456 * b + 4210688) >> 15)
}

#[inline(always)]
fn rgb_to_v(r: i32, g: i32, b: i32) -> u8 {
    clip((14456 * r - 12105 * g - 2351 * b + 4210688) >> 15)
}

/// Per-macropixel chroma contributions shared by neighbouring luma samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chroma {
    v1: i32,
    rg: i32,
    u1: i32,
}

impl Chroma {
    #[inline(always)]
    fn new(tier: QualityTier, u: u8, v: u8) -> Self {
        let u = u as i32 - 128;
        let v = v as i32 - 128;
        let (v1, rg, u1) = match tier {
            QualityTier::Fast => (
                ((v << 1) + v) >> 1,
                ((u << 1) + u + (v << 2) + (v << 1)) >> 3,
                ((u << 7) + u) >> 6,
            ),
            QualityTier::Integer => ((v * 1436) >> 10, (u * 352 + v * 731) >> 10, (u * 1814) >> 10),
            QualityTier::FixedPoint => (1436 * v + 512, 352 * u + 731 * v - 512, 1815 * u + 512),
            QualityTier::Float => {
                let (u, v) = (u as f32, v as f32);
                (
                    (1.13983f32 * v + 0.5) as i32,
                    (0.39465f32 * u + 0.58060f32 * v - 0.5) as i32,
                    (2.03211f32 * u + 0.5) as i32,
                )
            }
        };
        Self { v1, rg, u1 }
    }

    #[inline(always)]
    fn write(self, tier: QualityTier, y: u8, bgr: bool, out: &mut [u8]) {
        let (r, g, b) = match tier {
            QualityTier::FixedPoint => {
                let y = (y as i32) << 10;
                (
                    clip((y + self.v1) >> 10),
                    clip((y - self.rg) >> 10),
                    clip((y + self.u1) >> 10),
                )
            }
            _ => {
                let y = y as i32;
                (clip(y + self.v1), clip(y - self.rg), clip(y + self.u1))
            }
        };
        out.copy_from_slice(&if bgr { [b, g, r] } else { [r, g, b] });
    }
}

pub(super) fn yuv_to_rgb(
    source: YuvSource,
    tier: QualityTier,
    bgr: bool,
    src: &[u8],
    dst: &mut [u8],
    res: Resolution,
) {
    let w = res.w();
    let row_bytes = w * 3;
    let dst = &mut dst[..row_bytes * res.h()];
    match source {
        YuvSource::Planar { yvu } => {
            let planes = plane_layouts(PixelFormat::Yuv420, res);
            let (yp, up, vp) = if yvu {
                (planes[0], planes[2], planes[1])
            } else {
                (planes[0], planes[1], planes[2])
            };
            for_each_row(dst, row_bytes, |y, out| {
                let luma = &src[yp.offset + y * yp.stride..][..w];
                let u_line = &src[up.offset + (y / 2) * up.stride..][..up.width];
                let v_line = &src[vp.offset + (y / 2) * vp.stride..][..vp.width];
                for (((px, pair), u), v) in out
                    .chunks_exact_mut(6)
                    .zip(luma.chunks_exact(2))
                    .zip(u_line)
                    .zip(v_line)
                {
                    let c = Chroma::new(tier, *u, *v);
                    c.write(tier, pair[0], bgr, &mut px[..3]);
                    c.write(tier, pair[1], bgr, &mut px[3..]);
                }
            });
        }
        YuvSource::SemiPlanar { nv21 } => {
            let planes = plane_layouts(PixelFormat::Nv12, res);
            let (yp, uvp) = (planes[0], planes[1]);
            for_each_row(dst, row_bytes, |y, out| {
                let luma = &src[yp.offset + y * yp.stride..][..w];
                let uv_line = &src[uvp.offset + (y / 2) * uvp.stride..][..uvp.stride];
                for ((px, pair), uv) in out
                    .chunks_exact_mut(6)
                    .zip(luma.chunks_exact(2))
                    .zip(uv_line.chunks_exact(2))
                {
                    let (u, v) = if nv21 { (uv[1], uv[0]) } else { (uv[0], uv[1]) };
                    let c = Chroma::new(tier, u, v);
                    c.write(tier, pair[0], bgr, &mut px[..3]);
                    c.write(tier, pair[1], bgr, &mut px[3..]);
                }
            });
        }
        YuvSource::Packed(order) => {
            let [y0, uo, y1, vo] = order.offsets();
            let line_bytes = w * 2;
            for_each_row(dst, row_bytes, |y, out| {
                let line = &src[y * line_bytes..][..line_bytes];
                for (px, mp) in out.chunks_exact_mut(6).zip(line.chunks_exact(4)) {
                    let c = Chroma::new(tier, mp[uo], mp[vo]);
                    c.write(tier, mp[y0], bgr, &mut px[..3]);
                    c.write(tier, mp[y1], bgr, &mut px[3..]);
                }
            });
        }
    }
}

#[inline(always)]
fn channels(px: &[u8], bgr: bool) -> (i32, i32, i32) {
    let (a, g, c) = (px[0] as i32, px[1] as i32, px[2] as i32);
    if bgr { (c, g, a) } else { (a, g, c) }
}

pub(super) fn rgb_to_grey(bgr: bool, src: &[u8], dst: &mut [u8], res: Resolution) {
    let w = res.w();
    for_each_row(&mut dst[..w * res.h()], w, |y, out| {
        let line = &src[y * w * 3..][..w * 3];
        for (d, px) in out.iter_mut().zip(line.chunks_exact(3)) {
            let (r, g, b) = channels(px, bgr);
            *d = rgb_to_y(r, g, b);
        }
    });
}

pub(super) fn rgb_to_yuv420(bgr: bool, yvu: bool, src: &[u8], dst: &mut [u8], res: Resolution) {
    let (w, h) = (res.w(), res.h());
    let luma_len = w * h;
    let (luma, chroma) = dst.split_at_mut(luma_len);
    rgb_to_grey(bgr, src, luma, res);

    let (first, second) = chroma.split_at_mut(luma_len / 4);
    let (u_plane, v_plane) = if yvu { (second, first) } else { (first, second) };
    let line = w * 3;
    let rows = src[..line * h].chunks_exact(line * 2);
    for ((pair, u_row), v_row) in rows
        .zip(u_plane.chunks_exact_mut(w / 2))
        .zip(v_plane.chunks_exact_mut(w / 2))
    {
        let (top, bottom) = pair.split_at(line);
        for (((upper, lower), u), v) in top
            .chunks_exact(6)
            .zip(bottom.chunks_exact(6))
            .zip(u_row.iter_mut())
            .zip(v_row.iter_mut())
        {
            let mut sum = [0i32; 3];
            for px in [&upper[..3], &upper[3..], &lower[..3], &lower[3..]] {
                let (r, g, b) = channels(px, bgr);
                sum[0] += r;
                sum[1] += g;
                sum[2] += b;
            }
            let [r, g, b] = sum.map(|s| (s + 2) / 4);
            *u = rgb_to_u(r, g, b);
            *v = rgb_to_v(r, g, b);
        }
    }
}
