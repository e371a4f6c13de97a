//! Byte shuffles: channel swaps, alpha, RGB565, grey and chroma repacking.

use pixpipe_core::prelude::*;

/// Component order of a packed 4:2:2 macropixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackedOrder {
    Yuyv,
    Yvyu,
    Uyvy,
    Vyuy,
}

impl PackedOrder {
    pub fn of(format: PixelFormat) -> Option<Self> {
        match format {
            PixelFormat::Yuyv => Some(PackedOrder::Yuyv),
            PixelFormat::Yvyu => Some(PackedOrder::Yvyu),
            PixelFormat::Uyvy => Some(PackedOrder::Uyvy),
            PixelFormat::Vyuy => Some(PackedOrder::Vyuy),
            _ => None,
        }
    }

    pub fn format(self) -> PixelFormat {
        match self {
            PackedOrder::Yuyv => PixelFormat::Yuyv,
            PackedOrder::Yvyu => PixelFormat::Yvyu,
            PackedOrder::Uyvy => PixelFormat::Uyvy,
            PackedOrder::Vyuy => PixelFormat::Vyuy,
        }
    }

    /// Byte offsets of `[y0, u, y1, v]` inside a macropixel.
    pub const fn offsets(self) -> [usize; 4] {
        match self {
            PackedOrder::Yuyv => [0, 1, 2, 3],
            PackedOrder::Yvyu => [0, 3, 2, 1],
            PackedOrder::Uyvy => [1, 0, 3, 2],
            PackedOrder::Vyuy => [1, 2, 3, 0],
        }
    }
}

pub(super) fn swap_rb(bpp: usize, src: &[u8], dst: &mut [u8]) {
    for (d, s) in dst.chunks_exact_mut(bpp).zip(src.chunks_exact(bpp)) {
        d.copy_from_slice(s);
        d.swap(0, 2);
    }
}

pub(super) fn strip_alpha(swap: bool, src: &[u8], dst: &mut [u8]) {
    for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
        d.copy_from_slice(&s[..3]);
        if swap {
            d.swap(0, 2);
        }
    }
}

pub(super) fn add_alpha(swap: bool, src: &[u8], dst: &mut [u8]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(3)) {
        d[..3].copy_from_slice(s);
        if swap {
            d.swap(0, 2);
        }
        d[3] = 0xff;
    }
}

pub(super) fn rgb565_to_rgb24(bgr: bool, src: &[u8], dst: &mut [u8]) {
    for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(2)) {
        let t = u16::from_le_bytes([s[0], s[1]]);
        let r = 0xf8 & (t >> 8) as u8;
        let g = 0xfc & (t >> 3) as u8;
        let b = 0xf8 & (t << 3) as u8;
        d.copy_from_slice(&if bgr { [b, g, r] } else { [r, g, b] });
    }
}

pub(super) fn grey_to_rgb(src: &[u8], dst: &mut [u8]) {
    for (d, s) in dst.chunks_exact_mut(3).zip(src) {
        d.fill(*s);
    }
}

pub(super) fn grey_to_yuv420(src: &[u8], dst: &mut [u8]) {
    let (luma, chroma) = dst.split_at_mut(src.len());
    luma.copy_from_slice(src);
    chroma.fill(0x80);
}

pub(super) fn luma_from_packed(order: PackedOrder, src: &[u8], dst: &mut [u8]) {
    let [y0, _, y1, _] = order.offsets();
    for (d, mp) in dst.chunks_exact_mut(2).zip(src.chunks_exact(4)) {
        d[0] = mp[y0];
        d[1] = mp[y1];
    }
}

/// Split a 4:2:0 destination into (luma, u, v) regardless of plane order.
fn split_i420(dst: &mut [u8], res: Resolution, yvu: bool) -> (&mut [u8], &mut [u8], &mut [u8]) {
    let luma_len = res.w() * res.h();
    let chroma_len = luma_len / 4;
    let (luma, rest) = dst.split_at_mut(luma_len);
    let (first, second) = rest.split_at_mut(chroma_len);
    let (second, _) = second.split_at_mut(chroma_len);
    if yvu {
        (luma, second, first)
    } else {
        (luma, first, second)
    }
}

fn split_i420_src(src: &[u8], res: Resolution, yvu: bool) -> (&[u8], &[u8], &[u8]) {
    let luma_len = res.w() * res.h();
    let chroma_len = luma_len / 4;
    let (luma, rest) = src.split_at(luma_len);
    let (first, second) = rest.split_at(chroma_len);
    if yvu {
        (luma, &second[..chroma_len], first)
    } else {
        (luma, first, &second[..chroma_len])
    }
}

// Chroma averages vertically adjacent macropixels, truncating.
pub(super) fn packed_to_yuv420(
    order: PackedOrder,
    yvu: bool,
    src: &[u8],
    dst: &mut [u8],
    res: Resolution,
) {
    let (w, h) = (res.w(), res.h());
    let [_, uo, _, vo] = order.offsets();
    let line = w * 2;
    let (luma, u, v) = split_i420(dst, res, yvu);
    luma_from_packed(order, &src[..line * h], luma);
    let rows = src[..line * h].chunks_exact(line * 2);
    for ((pair, urow), vrow) in rows.zip(u.chunks_exact_mut(w / 2)).zip(v.chunks_exact_mut(w / 2)) {
        let (top, bottom) = pair.split_at(line);
        for (((a, b), ud), vd) in top
            .chunks_exact(4)
            .zip(bottom.chunks_exact(4))
            .zip(urow.iter_mut())
            .zip(vrow.iter_mut())
        {
            *ud = ((a[uo] as u16 + b[uo] as u16) / 2) as u8;
            *vd = ((a[vo] as u16 + b[vo] as u16) / 2) as u8;
        }
    }
}

pub(super) fn swap_chroma_planes(src: &[u8], dst: &mut [u8], res: Resolution) {
    let (sy, su, sv) = split_i420_src(src, res, false);
    // Writing u into the v slot of a yvu split swaps the planes.
    let (dy, du, dv) = split_i420(dst, res, true);
    dy.copy_from_slice(sy);
    dv.copy_from_slice(su);
    du.copy_from_slice(sv);
}

pub(super) fn nv_to_yuv420(nv21: bool, yvu: bool, src: &[u8], dst: &mut [u8], res: Resolution) {
    let luma_len = res.w() * res.h();
    let (luma, u, v) = split_i420(dst, res, yvu);
    luma.copy_from_slice(&src[..luma_len]);
    let pairs = src[luma_len..luma_len + luma_len / 2].chunks_exact(2);
    for ((pair, ud), vd) in pairs.zip(u.iter_mut()).zip(v.iter_mut()) {
        let (a, b) = (pair[0], pair[1]);
        (*ud, *vd) = if nv21 { (b, a) } else { (a, b) };
    }
}

pub(super) fn yuv420_to_nv(yvu: bool, nv21: bool, src: &[u8], dst: &mut [u8], res: Resolution) {
    let (sy, su, sv) = split_i420_src(src, res, yvu);
    let (luma, uv) = dst.split_at_mut(sy.len());
    luma.copy_from_slice(sy);
    for ((pair, u), v) in uv.chunks_exact_mut(2).zip(su).zip(sv) {
        pair.copy_from_slice(&if nv21 { [*v, *u] } else { [*u, *v] });
    }
}
