//! Conversions between RGBA and the YUV 4:2:0 planes VP8 works on.
//!
//! Decoding uses "fancy" upsampling like libwebp: every output pixel takes its
//! chroma from the four nearest chroma samples weighted 9:3:3:1, and the edges
//! replicate the outermost samples.
//!
//! ```text
//! |yyyy|   |uu|vv|
//! |yyyy|   |uu|vv|
//! |yyyy|
//! |yyyy|
//! ```

use alloc::vec;
use alloc::vec::Vec;

/// `_mm_mulhi_epu16` emulation
#[inline]
fn mulhi(v: u8, coeff: u16) -> i32 {
    ((u32::from(v) * u32::from(coeff)) >> 8) as i32
}

#[inline]
fn clip(v: i32) -> u8 {
    const YUV_FIX2: i32 = 6;
    (v >> YUV_FIX2).clamp(0, 255) as u8
}

#[inline(always)]
fn yuv_to_r(y: u8, v: u8) -> u8 {
    clip(mulhi(y, 19077) + mulhi(v, 26149) - 14234)
}

#[inline(always)]
fn yuv_to_g(y: u8, u: u8, v: u8) -> u8 {
    clip(mulhi(y, 19077) - mulhi(u, 6419) - mulhi(v, 13320) + 8708)
}

#[inline(always)]
fn yuv_to_b(y: u8, u: u8) -> u8 {
    clip(mulhi(y, 19077) + mulhi(u, 33050) - 17685)
}

/// Nearest and second-nearest chroma sample for luma position `pos`.
#[inline]
fn chroma_taps(pos: usize, chroma_len: usize) -> (usize, usize) {
    let last = chroma_len - 1;
    if pos == 0 {
        return (0, 0);
    }
    let k = (pos - 1) / 2;
    let (near, far) = if (pos - 1) % 2 == 0 { (k, k + 1) } else { (k + 1, k) };
    (near.min(last), far.min(last))
}

#[inline]
fn fancy_chroma(main: u8, secondary1: u8, secondary2: u8, tertiary: u8) -> u8 {
    let sum = 9 * u16::from(main) + 3 * u16::from(secondary1) + 3 * u16::from(secondary2)
        + u16::from(tertiary);
    ((sum + 8) / 16) as u8
}

/// Fills an opaque RGBA buffer of `width * height` pixels from padded YUV planes.
pub(crate) fn fill_rgba_fancy(
    buffer: &mut [u8],
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    width: usize,
    height: usize,
    y_stride: usize,
    uv_stride: usize,
) {
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);

    for (y, row) in buffer.chunks_exact_mut(width * 4).take(height).enumerate() {
        let (near, far) = chroma_taps(y, chroma_height);
        let y_row = &y_plane[y * y_stride..][..width];
        let u_near = &u_plane[near * uv_stride..][..chroma_width];
        let u_far = &u_plane[far * uv_stride..][..chroma_width];
        let v_near = &v_plane[near * uv_stride..][..chroma_width];
        let v_far = &v_plane[far * uv_stride..][..chroma_width];

        for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
            let (cn, cf) = chroma_taps(x, chroma_width);
            let u = fancy_chroma(u_near[cn], u_near[cf], u_far[cn], u_far[cf]);
            let v = fancy_chroma(v_near[cn], v_near[cf], v_far[cn], v_far[cf]);
            let luma = y_row[x];
            pixel[0] = yuv_to_r(luma, v);
            pixel[1] = yuv_to_g(luma, u, v);
            pixel[2] = yuv_to_b(luma, u);
            pixel[3] = 255;
        }
    }
}

// values come from libwebp
// Y = 0.2568 * R + 0.5041 * G + 0.0979 * B + 16
// U = -0.1482 * R - 0.2910 * G + 0.4392 * B + 128
// V = 0.4392 * R - 0.3678 * G - 0.0714 * B + 128
// converted to 16 bit fixed point
const YUV_FIX: i32 = 16;
const YUV_HALF: i32 = 1 << (YUV_FIX - 1);

fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    let luma = 16839 * r + 33059 * g + 6420 * b;
    ((luma + YUV_HALF + (16 << YUV_FIX)) >> YUV_FIX) as u8
}

/// `r`, `g` and `b` are sums over four pixels.
fn rgb_to_u(r: i32, g: i32, b: i32) -> u8 {
    let u = -9719 * r - 19081 * g + 28800 * b + (128 << (YUV_FIX + 2));
    ((u + (YUV_HALF << 2)) >> (YUV_FIX + 2)).clamp(0, 255) as u8
}

fn rgb_to_v(r: i32, g: i32, b: i32) -> u8 {
    let v = 28800 * r - 24116 * g - 4684 * b + (128 << (YUV_FIX + 2));
    ((v + (YUV_HALF << 2)) >> (YUV_FIX + 2)).clamp(0, 255) as u8
}

/// YUV 4:2:0 planes padded to whole macroblocks.
pub(crate) struct YuvPlanes {
    pub(crate) y: Vec<u8>,
    pub(crate) u: Vec<u8>,
    pub(crate) v: Vec<u8>,
    pub(crate) y_stride: usize,
    pub(crate) uv_stride: usize,
}

/// Converts RGBA rows (`stride` bytes apart) to planes covering `mbw x mbh`
/// macroblocks. Pixels past the image edge replicate the last row and column.
pub(crate) fn rgba_to_yuv420(
    rgba: &[u8],
    width: usize,
    height: usize,
    stride: usize,
    mbw: usize,
    mbh: usize,
) -> YuvPlanes {
    let y_stride = mbw * 16;
    let uv_stride = mbw * 8;
    let mut y_plane = vec![0u8; y_stride * mbh * 16];
    let mut u_plane = vec![0u8; uv_stride * mbh * 8];
    let mut v_plane = vec![0u8; uv_stride * mbh * 8];

    let pixel = |x: usize, y: usize| -> [i32; 3] {
        let offset = y.min(height - 1) * stride + x.min(width - 1) * 4;
        [
            i32::from(rgba[offset]),
            i32::from(rgba[offset + 1]),
            i32::from(rgba[offset + 2]),
        ]
    };

    for y in 0..mbh * 16 {
        for x in 0..y_stride {
            let [r, g, b] = pixel(x, y);
            y_plane[y * y_stride + x] = rgb_to_y(r, g, b);
        }
    }

    for cy in 0..mbh * 8 {
        for cx in 0..uv_stride {
            let mut sum = [0i32; 3];
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let p = pixel(cx * 2 + dx, cy * 2 + dy);
                for c in 0..3 {
                    sum[c] += p[c];
                }
            }
            u_plane[cy * uv_stride + cx] = rgb_to_u(sum[0], sum[1], sum[2]);
            v_plane[cy * uv_stride + cx] = rgb_to_v(sum[0], sum[1], sum[2]);
        }
    }

    YuvPlanes {
        y: y_plane,
        u: u_plane,
        v: v_plane,
        y_stride,
        uv_stride,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fancy_grid() {
        #[rustfmt::skip]
        let y_plane = [
            77, 162, 202, 185,
            28, 13, 199, 182,
            135, 147, 164, 135,
            66, 27, 171, 130,
        ];

        #[rustfmt::skip]
        let u_plane = [
            34, 101,
            123, 163,
        ];

        #[rustfmt::skip]
        let v_plane = [
            97, 167,
            149, 23,
        ];

        let mut rgba = [0u8; 16 * 4];
        fill_rgba_fancy(&mut rgba, &y_plane, &u_plane, &v_plane, 4, 4, 4, 2);

        // top left pixel uses the first chroma sample directly
        assert_eq!(rgba[..4], [yuv_to_r(77, 97), yuv_to_g(77, 34, 97), yuv_to_b(77, 34), 255]);
        // (1, 1) interpolates all four samples 9:3:3:1
        let u = fancy_chroma(34, 101, 123, 163);
        let v = fancy_chroma(97, 167, 149, 23);
        let at = (4 + 1) * 4;
        assert_eq!(rgba[at..at + 3], [yuv_to_r(13, v), yuv_to_g(13, u, v), yuv_to_b(13, u)]);
        assert!(rgba.chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn chroma_taps_replicate_edges() {
        assert_eq!(chroma_taps(0, 2), (0, 0));
        assert_eq!(chroma_taps(1, 2), (0, 1));
        assert_eq!(chroma_taps(2, 2), (1, 0));
        assert_eq!(chroma_taps(3, 2), (1, 1));
        assert_eq!(chroma_taps(4, 3), (2, 1));
    }

    #[test]
    fn grey_roundtrips_through_yuv() {
        let rgba = [128u8, 128, 128, 255].repeat(4);
        let planes = rgba_to_yuv420(&rgba, 2, 2, 8, 1, 1);
        assert_eq!(planes.y.len(), 256);
        assert_eq!(planes.u[0], 128);
        assert_eq!(planes.v[0], 128);

        let mut out = [0u8; 16];
        fill_rgba_fancy(&mut out, &planes.y, &planes.u, &planes.v, 2, 2, 16, 8);
        for p in out.chunks_exact(4) {
            for c in &p[..3] {
                assert!(c.abs_diff(128) <= 2, "{p:?}");
            }
        }
    }

    #[test]
    fn primaries_convert_like_libwebp() {
        assert_eq!(rgb_to_y(0, 0, 0), 16);
        assert_eq!(rgb_to_y(255, 255, 255), 235);
        assert_eq!(rgb_to_u(0, 0, 0), 128);
        assert_eq!(rgb_to_v(4 * 255, 0, 0), 240);
    }
}
