//! In-loop deblocking filter (RFC 6386 section 15).
//!
//! Every filter looks at the pixels straddling one edge: `p3 p2 p1 p0 | q0 q1 q2 q3`,
//! addressed from the position of `q0` and a `step` that is 1 across vertical
//! edges and the plane stride across horizontal edges.

/// Per-macroblock filter strength derived from level, sharpness and deltas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct MacroblockFilter {
    /// `2 * level + interior`; macroblock edges use `limit + 4`.
    pub(crate) limit: i32,
    pub(crate) interior: i32,
    pub(crate) hev_threshold: i32,
    /// Whether the inner 4x4 edges are filtered too.
    pub(crate) inner: bool,
}

impl MacroblockFilter {
    /// Strength for a final (clamped) level; `None` when the macroblock is left unfiltered.
    pub(crate) fn new(level: i32, sharpness: u8, inner: bool) -> Option<Self> {
        if level <= 0 {
            return None;
        }
        let mut interior = level;
        if sharpness > 0 {
            interior >>= if sharpness > 4 { 2 } else { 1 };
            interior = interior.min(9 - i32::from(sharpness));
        }
        let interior = interior.max(1);
        let hev_threshold = if level >= 40 {
            2
        } else if level >= 15 {
            1
        } else {
            0
        };
        Some(Self {
            limit: 2 * level + interior,
            interior,
            hev_threshold,
            inner,
        })
    }
}

#[inline]
fn clamp_s8(v: i32) -> i32 {
    v.clamp(-128, 127)
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn px(buf: &[u8], pos: usize, offset: isize) -> i32 {
    i32::from(buf[pos.wrapping_add_signed(offset)])
}

#[inline]
fn set(buf: &mut [u8], pos: usize, offset: isize, v: i32) {
    buf[pos.wrapping_add_signed(offset)] = clamp_u8(v);
}

/// `4|p0-q0| + |p1-q1| <= 2*limit + 1`
#[inline]
fn edge_below_limit(buf: &[u8], pos: usize, step: isize, limit: i32) -> bool {
    let p1 = px(buf, pos, -2 * step);
    let p0 = px(buf, pos, -step);
    let q0 = px(buf, pos, 0);
    let q1 = px(buf, pos, step);
    4 * (p0 - q0).abs() + (p1 - q1).abs() <= 2 * limit + 1
}

#[inline]
fn should_filter(buf: &[u8], pos: usize, step: isize, limit: i32, interior: i32) -> bool {
    if !edge_below_limit(buf, pos, step, limit) {
        return false;
    }
    let p: [i32; 4] = core::array::from_fn(|i| px(buf, pos, -(i as isize + 1) * step));
    let q: [i32; 4] = core::array::from_fn(|i| px(buf, pos, i as isize * step));
    (0..3).all(|i| (p[i + 1] - p[i]).abs() <= interior && (q[i + 1] - q[i]).abs() <= interior)
}

#[inline]
fn high_edge_variance(buf: &[u8], pos: usize, step: isize, threshold: i32) -> bool {
    (px(buf, pos, -2 * step) - px(buf, pos, -step)).abs() > threshold
        || (px(buf, pos, step) - px(buf, pos, 0)).abs() > threshold
}

/// Adjusts p0 and q0 using the outer taps.
#[inline]
fn filter_common(buf: &mut [u8], pos: usize, step: isize) {
    let p1 = px(buf, pos, -2 * step);
    let p0 = px(buf, pos, -step);
    let q0 = px(buf, pos, 0);
    let q1 = px(buf, pos, step);
    let a = 3 * (q0 - p0) + clamp_s8(p1 - q1);
    let a1 = ((a + 4) >> 3).clamp(-16, 15);
    let a2 = ((a + 3) >> 3).clamp(-16, 15);
    set(buf, pos, -step, p0 + a2);
    set(buf, pos, 0, q0 - a1);
}

/// Subblock edge without high edge variance: moves p1..q1.
#[inline]
fn filter_subblock(buf: &mut [u8], pos: usize, step: isize) {
    let p1 = px(buf, pos, -2 * step);
    let p0 = px(buf, pos, -step);
    let q0 = px(buf, pos, 0);
    let q1 = px(buf, pos, step);
    let a = 3 * (q0 - p0);
    let a1 = ((a + 4) >> 3).clamp(-16, 15);
    let a2 = ((a + 3) >> 3).clamp(-16, 15);
    let a3 = (a1 + 1) >> 1;
    set(buf, pos, -2 * step, p1 + a3);
    set(buf, pos, -step, p0 + a2);
    set(buf, pos, 0, q0 - a1);
    set(buf, pos, step, q1 - a3);
}

/// Macroblock edge without high edge variance: moves p2..q2 with 27/18/9 weights.
#[inline]
fn filter_macroblock_edge(buf: &mut [u8], pos: usize, step: isize) {
    let p2 = px(buf, pos, -3 * step);
    let p1 = px(buf, pos, -2 * step);
    let p0 = px(buf, pos, -step);
    let q0 = px(buf, pos, 0);
    let q1 = px(buf, pos, step);
    let q2 = px(buf, pos, 2 * step);
    let w = clamp_s8(3 * (q0 - p0) + clamp_s8(p1 - q1));
    let a1 = (27 * w + 63) >> 7;
    let a2 = (18 * w + 63) >> 7;
    let a3 = (9 * w + 63) >> 7;
    set(buf, pos, -3 * step, p2 + a3);
    set(buf, pos, -2 * step, p1 + a2);
    set(buf, pos, -step, p0 + a1);
    set(buf, pos, 0, q0 - a1);
    set(buf, pos, step, q1 - a2);
    set(buf, pos, 2 * step, q2 - a3);
}

#[derive(Clone, Copy)]
enum EdgeKind {
    Macroblock,
    Subblock,
}

/// Filters `len` pixels along one edge. `start` is the first q0, `along` moves
/// to the next pixel on the edge and `step` crosses it.
fn filter_normal_edge(
    buf: &mut [u8],
    start: usize,
    along: usize,
    step: isize,
    len: usize,
    f: &MacroblockFilter,
    kind: EdgeKind,
) {
    let limit = match kind {
        EdgeKind::Macroblock => f.limit + 4,
        EdgeKind::Subblock => f.limit,
    };
    for i in 0..len {
        let pos = start + i * along;
        if !should_filter(buf, pos, step, limit, f.interior) {
            continue;
        }
        if high_edge_variance(buf, pos, step, f.hev_threshold) {
            filter_common(buf, pos, step);
        } else {
            match kind {
                EdgeKind::Macroblock => filter_macroblock_edge(buf, pos, step),
                EdgeKind::Subblock => filter_subblock(buf, pos, step),
            }
        }
    }
}

fn filter_simple_edge(buf: &mut [u8], start: usize, along: usize, step: isize, limit: i32) {
    for i in 0..16 {
        let pos = start + i * along;
        if edge_below_limit(buf, pos, step, limit) {
            filter_common(buf, pos, step);
        }
    }
}

/// Filters the luma edges of one macroblock: left edge, inner vertical edges,
/// top edge, inner horizontal edges.
pub(crate) fn filter_luma(
    plane: &mut [u8],
    stride: usize,
    mbx: usize,
    mby: usize,
    f: &MacroblockFilter,
    simple: bool,
) {
    let origin = mby * 16 * stride + mbx * 16;
    let row = stride as isize;
    if simple {
        if mbx > 0 {
            filter_simple_edge(plane, origin, stride, 1, f.limit + 4);
        }
        if f.inner {
            for x in [4, 8, 12] {
                filter_simple_edge(plane, origin + x, stride, 1, f.limit);
            }
        }
        if mby > 0 {
            filter_simple_edge(plane, origin, 1, row, f.limit + 4);
        }
        if f.inner {
            for y in [4, 8, 12] {
                filter_simple_edge(plane, origin + y * stride, 1, row, f.limit);
            }
        }
        return;
    }

    if mbx > 0 {
        filter_normal_edge(plane, origin, stride, 1, 16, f, EdgeKind::Macroblock);
    }
    if f.inner {
        for x in [4, 8, 12] {
            filter_normal_edge(plane, origin + x, stride, 1, 16, f, EdgeKind::Subblock);
        }
    }
    if mby > 0 {
        filter_normal_edge(plane, origin, 1, row, 16, f, EdgeKind::Macroblock);
    }
    if f.inner {
        for y in [4, 8, 12] {
            let start = origin + y * stride;
            filter_normal_edge(plane, start, 1, row, 16, f, EdgeKind::Subblock);
        }
    }
}

/// Chroma counterpart of [`filter_luma`]; only the normal filter touches chroma.
pub(crate) fn filter_chroma(
    plane: &mut [u8],
    stride: usize,
    mbx: usize,
    mby: usize,
    f: &MacroblockFilter,
) {
    let origin = mby * 8 * stride + mbx * 8;
    let row = stride as isize;
    if mbx > 0 {
        filter_normal_edge(plane, origin, stride, 1, 8, f, EdgeKind::Macroblock);
    }
    if f.inner {
        filter_normal_edge(plane, origin + 4, stride, 1, 8, f, EdgeKind::Subblock);
    }
    if mby > 0 {
        filter_normal_edge(plane, origin, 1, row, 8, f, EdgeKind::Macroblock);
    }
    if f.inner {
        filter_normal_edge(plane, origin + 4 * stride, 1, row, 8, f, EdgeKind::Subblock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn strength_follows_level_and_sharpness() {
        assert_eq!(MacroblockFilter::new(0, 0, true), None);
        let f = MacroblockFilter::new(20, 0, false).unwrap();
        assert_eq!((f.interior, f.limit, f.hev_threshold), (20, 60, 1));
        let f = MacroblockFilter::new(63, 5, true).unwrap();
        assert_eq!((f.interior, f.limit, f.hev_threshold), (4, 130, 2));
        let f = MacroblockFilter::new(2, 3, true).unwrap();
        assert_eq!(f.interior, 1);
    }

    #[test]
    fn small_step_is_smoothed() {
        // two flat 16x16 macroblocks side by side with a step of 8 at x = 16
        let stride = 32;
        let mut plane = vec![0u8; stride * 16];
        for y in 0..16 {
            for x in 0..stride {
                plane[y * stride + x] = if x < 16 { 100 } else { 108 };
            }
        }
        let f = MacroblockFilter::new(30, 0, false).unwrap();
        filter_luma(&mut plane, stride, 1, 0, &f, false);
        let row = &plane[..stride];
        assert!(row[15] > 100 && row[16] < 108, "{:?}", &row[12..20]);
        assert!(row[13] >= 100 && row[18] <= 108);
        // untouched far away from the edge
        assert_eq!(row[0], 100);
        assert_eq!(row[31], 108);
    }

    #[test]
    fn strong_edge_is_preserved() {
        let stride = 32;
        let mut plane = vec![0u8; stride * 16];
        for y in 0..16 {
            for x in 16..stride {
                plane[y * stride + x] = 200;
            }
        }
        let before = plane.clone();
        let f = MacroblockFilter::new(10, 0, true).unwrap();
        filter_luma(&mut plane, stride, 1, 0, &f, false);
        filter_luma(&mut plane, stride, 1, 0, &f, true);
        assert_eq!(plane, before);
    }

    #[test]
    fn simple_filter_only_moves_p0_and_q0() {
        let stride = 16;
        let mut plane = vec![50u8; stride * 32];
        for v in &mut plane[stride * 16..] {
            *v = 56;
        }
        let f = MacroblockFilter::new(20, 0, false).unwrap();
        filter_luma(&mut plane, stride, 0, 1, &f, true);
        assert_eq!(plane[14 * stride], 50);
        assert_eq!(plane[17 * stride], 56);
        assert!(plane[15 * stride] > 50);
        assert!(plane[16 * stride] < 56);
    }
}
