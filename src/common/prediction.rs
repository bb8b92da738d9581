//! Intra prediction shared by the VP8 decoder and encoder.
//!
//! Prediction works on a bordered scratch block: row 0 holds the pixels
//! above the macroblock (plus four above-right pixels for luma), column 0
//! holds the pixels to its left, and the interior receives the prediction
//! followed by the residual. Frame edges are substituted with 127 (above)
//! and 129 (left).

use super::types::{IntraMode, LumaMode};

/// Row stride of a [`PredBlock`] buffer.
pub(crate) const PRED_STRIDE: usize = 32;
const PRED_ROWS: usize = 17;

/// A 16x16 (luma) or 8x8 (chroma) block with its prediction border.
#[derive(Clone)]
pub(crate) struct PredBlock {
    buf: [u8; PRED_STRIDE * PRED_ROWS],
    size: usize,
    has_top: bool,
    has_left: bool,
}

impl PredBlock {
    /// Gathers the border of macroblock (`mbx`, `mby`) from a reconstructed plane.
    ///
    /// `size` is 16 for luma and 8 for chroma. Only luma needs the above-right
    /// pixels, which come from the next macroblock's bottom row or are
    /// replicated from the last above pixel on the rightmost column.
    pub(crate) fn load(
        plane: &[u8],
        stride: usize,
        mbx: usize,
        mby: usize,
        mbw: usize,
        size: usize,
    ) -> Self {
        let mut buf = [0u8; PRED_STRIDE * PRED_ROWS];
        let x0 = mbx * size;
        let y0 = mby * size;

        if mby == 0 {
            buf[..PRED_STRIDE].fill(127);
        } else {
            let above = &plane[(y0 - 1) * stride..];
            buf[1..=size].copy_from_slice(&above[x0..x0 + size]);
            if size == 16 {
                if mbx + 1 == mbw {
                    let last = above[x0 + 15];
                    buf[17..21].fill(last);
                } else {
                    buf[17..21].copy_from_slice(&above[x0 + 16..x0 + 20]);
                }
            }
            buf[0] = if mbx == 0 { 129 } else { above[x0 - 1] };
        }

        for y in 0..size {
            buf[(y + 1) * PRED_STRIDE] = if mbx == 0 {
                129
            } else {
                plane[(y0 + y) * stride + x0 - 1]
            };
        }

        if size == 16 {
            // subblocks on the right column all see the macroblock's above-right pixels
            for row in [4, 8, 12] {
                buf.copy_within(17..21, row * PRED_STRIDE + 17);
            }
        }

        Self {
            buf,
            size,
            has_top: mby > 0,
            has_left: mbx > 0,
        }
    }

    #[inline]
    fn at(x: usize, y: usize) -> usize {
        (y + 1) * PRED_STRIDE + x + 1
    }

    /// Reconstructed pixel at (`x`, `y`) inside the block.
    #[inline]
    pub(crate) fn pixel(&self, x: usize, y: usize) -> u8 {
        self.buf[Self::at(x, y)]
    }

    /// Fills the whole block using one of the four 16x16/8x8 predictors.
    pub(crate) fn predict_whole(&mut self, mode: LumaMode) {
        let n = self.size;
        let top: [u8; 16] = core::array::from_fn(|i| self.buf[1 + i]);
        let left: [u8; 16] = core::array::from_fn(|i| self.buf[(i + 1) * PRED_STRIDE]);
        let corner = self.buf[0];

        match mode {
            LumaMode::DC | LumaMode::B => {
                let shift = n.trailing_zeros();
                let sum_top: u32 = top[..n].iter().map(|&v| u32::from(v)).sum();
                let sum_left: u32 = left[..n].iter().map(|&v| u32::from(v)).sum();
                let dc = match (self.has_top, self.has_left) {
                    (true, true) => (sum_top + sum_left + (1 << shift)) >> (shift + 1),
                    (true, false) => (sum_top + (1 << (shift - 1))) >> shift,
                    (false, true) => (sum_left + (1 << (shift - 1))) >> shift,
                    (false, false) => 128,
                };
                self.fill_with(|_, _| dc as u8);
            }
            LumaMode::V => self.fill_with(|x, _| top[x]),
            LumaMode::H => self.fill_with(|_, y| left[y]),
            LumaMode::TM => self.fill_with(|x, y| true_motion(left[y], top[x], corner)),
        }
    }

    fn fill_with(&mut self, f: impl Fn(usize, usize) -> u8) {
        for y in 0..self.size {
            for x in 0..self.size {
                self.buf[Self::at(x, y)] = f(x, y);
            }
        }
    }

    /// Predicts the 4x4 subblock whose top-left pixel is (`4*sbx`, `4*sby`).
    pub(crate) fn predict_subblock(&mut self, sbx: usize, sby: usize, mode: IntraMode) {
        let pos = Self::at(sbx * 4, sby * 4);
        let edges = Edges {
            above: core::array::from_fn(|i| self.buf[pos - PRED_STRIDE + i]),
            left: core::array::from_fn(|j| self.buf[pos - 1 + j * PRED_STRIDE]),
            corner: self.buf[pos - PRED_STRIDE - 1],
        };
        let pred = SUBBLOCK_PREDICTORS[mode as usize](&edges);
        for y in 0..4 {
            self.buf[pos + y * PRED_STRIDE..][..4].copy_from_slice(&pred[y * 4..][..4]);
        }
    }

    /// Adds an inverse-transformed residual to the 4x4 subblock at (`sbx`, `sby`).
    pub(crate) fn add_residual(&mut self, sbx: usize, sby: usize, residual: &[i32; 16]) {
        let pos = Self::at(sbx * 4, sby * 4);
        for y in 0..4 {
            for x in 0..4 {
                let p = &mut self.buf[pos + y * PRED_STRIDE + x];
                *p = (i32::from(*p) + residual[y * 4 + x]).clamp(0, 255) as u8;
            }
        }
    }

    /// Copies the 4x4 prediction at (`sbx`, `sby`) out of the block.
    pub(crate) fn subblock(&self, sbx: usize, sby: usize) -> [u8; 16] {
        core::array::from_fn(|i| self.pixel(sbx * 4 + i % 4, sby * 4 + i / 4))
    }

    /// Writes the block interior back into the plane.
    pub(crate) fn store(&self, plane: &mut [u8], stride: usize, mbx: usize, mby: usize) {
        let n = self.size;
        for y in 0..n {
            let row = (mby * n + y) * stride + mbx * n;
            let src = Self::at(0, y);
            plane[row..row + n].copy_from_slice(&self.buf[src..src + n]);
        }
    }
}

#[inline]
fn true_motion(left: u8, top: u8, corner: u8) -> u8 {
    (i32::from(left) + i32::from(top) - i32::from(corner)).clamp(0, 255) as u8
}

/// Neighbourhood of a 4x4 subblock: eight pixels above (four above-right),
/// four to the left and the above-left corner.
struct Edges {
    above: [u8; 8],
    left: [u8; 4],
    corner: u8,
}

#[inline]
fn avg2(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b) + 1) >> 1) as u8
}

#[inline]
fn avg3(a: u8, b: u8, c: u8) -> u8 {
    ((u16::from(a) + 2 * u16::from(b) + u16::from(c) + 2) >> 2) as u8
}

type SubblockPredictor = fn(&Edges) -> [u8; 16];

/// Indexed by [`IntraMode`] discriminant.
static SUBBLOCK_PREDICTORS: [SubblockPredictor; 10] = [
    predict_dc4,
    predict_tm4,
    predict_ve4,
    predict_he4,
    predict_ld4,
    predict_rd4,
    predict_vr4,
    predict_vl4,
    predict_hd4,
    predict_hu4,
];

fn predict_dc4(e: &Edges) -> [u8; 16] {
    let sum: u32 = e.above[..4]
        .iter()
        .chain(e.left.iter())
        .map(|&v| u32::from(v))
        .sum();
    [((sum + 4) >> 3) as u8; 16]
}

fn predict_tm4(e: &Edges) -> [u8; 16] {
    core::array::from_fn(|i| true_motion(e.left[i / 4], e.above[i % 4], e.corner))
}

fn predict_ve4(e: &Edges) -> [u8; 16] {
    let a = &e.above;
    let row = [
        avg3(e.corner, a[0], a[1]),
        avg3(a[0], a[1], a[2]),
        avg3(a[1], a[2], a[3]),
        avg3(a[2], a[3], a[4]),
    ];
    core::array::from_fn(|i| row[i % 4])
}

fn predict_he4(e: &Edges) -> [u8; 16] {
    let l = &e.left;
    let col = [
        avg3(e.corner, l[0], l[1]),
        avg3(l[0], l[1], l[2]),
        avg3(l[1], l[2], l[3]),
        avg3(l[2], l[3], l[3]),
    ];
    core::array::from_fn(|i| col[i / 4])
}

fn predict_ld4(e: &Edges) -> [u8; 16] {
    let a = &e.above;
    core::array::from_fn(|i| {
        let k = i % 4 + i / 4;
        if k < 6 {
            avg3(a[k], a[k + 1], a[k + 2])
        } else {
            avg3(a[6], a[7], a[7])
        }
    })
}

fn predict_rd4(e: &Edges) -> [u8; 16] {
    let (a, l) = (&e.above, &e.left);
    let edge = [l[3], l[2], l[1], l[0], e.corner, a[0], a[1], a[2], a[3]];
    core::array::from_fn(|i| {
        let k = 3 + i % 4 - i / 4;
        avg3(edge[k], edge[k + 1], edge[k + 2])
    })
}

// The remaining diagonal predictors are written out pixel by pixel,
// `out[y * 4 + x]`, since their taps do not follow one closed form.

fn predict_vr4(e: &Edges) -> [u8; 16] {
    let (a, l, p) = (&e.above, &e.left, e.corner);
    let mut out = [0u8; 16];
    out[0] = avg2(p, a[0]);
    out[9] = out[0];
    out[1] = avg2(a[0], a[1]);
    out[10] = out[1];
    out[2] = avg2(a[1], a[2]);
    out[11] = out[2];
    out[3] = avg2(a[2], a[3]);
    out[12] = avg3(l[2], l[1], l[0]);
    out[8] = avg3(l[1], l[0], p);
    out[4] = avg3(l[0], p, a[0]);
    out[13] = out[4];
    out[5] = avg3(p, a[0], a[1]);
    out[14] = out[5];
    out[6] = avg3(a[0], a[1], a[2]);
    out[15] = out[6];
    out[7] = avg3(a[1], a[2], a[3]);
    out
}

fn predict_vl4(e: &Edges) -> [u8; 16] {
    let a = &e.above;
    let mut out = [0u8; 16];
    out[0] = avg2(a[0], a[1]);
    out[1] = avg2(a[1], a[2]);
    out[8] = out[1];
    out[2] = avg2(a[2], a[3]);
    out[9] = out[2];
    out[3] = avg2(a[3], a[4]);
    out[10] = out[3];
    out[4] = avg3(a[0], a[1], a[2]);
    out[5] = avg3(a[1], a[2], a[3]);
    out[12] = out[5];
    out[6] = avg3(a[2], a[3], a[4]);
    out[13] = out[6];
    out[7] = avg3(a[3], a[4], a[5]);
    out[14] = out[7];
    out[11] = avg3(a[4], a[5], a[6]);
    out[15] = avg3(a[5], a[6], a[7]);
    out
}

fn predict_hd4(e: &Edges) -> [u8; 16] {
    let (a, l, p) = (&e.above, &e.left, e.corner);
    let mut out = [0u8; 16];
    out[0] = avg2(l[0], p);
    out[6] = out[0];
    out[4] = avg2(l[1], l[0]);
    out[10] = out[4];
    out[8] = avg2(l[2], l[1]);
    out[14] = out[8];
    out[12] = avg2(l[3], l[2]);
    out[3] = avg3(a[0], a[1], a[2]);
    out[2] = avg3(p, a[0], a[1]);
    out[1] = avg3(l[0], p, a[0]);
    out[7] = out[1];
    out[5] = avg3(l[1], l[0], p);
    out[11] = out[5];
    out[9] = avg3(l[2], l[1], l[0]);
    out[15] = out[9];
    out[13] = avg3(l[3], l[2], l[1]);
    out
}

fn predict_hu4(e: &Edges) -> [u8; 16] {
    let l = &e.left;
    let mut out = [l[3]; 16];
    out[0] = avg2(l[0], l[1]);
    out[2] = avg2(l[1], l[2]);
    out[4] = out[2];
    out[6] = avg2(l[2], l[3]);
    out[8] = out[6];
    out[1] = avg3(l[0], l[1], l[2]);
    out[3] = avg3(l[1], l[2], l[3]);
    out[5] = out[3];
    out[7] = avg3(l[2], l[3], l[3]);
    out[9] = out[7];
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{vec, vec::Vec};

    fn plane_with(width: usize, height: usize, f: impl Fn(usize, usize) -> u8) -> Vec<u8> {
        let mut v = vec![0u8; width * height];
        for y in 0..height {
            for x in 0..width {
                v[y * width + x] = f(x, y);
            }
        }
        v
    }

    #[test]
    fn frame_corner_uses_substitute_edges() {
        let plane = vec![0u8; 32 * 32];
        let mut block = PredBlock::load(&plane, 32, 0, 0, 2, 16);
        block.predict_whole(LumaMode::V);
        assert!((0..16).all(|x| block.pixel(x, 5) == 127));
        block.predict_whole(LumaMode::H);
        assert!((0..16).all(|y| block.pixel(3, y) == 129));
        block.predict_whole(LumaMode::DC);
        assert_eq!(block.pixel(7, 7), 128);
    }

    #[test]
    fn dc_uses_only_available_edges() {
        let plane = plane_with(32, 32, |_, _| 60);
        let mut block = PredBlock::load(&plane, 32, 1, 0, 2, 16);
        block.predict_whole(LumaMode::DC);
        assert_eq!(block.pixel(0, 0), 60);

        let mut chroma = PredBlock::load(&plane, 32, 0, 1, 4, 8);
        chroma.predict_whole(LumaMode::DC);
        assert_eq!(chroma.pixel(7, 7), 60);
    }

    #[test]
    fn rightmost_macroblock_replicates_above_right() {
        let plane = plane_with(16, 32, |x, _| x as u8 * 10);
        let block = PredBlock::load(&plane, 16, 0, 1, 1, 16);
        for i in 17..21 {
            assert_eq!(block.buf[i], 150);
            assert_eq!(block.buf[4 * PRED_STRIDE + i], 150);
        }
    }

    #[test]
    fn true_motion_clamps() {
        let e = Edges {
            above: [250; 8],
            left: [250; 4],
            corner: 10,
        };
        assert_eq!(predict_tm4(&e), [255; 16]);
    }

    #[test]
    fn flat_neighbourhood_predicts_flat_for_every_mode() {
        let e = Edges {
            above: [77; 8],
            left: [77; 4],
            corner: 77,
        };
        for predictor in SUBBLOCK_PREDICTORS {
            assert_eq!(predictor(&e), [77; 16]);
        }
    }

    #[test]
    fn residual_is_clamped_and_stored() {
        let mut plane = vec![0u8; 16 * 16];
        let mut block = PredBlock::load(&plane, 16, 0, 0, 1, 16);
        block.predict_whole(LumaMode::DC);
        let mut residual = [0i32; 16];
        residual[0] = 500;
        residual[1] = -500;
        block.add_residual(0, 0, &residual);
        block.store(&mut plane, 16, 0, 0);
        assert_eq!(plane[0], 255);
        assert_eq!(plane[1], 0);
        assert_eq!(plane[2], 128);
    }
}
