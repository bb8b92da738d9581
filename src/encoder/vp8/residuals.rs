//! Quantization, reconstruction and token coding of macroblock residuals.
//!
//! The reconstruction here must match the decoder exactly, since later
//! macroblocks are predicted from it.

use crate::common::prediction::PredBlock;
use crate::common::transform;
use crate::common::types::*;
use crate::decoder::vp8::add_block;
use crate::encoder::arithmetic::BoolWriter;

/// Largest magnitude a DCT_CAT6 token can carry.
const MAX_LEVEL: i32 = 2048;

/// Quantized levels of one macroblock, raster order within each block.
pub(super) struct MacroblockLevels {
    pub(super) y2: [i32; 16],
    /// 16 Y, 4 U and 4 V blocks, in decoder order.
    pub(super) blocks: [[i32; 16]; 24],
}

impl MacroblockLevels {
    pub(super) fn is_empty(&self) -> bool {
        self.y2.iter().all(|&l| l == 0) && self.blocks.iter().flatten().all(|&l| l == 0)
    }
}

#[inline]
fn quantize(coeff: i32, step: i32) -> i32 {
    let level = (coeff.abs() + step / 2) / step;
    level.min(MAX_LEVEL) * coeff.signum()
}

/// Forward transform of `src - pred` for the 4x4 subblock at (`sbx`, `sby`).
fn residual_coeffs(src: &[u8], stride: usize, pred: &PredBlock, sbx: usize, sby: usize) -> [i32; 16] {
    let mut block: [i32; 16] = core::array::from_fn(|i| {
        let (x, y) = (sbx * 4 + i % 4, sby * 4 + i / 4);
        i32::from(src[y * stride + x]) - i32::from(pred.pixel(x, y))
    });
    transform::dct4x4(&mut block);
    block
}

/// Transforms and quantizes the luma residual. `src` starts at the
/// macroblock's top-left pixel. The luma DCs go through the Y2 block.
pub(super) fn quantize_luma(
    src: &[u8],
    stride: usize,
    pred: &PredBlock,
    quant: &QuantSteps,
    levels: &mut MacroblockLevels,
) {
    let mut dcs = [0i32; 16];
    for i in 0..16 {
        let coeffs = residual_coeffs(src, stride, pred, i % 4, i / 4);
        dcs[i] = coeffs[0];
        let block = &mut levels.blocks[i];
        block[0] = 0;
        for r in 1..16 {
            block[r] = quantize(coeffs[r], quant.yac);
        }
    }

    transform::wht4x4(&mut dcs);
    levels.y2[0] = quantize(dcs[0], quant.y2dc);
    for r in 1..16 {
        levels.y2[r] = quantize(dcs[r], quant.y2ac);
    }
}

/// Transforms and quantizes one chroma plane into blocks `base..base + 4`.
pub(super) fn quantize_chroma(
    src: &[u8],
    stride: usize,
    pred: &PredBlock,
    quant: &QuantSteps,
    levels: &mut MacroblockLevels,
    base: usize,
) {
    for i in 0..4 {
        let coeffs = residual_coeffs(src, stride, pred, i % 2, i / 2);
        let block = &mut levels.blocks[base + i];
        block[0] = quantize(coeffs[0], quant.uvdc);
        for r in 1..16 {
            block[r] = quantize(coeffs[r], quant.uvac);
        }
    }
}

/// Dequantizes the luma levels and adds them onto `pred`, as the decoder does.
pub(super) fn reconstruct_luma(pred: &mut PredBlock, levels: &MacroblockLevels, quant: &QuantSteps) {
    let mut dcs: [i32; 16] = core::array::from_fn(|r| {
        levels.y2[r] * if r == 0 { quant.y2dc } else { quant.y2ac }
    });
    transform::iwht4x4(&mut dcs);
    for i in 0..16 {
        let mut block: [i32; 16] = core::array::from_fn(|r| {
            if r == 0 {
                dcs[i]
            } else {
                levels.blocks[i][r] * quant.yac
            }
        });
        add_block(pred, i % 4, i / 4, &mut block);
    }
}

pub(super) fn reconstruct_chroma(
    pred: &mut PredBlock,
    levels: &MacroblockLevels,
    quant: &QuantSteps,
    base: usize,
) {
    for i in 0..4 {
        let mut block: [i32; 16] = core::array::from_fn(|r| {
            levels.blocks[base + i][r] * if r == 0 { quant.uvdc } else { quant.uvac }
        });
        add_block(pred, i % 2, i / 2, &mut block);
    }
}

/// Maps a magnitude onto its token and the extra bits that follow it.
fn magnitude_token(magnitude: i32) -> (i8, i32) {
    match magnitude {
        0..=4 => (magnitude as i8, 0),
        _ => {
            let cat = DCT_CAT_BASE
                .iter()
                .rposition(|&base| magnitude >= i32::from(base))
                .unwrap_or(0);
            (DCT_CAT1 + cat as i8, magnitude - i32::from(DCT_CAT_BASE[cat]))
        }
    }
}

/// Token-codes `levels[first..]` in zigzag order, the mirror of the decoder's
/// coefficient reader. Returns whether any coefficient was nonzero.
pub(super) fn write_coefficients(
    writer: &mut BoolWriter,
    levels: &[i32; 16],
    probs: &[[[Prob; NUM_DCT_TOKENS - 1]; 3]; 8],
    ctx: usize,
    first: usize,
) -> bool {
    let last = (first..16).rev().find(|&n| levels[usize::from(ZIGZAG[n])] != 0);
    let mut ctx = ctx;
    let mut skip_eob = false;

    let end = last.map_or(first, |last| last + 1);
    for n in first..end {
        let band_probs = &probs[usize::from(COEFF_BANDS[n])][ctx];
        let start = if skip_eob { 2 } else { 0 };
        let level = levels[usize::from(ZIGZAG[n])];
        let magnitude = level.abs();

        let (token, extra) = magnitude_token(magnitude);
        writer.write_tree_from(&DCT_TOKEN_TREE, band_probs, token, start);
        if token >= DCT_CAT1 {
            let cat_probs = &PROB_DCT_CAT[(token - DCT_CAT1) as usize];
            let bits = cat_probs.iter().take_while(|&&p| p > 0).count();
            for (i, &p) in cat_probs[..bits].iter().enumerate() {
                writer.write_bool((extra >> (bits - 1 - i)) & 1 != 0, p);
            }
        }

        if magnitude == 0 {
            ctx = 0;
            skip_eob = true;
            continue;
        }
        writer.write_flag(level < 0);
        ctx = if magnitude == 1 { 1 } else { 2 };
        skip_eob = false;
    }

    if end < 16 {
        let band_probs = &probs[usize::from(COEFF_BANDS[end])][ctx];
        writer.write_tree(&DCT_TOKEN_TREE, band_probs, DCT_EOB);
    }
    last.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::arithmetic::BoolReader;

    #[test]
    fn token_categories() {
        assert_eq!(magnitude_token(3), (DCT_3, 0));
        assert_eq!(magnitude_token(5), (DCT_CAT1, 0));
        assert_eq!(magnitude_token(6), (DCT_CAT1, 1));
        assert_eq!(magnitude_token(10), (DCT_CAT2, 3));
        assert_eq!(magnitude_token(67), (DCT_CAT6, 0));
        assert_eq!(magnitude_token(2048), (DCT_CAT6, 2048 - 67));
    }

    #[test]
    fn quantize_rounds_to_nearest() {
        assert_eq!(quantize(14, 10), 1);
        assert_eq!(quantize(15, 10), 2);
        assert_eq!(quantize(-15, 10), -2);
        assert_eq!(quantize(4, 10), 0);
        assert_eq!(quantize(1 << 20, 1), MAX_LEVEL);
    }

    /// Reads tokens back the way the decoder does, without dequantization.
    fn read_levels(reader: &mut BoolReader<'_>, probs: &[[[Prob; 11]; 3]; 8], first: usize) -> [i32; 16] {
        let mut out = [0i32; 16];
        let mut ctx = 0;
        let mut skip_eob = false;
        for n in first..16 {
            let start = if skip_eob { 2 } else { 0 };
            let token = reader.read_tree_from(&DCT_TOKEN_TREE, &probs[usize::from(COEFF_BANDS[n])][ctx], start);
            let magnitude = match token {
                DCT_EOB => break,
                DCT_0 => {
                    ctx = 0;
                    skip_eob = true;
                    continue;
                }
                DCT_1..=DCT_4 => i32::from(token),
                _ => {
                    let cat = (token - DCT_CAT1) as usize;
                    let extra = PROB_DCT_CAT[cat]
                        .iter()
                        .take_while(|&&p| p > 0)
                        .fold(0, |v, &p| (v << 1) | i32::from(reader.read_bool(p)));
                    i32::from(DCT_CAT_BASE[cat]) + extra
                }
            };
            ctx = if magnitude == 1 { 1 } else { 2 };
            skip_eob = false;
            out[usize::from(ZIGZAG[n])] = if reader.read_flag() { -magnitude } else { magnitude };
        }
        out
    }

    #[test]
    fn coefficients_survive_token_coding() {
        let mut levels = [0i32; 16];
        levels[0] = 7;
        levels[1] = -1;
        levels[4] = 300;
        levels[10] = -2048;

        let probs = &COEFF_PROBS[PLANE_Y_WITH_DC];
        let mut writer = BoolWriter::new();
        assert!(write_coefficients(&mut writer, &levels, probs, 0, 0));
        assert!(!write_coefficients(&mut writer, &[0; 16], probs, 0, 0));
        let bytes = writer.finish();

        let mut reader = BoolReader::new(&bytes);
        assert_eq!(read_levels(&mut reader, probs, 0), levels);
        assert_eq!(read_levels(&mut reader, probs, 0), [0; 16]);
    }
}
