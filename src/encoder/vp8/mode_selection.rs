//! Intra mode selection.
//!
//! Every macroblock is predicted as a whole: the 16x16 luma mode and the
//! shared 8x8 chroma mode are each the one with the lowest sum of absolute
//! differences against the source. Ties keep the earlier mode in
//! DC, V, H, TM order.

use crate::common::prediction::PredBlock;
use crate::common::types::{ChromaMode, LumaMode};

const WHOLE_BLOCK_MODES: [LumaMode; 4] = [LumaMode::DC, LumaMode::V, LumaMode::H, LumaMode::TM];

/// Sum of absolute differences between the predicted block and the source
/// block starting at `src[0]`.
fn sad(pred: &PredBlock, src: &[u8], stride: usize, size: usize) -> u32 {
    let mut sum = 0;
    for y in 0..size {
        let row = &src[y * stride..y * stride + size];
        for (x, &s) in row.iter().enumerate() {
            sum += u32::from(s.abs_diff(pred.pixel(x, y)));
        }
    }
    sum
}

/// Picks the 16x16 luma mode. `border` holds the loaded neighbourhood and is
/// returned predicted with the winning mode.
pub(super) fn pick_luma_mode(border: &PredBlock, src: &[u8], stride: usize) -> (LumaMode, PredBlock) {
    let mut best: Option<(u32, LumaMode, PredBlock)> = None;
    for mode in WHOLE_BLOCK_MODES {
        let mut candidate = border.clone();
        candidate.predict_whole(mode);
        let score = sad(&candidate, src, stride, 16);
        if best.as_ref().map_or(true, |(s, _, _)| score < *s) {
            best = Some((score, mode, candidate));
        }
    }
    match best {
        Some((_, mode, pred)) => (mode, pred),
        None => (LumaMode::DC, border.clone()),
    }
}

/// Picks one chroma mode for both planes by their combined SAD.
pub(super) fn pick_chroma_mode(
    borders: [&PredBlock; 2],
    srcs: [&[u8]; 2],
    stride: usize,
) -> (ChromaMode, [PredBlock; 2]) {
    let mut best: Option<(u32, ChromaMode, [PredBlock; 2])> = None;
    for mode in [ChromaMode::DC, ChromaMode::V, ChromaMode::H, ChromaMode::TM] {
        let preds = borders.map(|border| {
            let mut candidate = border.clone();
            candidate.predict_whole(mode.as_luma());
            candidate
        });
        let score = sad(&preds[0], srcs[0], stride, 8) + sad(&preds[1], srcs[1], stride, 8);
        if best.as_ref().map_or(true, |(s, _, _)| score < *s) {
            best = Some((score, mode, preds));
        }
    }
    match best {
        Some((_, mode, preds)) => (mode, preds),
        None => (ChromaMode::DC, borders.map(PredBlock::clone)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn vertical_stripes_pick_vertical() {
        // a column of two macroblocks, so the lower one has a real top border
        let stride = 16;
        let mut plane = vec![0u8; stride * 32];
        for y in 0..32 {
            for x in 0..16 {
                plane[y * stride + x] = if x % 2 == 0 { 200 } else { 30 };
            }
        }
        let border = PredBlock::load(&plane, stride, 0, 1, 1, 16);
        let (mode, pred) = pick_luma_mode(&border, &plane[16 * stride..], stride);
        assert_eq!(mode, LumaMode::V);
        assert_eq!(pred.pixel(0, 5), 200);
        assert_eq!(pred.pixel(1, 5), 30);
    }

    #[test]
    fn flat_block_keeps_dc() {
        let plane = vec![128u8; 8 * 8];
        let border = PredBlock::load(&plane, 8, 0, 0, 1, 8);
        let (mode, _) = pick_chroma_mode([&border, &border], [&plane, &plane], 8);
        assert_eq!(mode, ChromaMode::DC);
    }
}
