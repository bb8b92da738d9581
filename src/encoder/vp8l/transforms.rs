//! Forward VP8L transforms.
//!
//! Each function here is the exact inverse of the decoder's transform of the
//! same name, so the decoder's code is reused for predictions and the color
//! transform arithmetic.

use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use hashbrown::HashSet;

use crate::decoder::lossless_transform::{
    color_index_bits, neighbors, subsample_size, ColorTransformElement, PREDICTORS,
};

/// Number of predictor modes an encoder may choose from.
const NUM_PREDICTORS: usize = 14;

/// Per-channel difference modulo 256.
#[inline]
pub(super) fn sub_pixels(a: u32, b: u32) -> u32 {
    let alpha_green = (a | 0x00ff_00ff).wrapping_sub(b & 0xff00_ff00);
    let red_blue = (a | 0xff00_ff00).wrapping_sub(b & 0x00ff_00ff);
    (alpha_green & 0xff00_ff00) | (red_blue & 0x00ff_00ff)
}

/// Sum of the channel magnitudes of a residual, channels read as signed bytes.
#[inline]
fn residual_cost(residual: u32) -> u32 {
    residual
        .to_le_bytes()
        .iter()
        .map(|&c| u32::from((c as i8).unsigned_abs()))
        .sum()
}

/// The distinct colors of `argb`, sorted, if there are at most `limit`.
pub(super) fn collect_palette(argb: &[u32], limit: usize) -> Option<Vec<u32>> {
    let mut colors = HashSet::new();
    for &pixel in argb {
        if colors.insert(pixel) && colors.len() > limit {
            return None;
        }
    }
    let mut palette: Vec<u32> = colors.into_iter().collect();
    palette.sort_unstable();
    Some(palette)
}

/// The palette as stored: every entry after the first is a delta.
pub(super) fn palette_deltas(palette: &[u32]) -> Vec<u32> {
    let mut deltas = palette.to_vec();
    for i in (1..deltas.len()).rev() {
        deltas[i] = sub_pixels(palette[i], palette[i - 1]);
    }
    deltas
}

/// Replaces pixels by their palette indices and packs several indices per
/// green byte when the palette is small. Returns the packed image and its width.
pub(super) fn bundle_palette_indices(
    argb: &[u32],
    width: usize,
    height: usize,
    palette: &[u32],
) -> (Vec<u32>, usize) {
    let (bits_per_pixel, width_bits) = color_index_bits(palette.len());
    let packed_width = subsample_size(width as u32, width_bits) as usize;
    let per_word = 1usize << width_bits;

    let mut packed = vec![0xff00_0000u32; packed_width * height];
    for (row, packed_row) in argb.chunks_exact(width).zip(packed.chunks_exact_mut(packed_width)) {
        for (x, pixel) in row.iter().enumerate() {
            let index = palette.binary_search(pixel).unwrap_or(0) as u32;
            let shift = 8 + (x & (per_word - 1)) as u32 * u32::from(bits_per_pixel);
            packed_row[x >> width_bits] |= index << shift;
        }
    }
    (packed, packed_width)
}

pub(super) fn subtract_green(pixels: &mut [u32]) {
    for pixel in pixels {
        let green = (*pixel >> 8) & 0xff;
        *pixel = sub_pixels(*pixel, (green << 16) | green);
    }
}

/// Prediction the decoder will use for `index` with `mode`, including the
/// fixed modes of the first row and column.
#[inline]
fn predict(argb: &[u32], width: usize, index: usize, mode: usize) -> u32 {
    let (x, y) = (index % width, index / width);
    match (x, y) {
        (0, 0) => 0xff00_0000,
        (_, 0) => argb[index - 1],
        (0, _) => argb[index - width],
        _ => PREDICTORS[mode](&neighbors(argb, index, width)),
    }
}

fn block_indices(rows: Range<usize>, cols: Range<usize>, width: usize) -> impl Iterator<Item = usize> {
    rows.flat_map(move |y| cols.clone().map(move |x| y * width + x))
}

/// Chooses a predictor per `1 << size_bits` block and returns the residuals
/// with the mode sub-image.
pub(super) fn apply_predictor(
    argb: &[u32],
    width: usize,
    height: usize,
    size_bits: u8,
) -> (Vec<u32>, Vec<u32>) {
    let block = 1usize << size_bits;
    let tiles_x = subsample_size(width as u32, size_bits) as usize;
    let tiles_y = subsample_size(height as u32, size_bits) as usize;
    let mut modes = vec![0xff00_0000u32; tiles_x * tiles_y];
    let mut residuals = vec![0u32; argb.len()];

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let rows = ty * block..((ty + 1) * block).min(height);
            let cols = tx * block..((tx + 1) * block).min(width);
            let mut best = (u32::MAX, 0usize);
            for mode in 0..NUM_PREDICTORS {
                let cost: u32 = block_indices(rows.clone(), cols.clone(), width)
                    .map(|i| residual_cost(sub_pixels(argb[i], predict(argb, width, i, mode))))
                    .sum();
                if cost < best.0 {
                    best = (cost, mode);
                }
            }

            let mode = best.1;
            modes[ty * tiles_x + tx] |= (mode as u32) << 8;
            for i in block_indices(rows.clone(), cols.clone(), width) {
                residuals[i] = sub_pixels(argb[i], predict(argb, width, i, mode));
            }
        }
    }
    (residuals, modes)
}

/// Multipliers tried for each color transform coefficient.
fn multiplier_candidates() -> impl Iterator<Item = u8> {
    (-64i32..=64).step_by(4).map(|m| m as i8 as u8)
}

/// Improves one coefficient of `start`, the others held fixed.
fn best_element(
    start: ColorTransformElement,
    cost: impl Fn(ColorTransformElement) -> u32,
    set: impl Fn(&mut ColorTransformElement, u8),
) -> ColorTransformElement {
    let mut best = (cost(start), start);
    for m in multiplier_candidates() {
        let mut candidate = start;
        set(&mut candidate, m);
        let c = cost(candidate);
        if c < best.0 {
            best = (c, candidate);
        }
    }
    best.1
}

/// Decorrelates red and blue from green per block, in place. Returns the
/// multiplier sub-image.
pub(super) fn apply_color_transform(
    pixels: &mut [u32],
    width: usize,
    height: usize,
    size_bits: u8,
) -> Vec<u32> {
    let block = 1usize << size_bits;
    let tiles_x = subsample_size(width as u32, size_bits) as usize;
    let tiles_y = subsample_size(height as u32, size_bits) as usize;
    let mut image = Vec::with_capacity(tiles_x * tiles_y);

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let rows = ty * block..((ty + 1) * block).min(height);
            let cols = tx * block..((tx + 1) * block).min(width);
            let block_pixels: Vec<u32> = rows
                .flat_map(|y| pixels[y * width + cols.start..y * width + cols.end].iter().copied())
                .collect();

            let red_cost = |e: ColorTransformElement| {
                block_pixels.iter().map(|&p| residual_cost(e.forward(p) & 0x00ff_0000)).sum()
            };
            let blue_cost = |e: ColorTransformElement| {
                block_pixels.iter().map(|&p| residual_cost(e.forward(p) & 0xff)).sum()
            };

            let element = ColorTransformElement::default();
            let element = best_element(element, red_cost, |e, m| e.green_to_red = m);
            let element = best_element(element, blue_cost, |e, m| e.green_to_blue = m);
            let element = best_element(element, blue_cost, |e, m| e.red_to_blue = m);

            image.push(element.to_argb());
            for y in ty * block..((ty + 1) * block).min(height) {
                for pixel in &mut pixels[y * width + cols.start..y * width + cols.end] {
                    *pixel = element.forward(*pixel);
                }
            }
        }
    }
    image
}
