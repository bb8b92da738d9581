//! Inverse VP8L transforms over ARGB pixels (`0xAARRGGBB`).
//!
//! Predictor and color transforms read their parameters from a sub-image
//! holding one entry per `1 << size_bits` square block.

use alloc::vec;
use alloc::vec::Vec;

#[inline]
pub(crate) fn subsample_size(size: u32, bits: u8) -> u32 {
    size.div_ceil(1 << bits)
}

#[inline]
fn channels(p: u32) -> [i32; 4] {
    [
        (p >> 24) as i32,
        ((p >> 16) & 0xff) as i32,
        ((p >> 8) & 0xff) as i32,
        (p & 0xff) as i32,
    ]
}

#[inline]
fn pack(c: [i32; 4]) -> u32 {
    c.iter().fold(0u32, |acc, &v| (acc << 8) | (v as u32 & 0xff))
}

/// Per-channel sum modulo 256.
#[inline]
pub(crate) fn add_pixels(a: u32, b: u32) -> u32 {
    let alpha_green = (a & 0xff00ff00).wrapping_add(b & 0xff00ff00);
    let red_blue = (a & 0x00ff00ff).wrapping_add(b & 0x00ff00ff);
    (alpha_green & 0xff00ff00) | (red_blue & 0x00ff00ff)
}

#[inline]
pub(crate) fn average2(a: u32, b: u32) -> u32 {
    (((a ^ b) & 0xfefefefe) >> 1) + (a & b)
}

pub(crate) fn select(left: u32, top: u32, top_left: u32) -> u32 {
    let l = channels(left);
    let t = channels(top);
    let tl = channels(top_left);
    // distance of the gradient estimate to left and to top
    let to_left: i32 = (0..4).map(|i| (t[i] - tl[i]).abs()).sum();
    let to_top: i32 = (0..4).map(|i| (l[i] - tl[i]).abs()).sum();
    if to_left < to_top {
        left
    } else {
        top
    }
}

pub(crate) fn clamp_add_subtract_full(a: u32, b: u32, c: u32) -> u32 {
    let (a, b, c) = (channels(a), channels(b), channels(c));
    pack(core::array::from_fn(|i| (a[i] + b[i] - c[i]).clamp(0, 255)))
}

pub(crate) fn clamp_add_subtract_half(a: u32, b: u32) -> u32 {
    let (a, b) = (channels(a), channels(b));
    pack(core::array::from_fn(|i| (a[i] + (a[i] - b[i]) / 2).clamp(0, 255)))
}

/// Neighbourhood of the pixel being predicted.
#[derive(Clone, Copy)]
pub(crate) struct Neighbors {
    pub(crate) left: u32,
    pub(crate) top: u32,
    pub(crate) top_left: u32,
    pub(crate) top_right: u32,
}

type Predictor = fn(&Neighbors) -> u32;

/// The 14 predictor modes; codes 14 and 15 behave like mode 0.
pub(crate) static PREDICTORS: [Predictor; 16] = [
    |_| 0xff00_0000,
    |n| n.left,
    |n| n.top,
    |n| n.top_right,
    |n| n.top_left,
    |n| average2(average2(n.left, n.top_right), n.top),
    |n| average2(n.left, n.top_left),
    |n| average2(n.left, n.top),
    |n| average2(n.top_left, n.top),
    |n| average2(n.top, n.top_right),
    |n| average2(average2(n.left, n.top_left), average2(n.top, n.top_right)),
    |n| select(n.left, n.top, n.top_left),
    |n| clamp_add_subtract_full(n.left, n.top, n.top_left),
    |n| clamp_add_subtract_half(average2(n.left, n.top), n.top_left),
    |_| 0xff00_0000,
    |_| 0xff00_0000,
];

/// Neighbours of `index` in a row-major image. The top-right of the last
/// column is the first pixel of the current row, as the format specifies.
#[inline]
pub(crate) fn neighbors(data: &[u32], index: usize, width: usize) -> Neighbors {
    Neighbors {
        left: data[index - 1],
        top: data[index - width],
        top_left: data[index - width - 1],
        top_right: data[index - width + 1],
    }
}

pub(crate) fn apply_predictor_transform(
    data: &mut [u32],
    width: usize,
    height: usize,
    size_bits: u8,
    predictor_data: &[u32],
) {
    if width == 0 || height == 0 {
        return;
    }
    let block_xsize = subsample_size(width as u32, size_bits) as usize;

    // top-left predicts black, the rest of the first row predicts left
    data[0] = add_pixels(data[0], 0xff00_0000);
    for x in 1..width {
        data[x] = add_pixels(data[x], data[x - 1]);
    }

    for y in 1..height {
        let row = y * width;
        // first column predicts top
        data[row] = add_pixels(data[row], data[row - width]);
        let block_row = (y >> size_bits) * block_xsize;
        for x in 1..width {
            let mode = (predictor_data[block_row + (x >> size_bits)] >> 8) & 0xf;
            let index = row + x;
            let prediction = PREDICTORS[mode as usize](&neighbors(data, index, width));
            data[index] = add_pixels(data[index], prediction);
        }
    }
}

#[inline]
fn color_transform_delta(t: u8, c: u8) -> i32 {
    (i32::from(t as i8) * i32::from(c as i8)) >> 5
}

/// Multipliers carried by one color transform sub-image pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ColorTransformElement {
    pub(crate) green_to_red: u8,
    pub(crate) green_to_blue: u8,
    pub(crate) red_to_blue: u8,
}

impl ColorTransformElement {
    pub(crate) fn from_argb(argb: u32) -> Self {
        Self {
            green_to_red: argb as u8,
            green_to_blue: (argb >> 8) as u8,
            red_to_blue: (argb >> 16) as u8,
        }
    }

    pub(crate) fn to_argb(self) -> u32 {
        0xff00_0000
            | (u32::from(self.red_to_blue) << 16)
            | (u32::from(self.green_to_blue) << 8)
            | u32::from(self.green_to_red)
    }

    /// Undoes the transform for one pixel.
    pub(crate) fn inverse(self, argb: u32) -> u32 {
        let green = (argb >> 8) as u8;
        let red = ((argb >> 16) as i32 + color_transform_delta(self.green_to_red, green)) as u8;
        let blue = (argb as i32
            + color_transform_delta(self.green_to_blue, green)
            + color_transform_delta(self.red_to_blue, red)) as u8;
        (argb & 0xff00_ff00) | (u32::from(red) << 16) | u32::from(blue)
    }

    /// Applies the transform to one pixel (the encoder direction).
    pub(crate) fn forward(self, argb: u32) -> u32 {
        let green = (argb >> 8) as u8;
        let red = (argb >> 16) as u8;
        let new_red = (i32::from(red) - color_transform_delta(self.green_to_red, green)) as u8;
        let new_blue = (argb as u8 as i32
            - color_transform_delta(self.green_to_blue, green)
            - color_transform_delta(self.red_to_blue, red)) as u8;
        (argb & 0xff00_ff00) | (u32::from(new_red) << 16) | u32::from(new_blue)
    }
}

pub(crate) fn apply_color_transform(
    data: &mut [u32],
    width: usize,
    size_bits: u8,
    transform_data: &[u32],
) {
    if width == 0 {
        return;
    }
    let block_xsize = subsample_size(width as u32, size_bits) as usize;
    for (y, row) in data.chunks_exact_mut(width).enumerate() {
        let block_row = (y >> size_bits) * block_xsize;
        for (x, pixel) in row.iter_mut().enumerate() {
            let element =
                ColorTransformElement::from_argb(transform_data[block_row + (x >> size_bits)]);
            *pixel = element.inverse(*pixel);
        }
    }
}

pub(crate) fn apply_subtract_green_transform(data: &mut [u32]) {
    for pixel in data {
        let green = (*pixel >> 8) & 0xff;
        *pixel = add_pixels(*pixel, (green << 16) | green);
    }
}

/// Index bits per pixel and the matching `width_bits` for a palette size.
pub(crate) fn color_index_bits(table_size: usize) -> (u8, u8) {
    match table_size {
        0..=2 => (1, 3),
        3..=4 => (2, 2),
        5..=16 => (4, 1),
        _ => (8, 0),
    }
}

/// Expands packed palette indices of a `width x height` image.
/// Indices outside the palette map to transparent black.
pub(crate) fn apply_color_indexing_transform(
    packed: &[u32],
    width: usize,
    height: usize,
    table: &[u32],
) -> Vec<u32> {
    let (bits_per_pixel, width_bits) = color_index_bits(table.len());
    let packed_width = subsample_size(width as u32, width_bits) as usize;
    let mask = (1u32 << bits_per_pixel) - 1;
    let per_word = 1usize << width_bits;

    let mut out = vec![0u32; width * height];
    for (y, row) in out.chunks_exact_mut(width.max(1)).take(height).enumerate() {
        let packed_row = &packed[y * packed_width..][..packed_width];
        for (x, pixel) in row.iter_mut().enumerate() {
            let word = (packed_row[x >> width_bits] >> 8) & 0xff;
            let shift = (x & (per_word - 1)) as u32 * u32::from(bits_per_pixel);
            let index = ((word >> shift) & mask) as usize;
            *pixel = table.get(index).copied().unwrap_or(0);
        }
    }
    out
}
