//! VP8L stream assembly: transform selection and entropy coding.

use alloc::vec::Vec;

use enough::Stop;

use crate::decoder::lossless::VP8L_MAGIC;
use crate::encoder::api::EncodeError;

use super::backward_refs::compute_backward_refs;
use super::bitwriter::BitWriter;
use super::huffman::PrefixCode;
use super::transforms::{
    apply_color_transform, apply_predictor, bundle_palette_indices, collect_palette,
    palette_deltas, subtract_green,
};
use super::types::{
    prefix_encode, PixOrCopy, CACHE_BITS, NUM_DISTANCE_CODES, NUM_LENGTH_CODES, NUM_LITERAL_CODES,
};

const PREDICTOR_BITS: u8 = 4;
const CROSS_COLOR_BITS: u8 = 5;

/// How an image's pixels are decorrelated before entropy coding.
#[derive(Clone, Copy, Debug)]
struct Strategy {
    /// Largest palette worth switching to color indexing for.
    palette_limit: usize,
    /// Apply subtract-green and cross-color around the predictor.
    decorrelate_channels: bool,
}

const ARGB_STRATEGY: Strategy = Strategy {
    palette_limit: 256,
    decorrelate_channels: true,
};

/// Alpha planes only use green, and past 16 levels the palette indices no
/// longer pack, so a plain predictor does better on gradients.
const ALPHA_STRATEGY: Strategy = Strategy {
    palette_limit: 16,
    decorrelate_channels: false,
};

#[derive(Clone, Copy)]
#[repr(u8)]
enum TransformType {
    Predictor = 0,
    CrossColor = 1,
    SubtractGreen = 2,
    ColorIndexing = 3,
}

fn write_transform_header(w: &mut BitWriter, kind: TransformType) {
    w.write_bit(true);
    w.write_bits(kind as u64, 2);
}

/// Encodes RGBA rows (`stride` bytes apart) as a complete VP8L chunk
/// payload, header included.
pub(crate) fn encode_vp8l(
    rgba: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    stop: &dyn Stop,
) -> Result<Vec<u8>, EncodeError> {
    let row_bytes = width as usize * 4;
    let argb: Vec<u32> = rgba
        .chunks(stride)
        .take(height as usize)
        .flat_map(|row| row[..row_bytes].chunks_exact(4))
        .map(|p| u32::from_be_bytes([p[3], p[0], p[1], p[2]]))
        .collect();
    let has_alpha = argb.iter().any(|&p| p >> 24 != 0xff);

    let mut w = BitWriter::with_capacity(argb.len());
    w.write_bits(u64::from(VP8L_MAGIC), 8);
    w.write_bits(u64::from(width - 1), 14);
    w.write_bits(u64::from(height - 1), 14);
    w.write_bit(has_alpha);
    w.write_bits(0, 3);

    let w = encode_image(w, argb, width as usize, height as usize, ARGB_STRATEGY, stop)?;
    Ok(w.finish())
}

/// Encodes an alpha plane as a headerless VP8L stream, the value carried in
/// the green channel, as stored in an `ALPH` chunk.
pub(crate) fn encode_alpha_plane(
    alpha: &[u8],
    width: u32,
    height: u32,
    stop: &dyn Stop,
) -> Result<Vec<u8>, EncodeError> {
    let argb: Vec<u32> = alpha.iter().map(|&a| u32::from(a) << 8).collect();
    let w = BitWriter::with_capacity(argb.len() / 4);
    let w = encode_image(w, argb, width as usize, height as usize, ALPHA_STRATEGY, stop)?;
    Ok(w.finish())
}

/// Writes the transform chain and the main image after whatever `w` holds.
fn encode_image(
    mut w: BitWriter,
    mut argb: Vec<u32>,
    width: usize,
    height: usize,
    strategy: Strategy,
    stop: &dyn Stop,
) -> Result<BitWriter, EncodeError> {
    let mut xsize = width;

    if let Some(palette) = collect_palette(&argb, strategy.palette_limit) {
        log::debug!("VP8L {width}x{height}: palette of {} colors", palette.len());
        write_transform_header(&mut w, TransformType::ColorIndexing);
        w.write_bits((palette.len() - 1) as u64, 8);
        write_image_stream(&mut w, &palette_deltas(&palette), palette.len(), false, None, stop)?;
        (argb, xsize) = bundle_palette_indices(&argb, width, height, &palette);
    } else {
        log::debug!("VP8L {width}x{height}: spatial prediction, {strategy:?}");
        if strategy.decorrelate_channels {
            subtract_green(&mut argb);
            write_transform_header(&mut w, TransformType::SubtractGreen);
        }

        let (mut residuals, modes) = apply_predictor(&argb, width, height, PREDICTOR_BITS);
        write_transform_header(&mut w, TransformType::Predictor);
        w.write_bits(u64::from(PREDICTOR_BITS - 2), 3);
        write_image_stream(&mut w, &modes, width.div_ceil(1 << PREDICTOR_BITS), false, None, stop)?;

        if strategy.decorrelate_channels {
            let multipliers = apply_color_transform(&mut residuals, width, height, CROSS_COLOR_BITS);
            write_transform_header(&mut w, TransformType::CrossColor);
            w.write_bits(u64::from(CROSS_COLOR_BITS - 2), 3);
            write_image_stream(
                &mut w,
                &multipliers,
                width.div_ceil(1 << CROSS_COLOR_BITS),
                false,
                None,
                stop,
            )?;
        }
        argb = residuals;
    }
    w.write_bit(false);

    // keep whichever of no cache and a color cache codes smaller
    let mut best: Option<BitWriter> = None;
    for cache_bits in [None, Some(CACHE_BITS)] {
        let mut candidate = w.clone();
        write_image_stream(&mut candidate, &argb, xsize, true, cache_bits, stop)?;
        log::trace!("VP8L cache {:?}: {} bits", cache_bits, candidate.bit_position());
        if best
            .as_ref()
            .map_or(true, |b| candidate.bit_position() < b.bit_position())
        {
            best = Some(candidate);
        }
    }
    Ok(best.unwrap_or(w))
}

/// Symbol counts for the five prefix codes of one image stream.
struct Histograms {
    green: Vec<u32>,
    red: Vec<u32>,
    blue: Vec<u32>,
    alpha: Vec<u32>,
    distance: Vec<u32>,
}

impl Histograms {
    fn new(cache_bits: Option<u8>) -> Self {
        let cache_size = cache_bits.map_or(0, |bits| 1usize << bits);
        Self {
            green: alloc::vec![0; NUM_LITERAL_CODES + NUM_LENGTH_CODES + cache_size],
            red: alloc::vec![0; 256],
            blue: alloc::vec![0; 256],
            alpha: alloc::vec![0; 256],
            distance: alloc::vec![0; NUM_DISTANCE_CODES],
        }
    }

    fn add(&mut self, token: &PixOrCopy) {
        match *token {
            PixOrCopy::Literal(argb) => {
                self.alpha[(argb >> 24) as usize] += 1;
                self.red[((argb >> 16) & 0xff) as usize] += 1;
                self.green[((argb >> 8) & 0xff) as usize] += 1;
                self.blue[(argb & 0xff) as usize] += 1;
            }
            PixOrCopy::CacheIndex(index) => {
                self.green[NUM_LITERAL_CODES + NUM_LENGTH_CODES + usize::from(index)] += 1;
            }
            PixOrCopy::Copy { length, dist_code } => {
                let (length_symbol, _, _) = prefix_encode(usize::from(length));
                self.green[NUM_LITERAL_CODES + usize::from(length_symbol)] += 1;
                let (dist_symbol, _, _) = prefix_encode(dist_code as usize);
                self.distance[usize::from(dist_symbol)] += 1;
            }
        }
    }
}

/// Entropy-codes one image with a single group of prefix codes. Only the
/// main image (`is_main`) announces the absence of a meta prefix image.
fn write_image_stream(
    w: &mut BitWriter,
    argb: &[u32],
    xsize: usize,
    is_main: bool,
    cache_bits: Option<u8>,
    stop: &dyn Stop,
) -> Result<(), EncodeError> {
    let refs = compute_backward_refs(argb, xsize, cache_bits, stop)?;

    let mut histograms = Histograms::new(cache_bits);
    for token in &refs {
        histograms.add(token);
    }
    let green = PrefixCode::from_histogram(&histograms.green);
    let red = PrefixCode::from_histogram(&histograms.red);
    let blue = PrefixCode::from_histogram(&histograms.blue);
    let alpha = PrefixCode::from_histogram(&histograms.alpha);
    let distance = PrefixCode::from_histogram(&histograms.distance);

    match cache_bits {
        Some(bits) => {
            w.write_bit(true);
            w.write_bits(u64::from(bits), 4);
        }
        None => w.write_bit(false),
    }
    if is_main {
        w.write_bit(false);
    }
    for code in [&green, &red, &blue, &alpha, &distance] {
        code.write_tree(w);
    }

    for token in &refs {
        match *token {
            PixOrCopy::Literal(argb) => {
                green.write_symbol(w, ((argb >> 8) & 0xff) as usize);
                red.write_symbol(w, ((argb >> 16) & 0xff) as usize);
                blue.write_symbol(w, (argb & 0xff) as usize);
                alpha.write_symbol(w, (argb >> 24) as usize);
            }
            PixOrCopy::CacheIndex(index) => {
                green.write_symbol(w, NUM_LITERAL_CODES + NUM_LENGTH_CODES + usize::from(index));
            }
            PixOrCopy::Copy { length, dist_code } => {
                let (symbol, bits, extra) = prefix_encode(usize::from(length));
                green.write_symbol(w, NUM_LITERAL_CODES + usize::from(symbol));
                w.write_bits(u64::from(extra), bits);
                let (symbol, bits, extra) = prefix_encode(dist_code as usize);
                distance.write_symbol(w, usize::from(symbol));
                w.write_bits(u64::from(extra), bits);
            }
        }
    }

    log::trace!(
        "VP8L stream {}x{}: {} tokens, data {} bits",
        xsize,
        argb.len() / xsize.max(1),
        refs.len(),
        green.cost(&histograms.green)
            + red.cost(&histograms.red)
            + blue.cost(&histograms.blue)
            + alpha.cost(&histograms.alpha)
            + distance.cost(&histograms.distance)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::lossless::LosslessDecoder;
    use alloc::vec;
    use enough::Unstoppable;

    fn roundtrip(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
        let data = encode_vp8l(rgba, width, height, width as usize * 4, &Unstoppable).unwrap();
        let (header, pixels) = LosslessDecoder::new(&data, &Unstoppable).decode_frame().unwrap();
        assert_eq!((u32::from(header.width), u32::from(header.height)), (width, height));
        let mut out = vec![0u8; rgba.len()];
        crate::decoder::lossless::argb_to_rgba(&pixels, &mut out);
        out
    }

    #[test]
    fn single_pixel() {
        let rgba = [10, 20, 30, 40];
        assert_eq!(roundtrip(&rgba, 1, 1), rgba);
    }

    #[test]
    fn checkerboard_uses_palette() {
        let (width, height) = (16u32, 16u32);
        let rgba: Vec<u8> = (0..width * height)
            .flat_map(|i| {
                if (i % width + i / width) % 2 == 0 {
                    [255, 0, 0, 255]
                } else {
                    [0, 0, 255, 255]
                }
            })
            .collect();
        assert_eq!(roundtrip(&rgba, width, height), rgba);
    }

    #[test]
    fn many_colors_use_spatial_transforms() {
        let (width, height) = (45u32, 29u32);
        let rgba: Vec<u8> = (0..width * height)
            .flat_map(|i| {
                let (x, y) = (i % width, i / width);
                [(x * 5) as u8, (y * 7 + x) as u8, (x * y) as u8, (255 - y) as u8]
            })
            .collect();
        assert_eq!(roundtrip(&rgba, width, height), rgba);
    }

    #[test]
    fn padded_rows_are_skipped() {
        let stride = 12;
        let mut rgba = vec![0xeeu8; stride * 2];
        rgba[..8].copy_from_slice(&[1, 2, 3, 255, 4, 5, 6, 255]);
        rgba[stride..stride + 8].copy_from_slice(&[7, 8, 9, 255, 1, 2, 3, 255]);
        let data = encode_vp8l(&rgba, 2, 2, stride, &Unstoppable).unwrap();
        let (_, pixels) = LosslessDecoder::new(&data, &Unstoppable).decode_frame().unwrap();
        assert_eq!(pixels, [0xff01_0203, 0xff04_0506, 0xff07_0809, 0xff01_0203]);
    }

    #[test]
    fn alpha_plane_roundtrips_through_green() {
        let (width, height) = (23u16, 9u16);
        for levels in [2usize, 200] {
            let alpha: Vec<u8> = (0..usize::from(width) * usize::from(height))
                .map(|i| ((i * 37) % levels) as u8)
                .collect();
            let data =
                encode_alpha_plane(&alpha, u32::from(width), u32::from(height), &Unstoppable).unwrap();
            let argb = LosslessDecoder::new(&data, &Unstoppable)
                .decode_implicit(width, height)
                .unwrap();
            let decoded: Vec<u8> = argb.iter().map(|&p| (p >> 8) as u8).collect();
            assert_eq!(decoded, alpha);
        }
    }
}
