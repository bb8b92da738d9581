//! Decoding of lossless WebP images
//!
//! [Lossless spec](https://developers.google.com/speed/webp/docs/webp_lossless_bitstream_specification)

use alloc::vec;
use alloc::vec::Vec;

use enough::Stop;

use super::api::DecodeError;
use super::bit_reader::BitReader;
use super::huffman::HuffmanTree;
use super::lossless_transform::{
    apply_color_indexing_transform, apply_color_transform, apply_predictor_transform,
    apply_subtract_green_transform, color_index_bits, subsample_size, add_pixels,
};

const CODE_LENGTH_CODES: usize = 19;
const CODE_LENGTH_CODE_ORDER: [usize; CODE_LENGTH_CODES] = [
    17, 18, 0, 1, 2, 3, 4, 5, 16, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
];

const NUM_LENGTH_CODES: u16 = 24;
const NUM_DISTANCE_CODES: u16 = 40;
const NUM_LITERAL_CODES: u16 = 256;

const COLOR_CACHE_HASH_MUL: u32 = 0x1e35_a7bd;

/// Signature byte of a VP8L stream.
pub(crate) const VP8L_MAGIC: u8 = 0x2f;

/// (x, y) offsets of distance codes 1..=120.
#[rustfmt::skip]
pub(crate) const DISTANCE_MAP: [(i8, i8); 120] = [
    (0, 1),  (1, 0),  (1, 1),  (-1, 1), (0, 2),  (2, 0),  (1, 2),  (-1, 2),
    (2, 1),  (-2, 1), (2, 2),  (-2, 2), (0, 3),  (3, 0),  (1, 3),  (-1, 3),
    (3, 1),  (-3, 1), (2, 3),  (-2, 3), (3, 2),  (-3, 2), (0, 4),  (4, 0),
    (1, 4),  (-1, 4), (4, 1),  (-4, 1), (3, 3),  (-3, 3), (2, 4),  (-2, 4),
    (4, 2),  (-4, 2), (0, 5),  (3, 4),  (-3, 4), (4, 3),  (-4, 3), (5, 0),
    (1, 5),  (-1, 5), (5, 1),  (-5, 1), (2, 5),  (-2, 5), (5, 2),  (-5, 2),
    (4, 4),  (-4, 4), (3, 5),  (-3, 5), (5, 3),  (-5, 3), (0, 6),  (6, 0),
    (1, 6),  (-1, 6), (6, 1),  (-6, 1), (2, 6),  (-2, 6), (6, 2),  (-6, 2),
    (4, 5),  (-4, 5), (5, 4),  (-5, 4), (3, 6),  (-3, 6), (6, 3),  (-6, 3),
    (0, 7),  (7, 0),  (1, 7),  (-1, 7), (5, 5),  (-5, 5), (7, 1),  (-7, 1),
    (4, 6),  (-4, 6), (6, 4),  (-6, 4), (2, 7),  (-2, 7), (7, 2),  (-7, 2),
    (3, 7),  (-3, 7), (7, 3),  (-7, 3), (5, 6),  (-5, 6), (6, 5),  (-6, 5),
    (8, 0),  (4, 7),  (-4, 7), (7, 4),  (-7, 4), (8, 1),  (8, 2),  (6, 6),
    (-6, 6), (8, 3),  (5, 7),  (-5, 7), (7, 5),  (-7, 5), (8, 4),  (6, 7),
    (-6, 7), (7, 6),  (-7, 6), (8, 5),  (7, 7),  (-7, 7), (8, 6),  (8, 7)
];

/// Linear distance for a distance code in an image `xsize` pixels wide.
pub(crate) fn plane_code_to_distance(xsize: usize, code: usize) -> usize {
    if code > 120 {
        code - 120
    } else {
        let (xoffset, yoffset) = DISTANCE_MAP[code - 1];
        let dist = i64::from(xoffset) + i64::from(yoffset) * xsize as i64;
        dist.max(1) as usize
    }
}

/// Slot of `argb` in a color cache of `1 << bits` entries.
#[inline]
pub(crate) fn color_cache_key(argb: u32, bits: u8) -> usize {
    (argb.wrapping_mul(COLOR_CACHE_HASH_MUL) >> (32 - bits)) as usize
}

#[derive(Clone, Debug)]
struct ColorCache {
    bits: u8,
    colors: Vec<u32>,
}

impl ColorCache {
    fn new(bits: u8) -> Self {
        Self {
            bits,
            colors: vec![0; 1 << bits],
        }
    }

    #[inline]
    fn insert(&mut self, argb: u32) {
        self.colors[color_cache_key(argb, self.bits)] = argb;
    }

    #[inline]
    fn lookup(&self, index: usize) -> Option<u32> {
        self.colors.get(index).copied()
    }
}

/// The five prefix codes used for one region of the image.
#[derive(Clone, Debug)]
struct HuffmanCodeGroup {
    green: HuffmanTree,
    red: HuffmanTree,
    blue: HuffmanTree,
    alpha: HuffmanTree,
    distance: HuffmanTree,
}

#[derive(Debug)]
struct HuffmanInfo {
    /// Block size bits of the entropy image; 0 when a single group is used.
    bits: u8,
    xsize: usize,
    image: Vec<u16>,
    groups: Vec<HuffmanCodeGroup>,
}

impl HuffmanInfo {
    #[inline]
    fn group(&self, x: usize, y: usize) -> &HuffmanCodeGroup {
        if self.bits == 0 {
            return &self.groups[0];
        }
        let index = (y >> self.bits) * self.xsize + (x >> self.bits);
        &self.groups[usize::from(self.image[index])]
    }
}

/// One recorded transform, with the image width it operates on.
#[derive(Debug)]
enum Transform {
    Predictor { size_bits: u8, data: Vec<u32> },
    Color { size_bits: u8, data: Vec<u32> },
    SubtractGreen,
    ColorIndexing { table: Vec<u32> },
}

/// Header fields of a VP8L stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LosslessHeader {
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) alpha_hint: bool,
}

/// Parses the 5-byte VP8L header.
pub(crate) fn read_header(data: &[u8]) -> Result<LosslessHeader, DecodeError> {
    if data.len() < 5 {
        return Err(DecodeError::Truncated);
    }
    if data[0] != VP8L_MAGIC {
        return Err(DecodeError::LosslessSignatureInvalid(data[0]));
    }
    let mut reader = BitReader::new(&data[1..5]);
    let width = reader.read_bits(14) as u16 + 1;
    let height = reader.read_bits(14) as u16 + 1;
    let alpha_hint = reader.read_bit();
    let version = reader.read_bits(3) as u8;
    if version != 0 {
        return Err(DecodeError::VersionNumberInvalid(version));
    }
    Ok(LosslessHeader {
        width,
        height,
        alpha_hint,
    })
}

/// Decoder for one VP8L bitstream.
pub(crate) struct LosslessDecoder<'a> {
    data: &'a [u8],
    bit_reader: BitReader<'a>,
    stop: &'a dyn Stop,
}

impl<'a> LosslessDecoder<'a> {
    pub(crate) fn new(data: &'a [u8], stop: &'a dyn Stop) -> Self {
        Self {
            data,
            bit_reader: BitReader::new(data),
            stop,
        }
    }

    /// Decodes a complete `VP8L` chunk payload into ARGB pixels.
    pub(crate) fn decode_frame(mut self) -> Result<(LosslessHeader, Vec<u32>), DecodeError> {
        let header = read_header(self.data)?;
        self.bit_reader = BitReader::new(&self.data[5..]);
        let pixels = self.decode_image(u32::from(header.width), u32::from(header.height))?;
        Ok((header, pixels))
    }

    /// Decodes a headerless stream of known size, as carried in an ALPH chunk.
    pub(crate) fn decode_implicit(mut self, width: u16, height: u16) -> Result<Vec<u32>, DecodeError> {
        self.decode_image(u32::from(width), u32::from(height))
    }

    /// Reads the transform stack and the main image, then undoes the transforms.
    fn decode_image(&mut self, width: u32, height: u32) -> Result<Vec<u32>, DecodeError> {
        let mut xsize = width;
        let mut transforms: Vec<(Transform, u32)> = Vec::with_capacity(4);
        let mut seen = [false; 4];

        while self.bit_reader.read_bit() {
            let kind = self.bit_reader.read_bits(2) as usize;
            if seen[kind] {
                return Err(DecodeError::TransformError);
            }
            seen[kind] = true;

            let transform = match kind {
                0 | 1 => {
                    let size_bits = self.bit_reader.read_bits(3) as u8 + 2;
                    let data = self.decode_image_stream(
                        subsample_size(xsize, size_bits),
                        subsample_size(height, size_bits),
                        false,
                    )?;
                    if kind == 0 {
                        Transform::Predictor { size_bits, data }
                    } else {
                        Transform::Color { size_bits, data }
                    }
                }
                2 => Transform::SubtractGreen,
                _ => {
                    let table_size = self.bit_reader.read_bits(8) + 1;
                    let mut table = self.decode_image_stream(table_size, 1, false)?;
                    // palette entries are coded as deltas from the previous one
                    for i in 1..table.len() {
                        table[i] = add_pixels(table[i], table[i - 1]);
                    }
                    Transform::ColorIndexing { table }
                }
            };

            let input_width = xsize;
            if let Transform::ColorIndexing { table } = &transform {
                let (_, width_bits) = color_index_bits(table.len());
                xsize = subsample_size(xsize, width_bits);
            }
            transforms.push((transform, input_width));
        }

        log::debug!(
            "VP8L {}x{} transforms: {:?}",
            width,
            height,
            transforms
                .iter()
                .map(|(t, _)| match t {
                    Transform::Predictor { .. } => "predictor",
                    Transform::Color { .. } => "color",
                    Transform::SubtractGreen => "subtract-green",
                    Transform::ColorIndexing { .. } => "color-indexing",
                })
                .collect::<Vec<_>>()
        );

        let mut pixels = self.decode_image_stream(xsize, height, true)?;

        let height = height as usize;
        for (transform, input_width) in transforms.iter().rev() {
            let width = *input_width as usize;
            match transform {
                Transform::Predictor { size_bits, data } => {
                    apply_predictor_transform(&mut pixels, width, height, *size_bits, data);
                }
                Transform::Color { size_bits, data } => {
                    apply_color_transform(&mut pixels, width, *size_bits, data);
                }
                Transform::SubtractGreen => apply_subtract_green_transform(&mut pixels),
                Transform::ColorIndexing { table } => {
                    pixels = apply_color_indexing_transform(&pixels, width, height, table);
                }
            }
        }

        Ok(pixels)
    }

    /// Decodes an entropy-coded image. Only the main image (`is_main`) may
    /// carry a meta prefix code image.
    fn decode_image_stream(
        &mut self,
        xsize: u32,
        ysize: u32,
        is_main: bool,
    ) -> Result<Vec<u32>, DecodeError> {
        let color_cache_bits = if self.bit_reader.read_bit() {
            let bits = self.bit_reader.read_bits(4) as u8;
            if !(1..=11).contains(&bits) {
                return Err(DecodeError::InvalidColorCacheBits(bits));
            }
            Some(bits)
        } else {
            None
        };

        let huffman_info = self.read_huffman_codes(is_main, xsize, ysize, color_cache_bits)?;
        if self.bit_reader.is_exhausted() {
            return Err(DecodeError::Truncated);
        }

        self.decode_image_data(xsize as usize, ysize as usize, &huffman_info, color_cache_bits, is_main)
    }

    fn read_huffman_codes(
        &mut self,
        is_main: bool,
        xsize: u32,
        ysize: u32,
        color_cache_bits: Option<u8>,
    ) -> Result<HuffmanInfo, DecodeError> {
        let mut num_groups = 1usize;
        let mut bits = 0u8;
        let mut entropy_xsize = 0usize;
        let mut image = Vec::new();

        if is_main && self.bit_reader.read_bit() {
            bits = self.bit_reader.read_bits(3) as u8 + 2;
            let w = subsample_size(xsize, bits);
            let h = subsample_size(ysize, bits);
            let entropy_image = self.decode_image_stream(w, h, false)?;
            image = entropy_image
                .iter()
                .map(|&p| ((p >> 8) & 0xffff) as u16)
                .collect();
            num_groups = image.iter().map(|&g| usize::from(g) + 1).max().unwrap_or(1);
            entropy_xsize = w as usize;
        }

        let cache_size = color_cache_bits.map_or(0, |b| 1u16 << b);
        let alphabet_sizes = [
            NUM_LITERAL_CODES + NUM_LENGTH_CODES + cache_size,
            NUM_LITERAL_CODES,
            NUM_LITERAL_CODES,
            NUM_LITERAL_CODES,
            NUM_DISTANCE_CODES,
        ];

        let mut groups = Vec::with_capacity(num_groups);
        for _ in 0..num_groups {
            let [green, red, blue, alpha, distance] =
                alphabet_sizes.map(|size| self.read_huffman_code(size));
            groups.push(HuffmanCodeGroup {
                green: green?,
                red: red?,
                blue: blue?,
                alpha: alpha?,
                distance: distance?,
            });
        }

        Ok(HuffmanInfo {
            bits,
            xsize: entropy_xsize,
            image,
            groups,
        })
    }

    fn read_huffman_code(&mut self, alphabet_size: u16) -> Result<HuffmanTree, DecodeError> {
        let simple = self.bit_reader.read_bit();

        if simple {
            let num_symbols = self.bit_reader.read_bits(1) + 1;
            let first_symbol_bits = if self.bit_reader.read_bit() { 8 } else { 1 };
            let mut code_lengths = vec![0u16; usize::from(alphabet_size)];

            let zero_symbol = self.bit_reader.read_bits(first_symbol_bits) as usize;
            *code_lengths
                .get_mut(zero_symbol)
                .ok_or(DecodeError::HuffmanError)? = 1;
            if num_symbols == 2 {
                let one_symbol = self.bit_reader.read_bits(8) as usize;
                *code_lengths
                    .get_mut(one_symbol)
                    .ok_or(DecodeError::HuffmanError)? = 1;
            }
            return HuffmanTree::build_implicit(&code_lengths);
        }

        let mut code_length_code_lengths = [0u16; CODE_LENGTH_CODES];
        let num_code_lengths = 4 + self.bit_reader.read_bits(4) as usize;
        for &slot in &CODE_LENGTH_CODE_ORDER[..num_code_lengths] {
            code_length_code_lengths[slot] = self.bit_reader.read_bits(3) as u16;
        }

        let code_lengths =
            self.read_huffman_code_lengths(&code_length_code_lengths, alphabet_size)?;
        HuffmanTree::build_implicit(&code_lengths)
    }

    fn read_huffman_code_lengths(
        &mut self,
        code_length_code_lengths: &[u16; CODE_LENGTH_CODES],
        num_symbols: u16,
    ) -> Result<Vec<u16>, DecodeError> {
        let table = HuffmanTree::build_implicit(code_length_code_lengths)?;
        let num_symbols = usize::from(num_symbols);

        let mut max_symbol = if self.bit_reader.read_bit() {
            let length_nbits = 2 + 2 * self.bit_reader.read_bits(3) as u8;
            let max_minus_two = self.bit_reader.read_bits(length_nbits) as usize;
            if max_minus_two > num_symbols - 2 {
                return Err(DecodeError::HuffmanError);
            }
            2 + max_minus_two
        } else {
            num_symbols
        };

        let mut code_lengths = vec![0u16; num_symbols];
        let mut prev_code_len = 8;
        let mut symbol = 0;

        while symbol < num_symbols {
            if max_symbol == 0 {
                break;
            }
            max_symbol -= 1;

            let code_len = table.read_symbol(&mut self.bit_reader)?;
            if code_len < 16 {
                code_lengths[symbol] = code_len;
                symbol += 1;
                if code_len != 0 {
                    prev_code_len = code_len;
                }
            } else {
                let slot = usize::from(code_len - 16);
                let extra_bits = [2u8, 3, 7][slot];
                let repeat_offset = [3usize, 3, 11][slot];
                let repeat = self.bit_reader.read_bits(extra_bits) as usize + repeat_offset;
                if symbol + repeat > num_symbols {
                    return Err(DecodeError::HuffmanError);
                }
                let length = if code_len == 16 { prev_code_len } else { 0 };
                code_lengths[symbol..symbol + repeat].fill(length);
                symbol += repeat;
            }
        }

        Ok(code_lengths)
    }

    /// Length or distance value for a prefix symbol plus its extra bits.
    fn get_copy_distance(&mut self, prefix_symbol: u16) -> usize {
        if prefix_symbol < 4 {
            return usize::from(prefix_symbol) + 1;
        }
        let extra_bits = ((prefix_symbol - 2) >> 1) as u8;
        let offset = (2 + (usize::from(prefix_symbol) & 1)) << extra_bits;
        offset + self.bit_reader.read_bits(extra_bits) as usize + 1
    }

    fn decode_image_data(
        &mut self,
        width: usize,
        height: usize,
        huffman_info: &HuffmanInfo,
        color_cache_bits: Option<u8>,
        poll_stop: bool,
    ) -> Result<Vec<u32>, DecodeError> {
        let num_values = width * height;
        let mut data = vec![0u32; num_values];
        let mut cache = color_cache_bits.map(ColorCache::new);
        let mut index = 0;
        let mut next_row = 0;

        while index < num_values {
            if poll_stop && index >= next_row {
                self.stop.check()?;
                next_row = (index / width + 1) * width;
            }
            if self.bit_reader.is_exhausted() {
                log::debug!("VP8L data ended at pixel {index} of {num_values}");
                break;
            }

            let (x, y) = (index % width, index / width);
            let group = huffman_info.group(x, y);
            let code = group.green.read_symbol(&mut self.bit_reader)?;
            let start = index;

            if code < NUM_LITERAL_CODES {
                let red = group.red.read_symbol(&mut self.bit_reader)?;
                let blue = group.blue.read_symbol(&mut self.bit_reader)?;
                let alpha = group.alpha.read_symbol(&mut self.bit_reader)?;
                data[index] = (u32::from(alpha) << 24)
                    | (u32::from(red) << 16)
                    | (u32::from(code) << 8)
                    | u32::from(blue);
                index += 1;
            } else if code < NUM_LITERAL_CODES + NUM_LENGTH_CODES {
                let length = self.get_copy_distance(code - NUM_LITERAL_CODES);
                let dist_symbol = group.distance.read_symbol(&mut self.bit_reader)?;
                let dist_code = self.get_copy_distance(dist_symbol);
                let dist = plane_code_to_distance(width, dist_code);

                if self.bit_reader.is_exhausted() {
                    continue;
                }
                if dist > index || length > num_values - index {
                    return Err(DecodeError::BackReferenceInvalid);
                }
                for i in index..index + length {
                    data[i] = data[i - dist];
                }
                index += length;
            } else {
                let key = usize::from(code - NUM_LITERAL_CODES - NUM_LENGTH_CODES);
                let color = cache
                    .as_ref()
                    .and_then(|c| c.lookup(key))
                    .ok_or(DecodeError::HuffmanError)?;
                data[index] = color;
                index += 1;
            }

            if let Some(cache) = cache.as_mut() {
                for &argb in &data[start..index] {
                    cache.insert(argb);
                }
            }
        }

        Ok(data)
    }
}

/// Converts ARGB pixels to RGBA bytes.
pub(crate) fn argb_to_rgba(pixels: &[u32], out: &mut [u8]) {
    for (&argb, rgba) in pixels.iter().zip(out.chunks_exact_mut(4)) {
        rgba[0] = (argb >> 16) as u8;
        rgba[1] = (argb >> 8) as u8;
        rgba[2] = argb as u8;
        rgba[3] = (argb >> 24) as u8;
    }
}
