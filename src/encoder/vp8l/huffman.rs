//! Prefix code construction and serialization for VP8L.
//!
//! Code lengths come from a length-limited Huffman tree over a histogram that
//! is first smoothed so the lengths run-length code well. Codes are canonical
//! and stored bit-reversed, ready for the LSB-first writer.

use alloc::boxed::Box;
use alloc::collections::BinaryHeap;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;

use super::bitwriter::BitWriter;

const MAX_CODE_LENGTH: u8 = 15;
const CODE_LENGTH_CODES: usize = 19;
const CODE_LENGTH_CODE_ORDER: [usize; CODE_LENGTH_CODES] = [
    17, 18, 0, 1, 2, 3, 4, 5, 16, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
];

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct HuffmanCode {
    pub(super) code: u16,
    pub(super) length: u8,
}

/// A prefix code ready to be serialized and used.
#[derive(Debug, Clone)]
pub(super) struct PrefixCode {
    lengths: Vec<u8>,
    codes: Vec<HuffmanCode>,
}

impl PrefixCode {
    /// Builds a code for `histogram`, with lengths capped at 15.
    pub(super) fn from_histogram(histogram: &[u32]) -> Self {
        let lengths = build_huffman_lengths(histogram, MAX_CODE_LENGTH);
        let mut codes = build_huffman_codes(&lengths);
        // a lone symbol is read without consuming bits
        if lengths.iter().filter(|&&l| l > 0).count() == 1 {
            codes.iter_mut().for_each(|c| *c = HuffmanCode::default());
        }
        Self { lengths, codes }
    }

    #[inline]
    pub(super) fn write_symbol(&self, w: &mut BitWriter, symbol: usize) {
        let code = self.codes[symbol];
        w.write_bits(u64::from(code.code), code.length);
    }

    /// Bits needed to code `histogram` with this code, headers excluded.
    pub(super) fn cost(&self, histogram: &[u32]) -> u64 {
        histogram
            .iter()
            .zip(&self.codes)
            .map(|(&count, code)| u64::from(count) * u64::from(code.length))
            .sum()
    }

    pub(super) fn write_tree(&self, w: &mut BitWriter) {
        write_huffman_tree(w, &self.lengths);
    }
}

/// Smooths `counts` so that the resulting code lengths contain longer runs.
///
/// Runs that already code well (five or more zeros, seven or more equal
/// values) are kept. Elsewhere, strides of similar counts collapse to their
/// rounded average.
fn optimize_huffman_for_rle(counts: &mut [u32]) {
    let mut length = counts.len();
    while length > 0 && counts[length - 1] == 0 {
        length -= 1;
    }
    if length == 0 {
        return;
    }

    let mut good_for_rle = vec![false; counts.len()];
    let mut symbol = counts[0];
    let mut stride = 0usize;
    for i in 0..=length {
        if i == length || counts[i] != symbol {
            if (symbol == 0 && stride >= 5) || (symbol != 0 && stride >= 7) {
                good_for_rle[i - stride..i].fill(true);
            }
            stride = 1;
            if i != length {
                symbol = counts[i];
            }
        } else {
            stride += 1;
        }
    }

    let mut stride = 0usize;
    let mut limit = counts[0];
    let mut sum = 0u64;
    for i in 0..=length {
        if i == length
            || good_for_rle[i]
            || (i != 0 && good_for_rle[i - 1])
            || counts[i].abs_diff(limit) >= 4
        {
            if stride >= 4 || (stride >= 3 && sum == 0) {
                let count = if sum == 0 {
                    0
                } else {
                    (((sum + stride as u64 / 2) / stride as u64) as u32).max(1)
                };
                counts[i - stride..i].fill(count);
            }
            stride = 0;
            sum = 0;
            limit = if i + 3 < length {
                let ahead: u64 = counts[i..i + 4].iter().map(|&c| u64::from(c)).sum();
                ((ahead + 2) / 4) as u32
            } else if i < length {
                counts[i]
            } else {
                0
            };
        }
        stride += 1;
        if i != length {
            sum += u64::from(counts[i]);
            if stride >= 4 {
                limit = ((sum + stride as u64 / 2) / stride as u64) as u32;
            }
        }
    }
}

/// Code lengths for `freq`, none longer than `max_len`.
///
/// When the optimal tree is too deep, the smallest counts are raised to a
/// floor that doubles until the tree fits.
pub(super) fn build_huffman_lengths(freq: &[u32], max_len: u8) -> Vec<u8> {
    let mut lengths = vec![0u8; freq.len()];
    let mut smoothed = freq.to_vec();
    optimize_huffman_for_rle(&mut smoothed);

    let used: Vec<(usize, u32)> = smoothed
        .iter()
        .enumerate()
        .filter(|(_, &f)| f > 0)
        .map(|(i, &f)| (i, f))
        .collect();

    match used.len() {
        0 => return lengths,
        1 | 2 => {
            for &(symbol, _) in &used {
                lengths[symbol] = 1;
            }
            return lengths;
        }
        _ => {}
    }

    let mut count_min = 1u32;
    while !generate_tree(&used, count_min, max_len, &mut lengths) {
        count_min *= 2;
    }
    lengths
}

#[derive(Eq, PartialEq)]
struct Node {
    weight: u64,
    /// Tie-breaker: the symbol for leaves, -1 for internal nodes.
    value: i32,
    children: Option<(Box<Node>, Box<Node>)>,
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on weight; among equal weights the highest value pops first
        other
            .weight
            .cmp(&self.weight)
            .then(self.value.cmp(&other.value))
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn collect_depths(node: &Node, depth: u8, lengths: &mut [u8], max_depth: &mut u8) {
    match &node.children {
        Some((left, right)) => {
            collect_depths(left, depth + 1, lengths, max_depth);
            collect_depths(right, depth + 1, lengths, max_depth);
        }
        None => {
            lengths[node.value as usize] = depth.max(1);
            *max_depth = (*max_depth).max(depth);
        }
    }
}

/// Builds the tree with every weight raised to `count_min`. Returns false if
/// it ends up deeper than `depth_limit`.
fn generate_tree(used: &[(usize, u32)], count_min: u32, depth_limit: u8, lengths: &mut [u8]) -> bool {
    lengths.fill(0);

    let mut heap: BinaryHeap<Node> = used
        .iter()
        .map(|&(symbol, f)| Node {
            weight: u64::from(f.max(count_min)),
            value: symbol as i32,
            children: None,
        })
        .collect();

    while let Some(a) = heap.pop() {
        let Some(b) = heap.pop() else {
            let mut max_depth = 0u8;
            collect_depths(&a, 0, lengths, &mut max_depth);
            return max_depth <= depth_limit;
        };
        heap.push(Node {
            weight: a.weight + b.weight,
            value: -1,
            children: Some((Box::new(a), Box::new(b))),
        });
    }
    true
}

/// Canonical codes for `lengths`, bit-reversed for LSB-first output.
pub(super) fn build_huffman_codes(lengths: &[u8]) -> Vec<HuffmanCode> {
    let mut length_counts = [0u32; MAX_CODE_LENGTH as usize + 1];
    for &len in lengths.iter().filter(|&&l| l > 0) {
        length_counts[usize::from(len)] += 1;
    }

    let mut next_code = [0u32; MAX_CODE_LENGTH as usize + 1];
    let mut code = 0u32;
    for bits in 1..=MAX_CODE_LENGTH as usize {
        code = (code + length_counts[bits - 1]) << 1;
        next_code[bits] = code;
    }

    lengths
        .iter()
        .map(|&len| {
            if len == 0 {
                return HuffmanCode::default();
            }
            let slot = &mut next_code[usize::from(len)];
            let code = (*slot as u16).reverse_bits() >> (16 - len);
            *slot += 1;
            HuffmanCode { code, length: len }
        })
        .collect()
}

/// Serializes a code given its lengths, using the simple form for one or two
/// small symbols and the run-length coded form otherwise.
pub(super) fn write_huffman_tree(w: &mut BitWriter, lengths: &[u8]) {
    let used: Vec<usize> = lengths
        .iter()
        .enumerate()
        .filter(|(_, &len)| len > 0)
        .map(|(i, _)| i)
        .collect();

    if used.len() > 2 || used.iter().any(|&symbol| symbol >= 256) {
        write_huffman_tree_complex(w, lengths);
        return;
    }

    w.write_bit(true);
    let first = used.first().copied().unwrap_or(0);
    w.write_bit(used.len() == 2);
    let first_is_8bit = first > 1;
    w.write_bit(first_is_8bit);
    w.write_bits(first as u64, if first_is_8bit { 8 } else { 1 });
    if let Some(&second) = used.get(1) {
        w.write_bits(second as u64, 8);
    }
}

/// One code-length token: a length 0..=15, or a repeat code 16..=18 with its
/// extra bits.
#[derive(Clone, Copy)]
struct LengthToken {
    code: u8,
    extra_bits: u8,
}

fn write_huffman_tree_complex(w: &mut BitWriter, lengths: &[u8]) {
    w.write_bit(false);

    let mut tokens = Vec::with_capacity(lengths.len());
    let mut prev_value = 8u8;
    let mut i = 0;
    while i < lengths.len() {
        let value = lengths[i];
        let run = lengths[i..].iter().take_while(|&&l| l == value).count();
        if value == 0 {
            code_repeated_zeros(run, &mut tokens);
        } else {
            code_repeated_values(run, &mut tokens, value, prev_value);
            prev_value = value;
        }
        i += run;
    }

    let mut histogram = [0u32; CODE_LENGTH_CODES];
    for token in &tokens {
        histogram[usize::from(token.code)] += 1;
    }
    let mut depths = [0u8; CODE_LENGTH_CODES];
    depths.copy_from_slice(&build_huffman_lengths(&histogram, 7));
    let mut codes = build_huffman_codes(&depths);

    let mut codes_to_store = CODE_LENGTH_CODES;
    while codes_to_store > 4 && depths[CODE_LENGTH_CODE_ORDER[codes_to_store - 1]] == 0 {
        codes_to_store -= 1;
    }
    w.write_bits((codes_to_store - 4) as u64, 4);
    for &slot in &CODE_LENGTH_CODE_ORDER[..codes_to_store] {
        w.write_bits(u64::from(depths[slot]), 3);
    }

    if depths.iter().filter(|&&d| d != 0).count() <= 1 {
        depths.fill(0);
        codes.iter_mut().for_each(|c| *c = HuffmanCode::default());
    }

    // trailing zero runs can be left out if announcing the count is cheaper
    let mut trimmed_length = tokens.len();
    let mut trailing_zero_bits = 0u32;
    for token in tokens.iter().rev() {
        let extra = match token.code {
            0 => 0,
            17 => 3,
            18 => 7,
            _ => break,
        };
        trimmed_length -= 1;
        trailing_zero_bits += u32::from(depths[usize::from(token.code)]) + extra;
    }

    let write_trimmed_length = trimmed_length > 1 && trailing_zero_bits > 12;
    w.write_bit(write_trimmed_length);
    let length = if write_trimmed_length {
        let value = trimmed_length - 2;
        let nbits = (usize::BITS - value.leading_zeros()) as usize;
        let nbitpairs = nbits.div_ceil(2).max(1);
        w.write_bits((nbitpairs - 1) as u64, 3);
        w.write_bits(value as u64, (nbitpairs * 2) as u8);
        trimmed_length
    } else {
        tokens.len()
    };

    for token in &tokens[..length] {
        let slot = usize::from(token.code);
        w.write_bits(u64::from(codes[slot].code), depths[slot]);
        match token.code {
            16 => w.write_bits(u64::from(token.extra_bits), 2),
            17 => w.write_bits(u64::from(token.extra_bits), 3),
            18 => w.write_bits(u64::from(token.extra_bits), 7),
            _ => {}
        }
    }
}

fn code_repeated_zeros(mut repetitions: usize, tokens: &mut Vec<LengthToken>) {
    while repetitions > 0 {
        match repetitions {
            1..=2 => {
                tokens.extend((0..repetitions).map(|_| LengthToken { code: 0, extra_bits: 0 }));
                return;
            }
            3..=10 => {
                tokens.push(LengthToken {
                    code: 17,
                    extra_bits: (repetitions - 3) as u8,
                });
                return;
            }
            11..=138 => {
                tokens.push(LengthToken {
                    code: 18,
                    extra_bits: (repetitions - 11) as u8,
                });
                return;
            }
            _ => {
                tokens.push(LengthToken { code: 18, extra_bits: 127 });
                repetitions -= 138;
            }
        }
    }
}

fn code_repeated_values(mut repetitions: usize, tokens: &mut Vec<LengthToken>, value: u8, prev_value: u8) {
    if value != prev_value {
        tokens.push(LengthToken { code: value, extra_bits: 0 });
        repetitions -= 1;
    }
    while repetitions > 0 {
        match repetitions {
            1..=2 => {
                tokens.extend((0..repetitions).map(|_| LengthToken { code: value, extra_bits: 0 }));
                return;
            }
            3..=6 => {
                tokens.push(LengthToken {
                    code: 16,
                    extra_bits: (repetitions - 3) as u8,
                });
                return;
            }
            _ => {
                tokens.push(LengthToken { code: 16, extra_bits: 3 });
                repetitions -= 6;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kraft_sum(lengths: &[u8]) -> u32 {
        lengths
            .iter()
            .filter(|&&l| l > 0)
            .map(|&l| 1u32 << (15 - l))
            .sum()
    }

    #[test]
    fn equal_frequencies_share_a_length() {
        let mut freq = vec![0u32; 256];
        freq[..16].fill(16);
        let lengths = build_huffman_lengths(&freq, 15);
        assert!(lengths[..16].iter().all(|&l| l == 4));
        assert!(lengths[16..].iter().all(|&l| l == 0));
    }

    #[test]
    fn one_and_two_symbols() {
        let lengths = build_huffman_lengths(&[0, 0, 100, 0, 0], 15);
        assert_eq!(lengths, [0, 0, 1, 0, 0]);
        let lengths = build_huffman_lengths(&[100, 100, 0, 0, 0], 15);
        assert_eq!(lengths, [1, 1, 0, 0, 0]);
    }

    #[test]
    fn frequent_symbols_get_shorter_codes() {
        let lengths = build_huffman_lengths(&[1, 10, 100, 1000], 15);
        assert!(lengths[3] <= lengths[2]);
        assert!(lengths[2] <= lengths[1]);
        assert!(lengths[1] <= lengths[0]);
        assert_eq!(kraft_sum(&lengths), 1 << 15);
    }

    #[test]
    fn depth_limit_holds() {
        // Fibonacci counts produce the deepest unconstrained tree
        let mut freq = vec![1u32, 1];
        while freq.len() < 30 {
            let n = freq.len();
            freq.push(freq[n - 1] + freq[n - 2]);
        }
        let lengths = build_huffman_lengths(&freq, 7);
        assert!(lengths.iter().all(|&l| (1..=7).contains(&l)));
        assert_eq!(kraft_sum(&lengths), 1 << 15);
    }

    #[test]
    fn canonical_codes_are_bit_reversed() {
        let codes = build_huffman_codes(&[2, 2, 3, 3]);
        // canonical 00, 01, 100, 101 reversed
        assert_eq!(codes[0].code, 0b00);
        assert_eq!(codes[1].code, 0b10);
        assert_eq!(codes[2].code, 0b001);
        assert_eq!(codes[3].code, 0b101);
    }

    #[test]
    fn lone_symbol_costs_nothing() {
        let mut histogram = vec![0u32; 280];
        histogram[270] = 50;
        let code = PrefixCode::from_histogram(&histogram);
        assert_eq!(code.cost(&histogram), 0);
        let mut w = BitWriter::default();
        code.write_symbol(&mut w, 270);
        assert_eq!(w.bit_position(), 0);
    }
}
