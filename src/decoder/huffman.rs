//! Canonical prefix codes for VP8L.
//!
//! Codes up to [`TABLE_BITS`] long resolve with one table lookup on the
//! peeked bits; longer codes fall back to walking the canonical code one bit
//! at a time.

use alloc::vec;
use alloc::vec::Vec;

use super::api::DecodeError;
use super::bit_reader::BitReader;

const MAX_CODE_LENGTH: usize = 15;
const TABLE_BITS: u8 = 10;

/// Table entry: `length << 12 | symbol`. Length 0 marks a code longer than the table.
const LENGTH_SHIFT: u16 = 12;
const SYMBOL_MASK: u16 = (1 << LENGTH_SHIFT) - 1;

#[derive(Clone, Debug)]
enum HuffmanTreeInner {
    /// Only one symbol is used; it costs zero bits.
    Single(u16),
    Tree {
        table: Vec<u16>,
        table_bits: u8,
        /// Number of codes of each length.
        counts: [u16; MAX_CODE_LENGTH + 1],
        /// Symbols ordered by (length, symbol), i.e. by canonical code.
        sorted: Vec<u16>,
    },
}

/// A decoding table for one canonical prefix code.
#[derive(Clone, Debug)]
pub(crate) struct HuffmanTree(HuffmanTreeInner);

fn reverse_bits(code: u16, len: usize) -> u16 {
    code.reverse_bits() >> (16 - len)
}

impl HuffmanTree {
    /// Builds the code from per-symbol lengths (0 = unused).
    ///
    /// The lengths must describe a complete prefix code, except that a single
    /// used symbol is accepted and decodes without reading bits.
    pub(crate) fn build_implicit(code_lengths: &[u16]) -> Result<Self, DecodeError> {
        let mut counts = [0u16; MAX_CODE_LENGTH + 1];
        let mut used = 0usize;
        let mut last_symbol = 0u16;
        for (symbol, &len) in code_lengths.iter().enumerate() {
            if usize::from(len) > MAX_CODE_LENGTH {
                return Err(DecodeError::HuffmanError);
            }
            if len > 0 {
                counts[usize::from(len)] += 1;
                used += 1;
                last_symbol = symbol as u16;
            }
        }

        match used {
            0 => return Err(DecodeError::HuffmanError),
            1 => return Ok(Self(HuffmanTreeInner::Single(last_symbol))),
            _ => {}
        }

        // Kraft sum must be exactly one
        let mut open: i32 = 1;
        for &count in &counts[1..] {
            open = open * 2 - i32::from(count);
            if open < 0 {
                return Err(DecodeError::HuffmanError);
            }
        }
        if open != 0 {
            return Err(DecodeError::HuffmanError);
        }

        let mut offsets = [0u16; MAX_CODE_LENGTH + 2];
        for len in 1..=MAX_CODE_LENGTH {
            offsets[len + 1] = offsets[len] + counts[len];
        }
        let mut sorted = vec![0u16; used];
        for (symbol, &len) in code_lengths.iter().enumerate() {
            if len > 0 {
                let slot = &mut offsets[usize::from(len)];
                sorted[usize::from(*slot)] = symbol as u16;
                *slot += 1;
            }
        }

        let max_len = (1..=MAX_CODE_LENGTH).rev().find(|&l| counts[l] > 0).unwrap_or(1);
        let table_bits = (max_len as u8).min(TABLE_BITS);
        let mut table = vec![0u16; 1 << table_bits];

        // walk the canonical codes in order, filling every table slot whose
        // low bits match the bit-reversed code
        let mut code = 0u16;
        let mut index = 0usize;
        for len in 1..=MAX_CODE_LENGTH {
            for _ in 0..counts[len] {
                let symbol = sorted[index];
                index += 1;
                if len <= usize::from(table_bits) {
                    let entry = ((len as u16) << LENGTH_SHIFT) | symbol;
                    let reversed = usize::from(reverse_bits(code, len));
                    let mut slot = reversed;
                    while slot < table.len() {
                        table[slot] = entry;
                        slot += 1 << len;
                    }
                }
                code += 1;
            }
            code <<= 1;
        }

        Ok(Self(HuffmanTreeInner::Tree {
            table,
            table_bits,
            counts,
            sorted,
        }))
    }

    #[cfg(test)]
    pub(crate) fn is_single(&self) -> bool {
        matches!(self.0, HuffmanTreeInner::Single(_))
    }

    /// Reads one symbol.
    #[inline]
    pub(crate) fn read_symbol(&self, reader: &mut BitReader<'_>) -> Result<u16, DecodeError> {
        match &self.0 {
            HuffmanTreeInner::Single(symbol) => Ok(*symbol),
            HuffmanTreeInner::Tree {
                table,
                table_bits,
                counts,
                sorted,
            } => {
                reader.fill();
                let entry = table[reader.peek(*table_bits) as usize];
                let len = entry >> LENGTH_SHIFT;
                if len > 0 {
                    reader.consume(len as u8);
                    return Ok(entry & SYMBOL_MASK);
                }
                Self::read_long(reader, counts, sorted)
            }
        }
    }

    #[cold]
    fn read_long(
        reader: &mut BitReader<'_>,
        counts: &[u16; MAX_CODE_LENGTH + 1],
        sorted: &[u16],
    ) -> Result<u16, DecodeError> {
        let bits = reader.peek(MAX_CODE_LENGTH as u8);
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..=MAX_CODE_LENGTH {
            code |= ((bits >> (len - 1)) & 1) as i32;
            let count = i32::from(counts[len]);
            if code - first < count {
                reader.consume(len as u8);
                return Ok(sorted[(index + code - first) as usize]);
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(DecodeError::HuffmanError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Packs `(code, len)` pairs the way a VP8L writer does: codes go out MSB first.
    fn pack(codes: &[(u16, usize)]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut acc = 0u64;
        let mut nbits = 0;
        for &(code, len) in codes {
            acc |= u64::from(reverse_bits(code, len)) << nbits;
            nbits += len;
            while nbits >= 8 {
                out.push(acc as u8);
                acc >>= 8;
                nbits -= 8;
            }
        }
        if nbits > 0 {
            out.push(acc as u8);
        }
        out
    }

    #[test]
    fn canonical_codes_decode() {
        // lengths A=2 B=1 C=3 D=3 give codes B=0, A=10, C=110, D=111
        let tree = HuffmanTree::build_implicit(&[2, 1, 3, 3]).unwrap();
        let data = pack(&[(0b0, 1), (0b10, 2), (0b110, 3), (0b111, 3), (0b10, 2)]);
        let mut reader = BitReader::new(&data);
        let symbols: Vec<u16> = (0..5).map(|_| tree.read_symbol(&mut reader).unwrap()).collect();
        assert_eq!(symbols, [1, 0, 2, 3, 0]);
    }

    #[test]
    fn long_codes_use_the_slow_path() {
        // a skewed code reaching 12 bits, longer than the lookup table
        let mut lengths = alloc::vec![0u16; 13];
        for (i, len) in lengths.iter_mut().enumerate().take(12) {
            *len = i as u16 + 1;
        }
        lengths[12] = 12;
        let tree = HuffmanTree::build_implicit(&lengths).unwrap();

        // symbol 11 has code 0b1111_1111_1110, symbol 12 has 0b1111_1111_1111
        let data = pack(&[(0b1111_1111_1110, 12), (0b0, 1), (0b1111_1111_1111, 12)]);
        let mut reader = BitReader::new(&data);
        assert_eq!(tree.read_symbol(&mut reader).unwrap(), 11);
        assert_eq!(tree.read_symbol(&mut reader).unwrap(), 0);
        assert_eq!(tree.read_symbol(&mut reader).unwrap(), 12);
    }

    #[test]
    fn single_symbol_reads_no_bits() {
        let tree = HuffmanTree::build_implicit(&[0, 0, 7, 0]).unwrap();
        assert!(tree.is_single());
        let mut reader = BitReader::new(&[]);
        assert_eq!(tree.read_symbol(&mut reader).unwrap(), 2);
        assert!(!reader.is_exhausted());
    }

    #[test]
    fn incomplete_and_oversubscribed_codes_are_rejected() {
        assert!(HuffmanTree::build_implicit(&[1, 2]).is_err());
        assert!(HuffmanTree::build_implicit(&[1, 1, 1]).is_err());
        assert!(HuffmanTree::build_implicit(&[0, 0]).is_err());
        assert!(HuffmanTree::build_implicit(&[16, 1]).is_err());
    }
}
