//! VP8 boolean entropy decoder (RFC 6386 section 7).
//!
//! The window holds up to 56 bits loaded seven bytes at a time and the range
//! is kept as `range - 1`. Reads past the end of the buffer shift in zero
//! bits, so truncated partitions decode deterministically instead of failing.

/// Bits loaded per refill.
const BITS: i32 = 56;
const BYTES_PER_LOAD: usize = 7;

pub(crate) struct BoolReader<'a> {
    value: u64,
    /// `range - 1`, always in 127..=254 between calls.
    range: u32,
    /// Number of unread bits in `value` beyond the current 8-bit window.
    bits: i32,
    buf: &'a [u8],
    eof: bool,
}

impl<'a> BoolReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        let mut reader = Self {
            value: 0,
            range: 255 - 1,
            bits: -8,
            buf: data,
            eof: false,
        };
        reader.load_new_bytes();
        reader
    }

    #[cold]
    fn load_final_bytes(&mut self) {
        if let Some((&byte, rest)) = self.buf.split_first() {
            self.bits += 8;
            self.value = u64::from(byte) | (self.value << 8);
            self.buf = rest;
        } else if !self.eof {
            self.value <<= 8;
            self.bits += 8;
            self.eof = true;
        } else {
            self.bits = 0;
        }
    }

    #[inline]
    fn load_new_bytes(&mut self) {
        if self.buf.len() >= BYTES_PER_LOAD {
            let mut bytes = [0u8; 8];
            bytes[1..].copy_from_slice(&self.buf[..BYTES_PER_LOAD]);
            self.value = u64::from_be_bytes(bytes) | (self.value << BITS);
            self.bits += BITS;
            self.buf = &self.buf[BYTES_PER_LOAD..];
        } else {
            self.load_final_bytes();
        }
    }

    /// Decodes one bool whose probability of being `false` is `prob / 256`.
    #[inline]
    pub(crate) fn read_bool(&mut self, prob: u8) -> bool {
        if self.bits < 0 {
            self.load_new_bytes();
        }
        let mut range = self.range;
        let pos = self.bits;
        let split = (range * u32::from(prob)) >> 8;
        let value = (self.value >> pos) as u32;
        let bit = value > split;
        if bit {
            range -= split;
            self.value -= (u64::from(split) + 1) << pos;
        } else {
            range = split + 1;
        }
        let shift = 7 ^ (31 ^ range.leading_zeros() as i32);
        range <<= shift;
        self.bits -= shift;
        self.range = range - 1;
        bit
    }

    #[inline]
    pub(crate) fn read_flag(&mut self) -> bool {
        self.read_bool(128)
    }

    /// Reads an `n`-bit unsigned value, most significant bit first.
    pub(crate) fn read_literal(&mut self, n: u8) -> u32 {
        (0..n).fold(0, |v, _| (v << 1) | u32::from(self.read_flag()))
    }

    /// Magnitude followed by a sign flag (set means negative).
    pub(crate) fn read_signed(&mut self, n: u8) -> i32 {
        let magnitude = self.read_literal(n) as i32;
        if self.read_flag() {
            -magnitude
        } else {
            magnitude
        }
    }

    /// A presence flag, then [`read_signed`](Self::read_signed) if set.
    pub(crate) fn read_optional_signed(&mut self, n: u8) -> i32 {
        if self.read_flag() {
            self.read_signed(n)
        } else {
            0
        }
    }

    pub(crate) fn read_tree(&mut self, tree: &[i8], probs: &[u8]) -> i8 {
        self.read_tree_from(tree, probs, 0)
    }

    /// Walks `tree` from node `start`. Leaves are stored negated.
    pub(crate) fn read_tree_from(&mut self, tree: &[i8], probs: &[u8], start: usize) -> i8 {
        let mut node = start;
        loop {
            let next = tree[node + usize::from(self.read_bool(probs[node >> 1]))];
            if next <= 0 {
                return -next;
            }
            node = next as usize;
        }
    }

    /// True once the reader has consumed past the end of its buffer.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.eof
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_bytes_decode() {
        // output of the boolean encoder for the same sequence
        let mut reader = BoolReader::new(&[104, 101, 107, 128]);
        assert!(!reader.read_flag());
        assert!(reader.read_bool(10));
        assert!(!reader.read_bool(250));
        assert_eq!(reader.read_literal(1), 1);
        assert_eq!(reader.read_literal(3), 5);
        assert_eq!(reader.read_literal(8), 64);
        assert_eq!(reader.read_literal(8), 185);
    }

    #[test]
    fn reading_past_the_end_is_deterministic() {
        let data = [0x9au8, 0x3c];
        let mut a = BoolReader::new(&data);
        let mut b = BoolReader::new(&data);
        let xs: [u32; 40] = core::array::from_fn(|_| a.read_literal(7));
        let ys: [u32; 40] = core::array::from_fn(|_| b.read_literal(7));
        assert_eq!(xs, ys);
        assert!(a.is_exhausted());
    }

    #[test]
    fn empty_input_reads_zeros() {
        let mut reader = BoolReader::new(&[]);
        assert_eq!(reader.read_literal(16), 0);
    }
}
