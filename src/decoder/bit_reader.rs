//! LSB-first bit reader for the VP8L bitstream.

use byteorder_lite::{ByteOrder, LittleEndian};

/// Reads bits least significant first from a byte slice.
///
/// Past the end of the data the reader yields zero bits and remembers that it
/// ran dry, so callers decide whether that is fatal.
#[derive(Clone)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    buffer: u64,
    nbits: u8,
    overrun: bool,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            buffer: 0,
            nbits: 0,
            overrun: false,
        }
    }

    /// Tops the buffer up to at least 56 bits while input remains.
    #[inline]
    pub(crate) fn fill(&mut self) {
        if self.nbits >= 56 {
            return;
        }
        if self.pos + 8 <= self.data.len() {
            let chunk = LittleEndian::read_u64(&self.data[self.pos..]);
            self.buffer |= chunk << self.nbits;
            let bytes = (63 - self.nbits) / 8;
            self.pos += usize::from(bytes);
            self.nbits += bytes * 8;
        } else {
            while self.nbits <= 56 && self.pos < self.data.len() {
                self.buffer |= u64::from(self.data[self.pos]) << self.nbits;
                self.pos += 1;
                self.nbits += 8;
            }
        }
    }

    /// The next `n` bits without consuming them. Call [`fill`](Self::fill) first.
    #[inline]
    pub(crate) fn peek(&self, n: u8) -> u64 {
        debug_assert!(n <= 56);
        self.buffer & ((1u64 << n) - 1)
    }

    #[inline]
    pub(crate) fn consume(&mut self, n: u8) {
        if n > self.nbits {
            self.overrun = true;
            self.buffer = 0;
            self.nbits = 0;
        } else {
            self.buffer >>= n;
            self.nbits -= n;
        }
    }

    /// Reads `n <= 32` bits as an unsigned value.
    #[inline]
    pub(crate) fn read_bits(&mut self, n: u8) -> u32 {
        self.fill();
        let value = self.peek(n) as u32;
        self.consume(n);
        value
    }

    #[inline]
    pub(crate) fn read_bit(&mut self) -> bool {
        self.read_bits(1) == 1
    }

    /// True once more bits were consumed than the data holds.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.overrun
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_least_significant_bits_first() {
        let mut reader = BitReader::new(&[0b1010_1101, 0xFF, 0x03]);
        assert_eq!(reader.read_bits(3), 0b101);
        assert_eq!(reader.read_bits(2), 0b01);
        assert_eq!(reader.read_bits(3), 0b101);
        assert_eq!(reader.read_bits(10), 0x3FF);
        assert!(!reader.is_exhausted());
    }

    #[test]
    fn long_input_uses_word_refill() {
        let data: [u8; 12] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let mut reader = BitReader::new(&data);
        for &expected in &data {
            assert_eq!(reader.read_bits(8), u32::from(expected));
        }
        assert!(!reader.is_exhausted());
    }

    #[test]
    fn reads_past_end_are_zero() {
        let mut reader = BitReader::new(&[0xFF]);
        assert_eq!(reader.read_bits(4), 0xF);
        assert_eq!(reader.read_bits(8), 0xF);
        assert!(reader.is_exhausted());
        assert_eq!(reader.read_bits(16), 0);
    }

    #[test]
    fn identical_input_gives_identical_bits() {
        let data = [0x5a, 0xc3, 0x99, 0x01, 0x7e];
        let read_all = || {
            let mut reader = BitReader::new(&data);
            (0..13).map(|_| reader.read_bits(3)).collect::<alloc::vec::Vec<_>>()
        };
        assert_eq!(read_all(), read_all());
    }
}
