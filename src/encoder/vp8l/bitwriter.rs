//! LSB-first bit writer for the VP8L bitstream.

use alloc::vec::Vec;

/// Packs bits least significant first, the mirror of the decoder's reader.
#[derive(Clone, Debug, Default)]
pub(super) struct BitWriter {
    buffer: Vec<u8>,
    bits: u64,
    used: u8,
}

impl BitWriter {
    pub(super) fn with_capacity(cap: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(cap),
            bits: 0,
            used: 0,
        }
    }

    /// Writes the low `n_bits` of `value`.
    #[inline]
    pub(super) fn write_bits(&mut self, value: u64, n_bits: u8) {
        debug_assert!(n_bits <= 32);
        debug_assert!(n_bits == 0 || (value >> n_bits) == 0);

        self.bits |= value << self.used;
        self.used += n_bits;
        while self.used >= 8 {
            self.buffer.push(self.bits as u8);
            self.bits >>= 8;
            self.used -= 8;
        }
    }

    #[inline]
    pub(super) fn write_bit(&mut self, bit: bool) {
        self.write_bits(u64::from(bit), 1);
    }

    /// Bits written so far.
    pub(super) fn bit_position(&self) -> usize {
        self.buffer.len() * 8 + usize::from(self.used)
    }

    /// Pads the last byte with zeros and returns the bytes.
    pub(super) fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.buffer.push(self.bits as u8);
        }
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_lsb_first() {
        let mut w = BitWriter::default();
        w.write_bits(0b101, 3);
        w.write_bits(0b11, 2);
        w.write_bits(0b111, 3);
        assert_eq!(w.bit_position(), 8);
        assert_eq!(w.finish(), [0xFD]);
    }

    #[test]
    fn partial_byte_is_padded() {
        let mut w = BitWriter::default();
        // a 14-bit dimension field as in the VP8L header
        w.write_bits(1023, 14);
        w.write_bit(true);
        assert_eq!(w.finish(), [0xFF, 0x43]);
    }
}
