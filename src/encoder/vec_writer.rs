//! Little-endian field writers for `Vec<u8>`, usable without `std::io`.

use alloc::vec::Vec;

pub(crate) trait VecWriter {
    fn write_all(&mut self, data: &[u8]);

    fn write_u16_le(&mut self, v: u16);

    /// Writes the low three bytes of `v`, as RIFF canvas and frame fields are stored.
    fn write_u24_le(&mut self, v: u32);

    fn write_u32_le(&mut self, v: u32);
}

impl VecWriter for Vec<u8> {
    #[inline]
    fn write_all(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }

    #[inline]
    fn write_u16_le(&mut self, v: u16) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn write_u24_le(&mut self, v: u32) {
        debug_assert!(v < 1 << 24);
        self.extend_from_slice(&v.to_le_bytes()[..3]);
    }

    #[inline]
    fn write_u32_le(&mut self, v: u32) {
        self.extend_from_slice(&v.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_little_endian() {
        let mut out = Vec::new();
        out.write_u16_le(0x0102);
        out.write_u24_le(0x0a0b0c);
        out.write_u32_le(0xdead_beef);
        out.write_all(b"VP8L");
        assert_eq!(out, [2, 1, 0x0c, 0x0b, 0x0a, 0xef, 0xbe, 0xad, 0xde, b'V', b'P', b'8', b'L']);
    }
}
