//! Byte cursor over an input slice, used for RIFF and chunk header parsing.
//!
//! Every read is bounds checked; running off the end is reported as
//! [`DecodeError::Truncated`].

use byteorder_lite::{ByteOrder, LittleEndian};
use core::fmt;

use crate::decoder::DecodeError;

/// A position-tracking reader over a borrowed byte slice.
#[derive(Clone)]
pub(crate) struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    #[inline]
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub(crate) fn position(&self) -> u64 {
        self.pos as u64
    }

    /// The whole underlying slice.
    #[inline]
    pub(crate) fn get_ref(&self) -> &'a [u8] {
        self.data
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    #[inline]
    fn ensure(&self, n: usize) -> Result<(), DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::Truncated);
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn seek_from_start(&mut self, pos: u64) -> Result<(), DecodeError> {
        let pos = usize::try_from(pos).map_err(|_| DecodeError::Truncated)?;
        if pos > self.data.len() {
            return Err(DecodeError::Truncated);
        }
        self.pos = pos;
        Ok(())
    }

    #[inline]
    pub(crate) fn seek_relative(&mut self, offset: i64) -> Result<(), DecodeError> {
        let new_pos = if offset >= 0 {
            usize::try_from(offset)
                .ok()
                .and_then(|o| self.pos.checked_add(o))
        } else {
            usize::try_from(offset.unsigned_abs())
                .ok()
                .and_then(|o| self.pos.checked_sub(o))
        };

        match new_pos {
            Some(pos) if pos <= self.data.len() => {
                self.pos = pos;
                Ok(())
            }
            _ => Err(DecodeError::Truncated),
        }
    }

    #[inline]
    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        let n = buf.len();
        self.ensure(n)?;
        buf.copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(())
    }

    #[inline]
    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    pub(crate) fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        self.ensure(2)?;
        let val = LittleEndian::read_u16(&self.data[self.pos..]);
        self.pos += 2;
        Ok(val)
    }

    #[inline]
    pub(crate) fn read_u24_le(&mut self) -> Result<u32, DecodeError> {
        self.ensure(3)?;
        let val = LittleEndian::read_u24(&self.data[self.pos..]);
        self.pos += 3;
        Ok(val)
    }

    #[inline]
    pub(crate) fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        self.ensure(4)?;
        let val = LittleEndian::read_u32(&self.data[self.pos..]);
        self.pos += 4;
        Ok(val)
    }

    /// Borrows the next `n` bytes and advances past them.
    #[inline]
    pub(crate) fn take_slice(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

impl fmt::Debug for SliceReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceReader")
            .field("len", &self.data.len())
            .field("pos", &self.pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a];
        let mut r = SliceReader::new(&data);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16_le().unwrap(), 0x0302);
        assert_eq!(r.read_u24_le().unwrap(), 0x06_0504);
        assert_eq!(r.read_u32_le().unwrap(), 0x0a09_0807);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn reads_past_end_are_truncation() {
        let mut r = SliceReader::new(&[1, 2, 3]);
        assert!(matches!(r.read_u32_le(), Err(DecodeError::Truncated)));
        // a failed read does not move the cursor
        assert_eq!(r.position(), 0);
        assert_eq!(r.take_slice(3).unwrap(), &[1, 2, 3]);
        assert!(matches!(r.read_u8(), Err(DecodeError::Truncated)));
    }

    #[test]
    fn seeking() {
        let mut r = SliceReader::new(&[0u8; 8]);
        r.seek_from_start(6).unwrap();
        r.seek_relative(-4).unwrap();
        assert_eq!(r.position(), 2);
        assert!(r.seek_relative(7).is_err());
        assert!(r.seek_relative(-3).is_err());
        assert!(r.seek_from_start(9).is_err());
        assert!(r.seek_from_start(8).is_ok());
    }
}
