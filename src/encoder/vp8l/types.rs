//! Tokens and alphabet constants shared by the VP8L encoder stages.

use alloc::vec::Vec;

/// Longest copy a length prefix code can express.
pub(super) const MAX_LENGTH: usize = 4095;
/// Farthest copy a distance prefix code can express, less the 120 plane codes.
pub(super) const WINDOW_SIZE: usize = (1 << 20) - 120;
/// Shortest copy worth emitting.
pub(super) const MIN_LENGTH: usize = 4;

pub(super) const NUM_LITERAL_CODES: usize = 256;
pub(super) const NUM_LENGTH_CODES: usize = 24;
pub(super) const NUM_DISTANCE_CODES: usize = 40;

/// Color cache size used for the main image when it pays off.
pub(super) const CACHE_BITS: u8 = 10;

/// One entropy-coded unit of an image stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum PixOrCopy {
    Literal(u32),
    CacheIndex(u16),
    /// `length` pixels copied from the distance code `dist_code` back.
    Copy { length: u16, dist_code: u32 },
}

impl PixOrCopy {
    /// Pixels this token produces.
    pub(super) fn len(&self) -> usize {
        match self {
            Self::Copy { length, .. } => usize::from(*length),
            _ => 1,
        }
    }
}

pub(super) type BackwardRefs = Vec<PixOrCopy>;

/// Splits a length or distance value (>= 1) into its prefix symbol, the
/// number of extra bits and their value.
#[inline]
pub(super) fn prefix_encode(value: usize) -> (u16, u8, u32) {
    let d = value - 1;
    if d < 4 {
        return (d as u16, 0, 0);
    }
    let high = (usize::BITS - 1 - d.leading_zeros()) as usize;
    let second = (d >> (high - 1)) & 1;
    let extra_bits = (high - 1) as u8;
    let symbol = (2 * high + second) as u16;
    (symbol, extra_bits, (d & ((1 << extra_bits) - 1)) as u32)
}
