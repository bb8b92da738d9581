//! LZ77 backward references over ARGB pixels.
//!
//! Matches are found through a hash chain over pixel pairs. Distances are
//! emitted as plane codes so that short 2D offsets get small symbols.

use alloc::vec;
use alloc::vec::Vec;

use enough::{Stop, StopReason};

use crate::decoder::lossless::color_cache_key;

use super::types::{BackwardRefs, PixOrCopy, MAX_LENGTH, MIN_LENGTH, WINDOW_SIZE};

const HASH_BITS: u32 = 16;
/// Candidates examined per position.
const MAX_CHAIN_ITERS: usize = 48;

/// Plane code minus one, indexed by `yoffset * 16 + 8 - xoffset`.
#[rustfmt::skip]
const PLANE_TO_CODE_LUT: [u8; 128] = [
    96,  73,  55,  39,  23, 13, 5,  1,  255, 255, 255, 255, 255, 255, 255, 255,
    101, 78,  58,  42,  26, 16, 8,  2,  0,   3,   9,   17,  27,  43,  59,  79,
    102, 86,  62,  46,  32, 20, 10, 6,  4,   7,   11,  21,  33,  47,  63,  87,
    105, 90,  70,  52,  37, 28, 18, 14, 12,  15,  19,  29,  38,  53,  71,  91,
    110, 99,  82,  66,  48, 35, 30, 24, 22,  25,  31,  36,  49,  67,  83,  100,
    115, 108, 94,  76,  64, 50, 44, 40, 34,  41,  45,  51,  65,  77,  95,  109,
    118, 113, 103, 92,  80, 68, 60, 56, 54,  57,  61,  69,  81,  93,  104, 114,
    119, 116, 111, 106, 97, 88, 84, 74, 72,  75,  85,  89,  98,  107, 112, 117
];

/// Distance code for a linear distance in an image `xsize` pixels wide.
pub(super) fn distance_to_plane_code(xsize: usize, dist: usize) -> u32 {
    let yoffset = dist / xsize;
    let xoffset = dist - yoffset * xsize;

    if xoffset <= 8 && yoffset < 8 {
        u32::from(PLANE_TO_CODE_LUT[yoffset * 16 + 8 - xoffset]) + 1
    } else if xoffset + 8 > xsize && yoffset < 7 {
        u32::from(PLANE_TO_CODE_LUT[(yoffset + 1) * 16 + 8 + (xsize - xoffset)]) + 1
    } else {
        (dist + 120) as u32
    }
}

#[inline]
fn hash_pair(a: u32, b: u32) -> usize {
    let key = a.wrapping_mul(0x9e37_79b1) ^ b.wrapping_mul(0x85eb_ca6b).rotate_left(13);
    (key >> (32 - HASH_BITS)) as usize
}

/// Pairwise hash chain: `prev[pos]` is the previous position whose pixel pair
/// hashed like the one at `pos`.
struct HashChain {
    head: Vec<i32>,
    prev: Vec<i32>,
}

impl HashChain {
    fn new(size: usize) -> Self {
        Self {
            head: vec![-1; 1 << HASH_BITS],
            prev: vec![-1; size],
        }
    }

    fn insert(&mut self, argb: &[u32], pos: usize) {
        if pos + 1 < argb.len() {
            let h = hash_pair(argb[pos], argb[pos + 1]);
            self.prev[pos] = self.head[h];
            self.head[h] = pos as i32;
        }
    }

    fn candidates<'c>(&'c self, argb: &[u32], pos: usize) -> impl Iterator<Item = usize> + 'c {
        let first = if pos + 1 < argb.len() {
            self.head[hash_pair(argb[pos], argb[pos + 1])]
        } else {
            -1
        };
        core::iter::successors((first >= 0).then_some(first as usize), |&p| {
            let next = self.prev[p];
            (next >= 0).then_some(next as usize)
        })
        .take(MAX_CHAIN_ITERS)
    }
}

#[inline]
fn match_length(argb: &[u32], pos: usize, dist: usize, max: usize) -> usize {
    argb[pos..pos + max]
        .iter()
        .zip(&argb[pos - dist..])
        .take_while(|(a, b)| a == b)
        .count()
}

/// Longest match for `pos`, as `(length, distance)`. The pixel above and the
/// one to the left are always tried.
fn find_match(argb: &[u32], width: usize, pos: usize, chain: &HashChain) -> (usize, usize) {
    let max = (argb.len() - pos).min(MAX_LENGTH);
    let mut best = (0usize, 0usize);
    if max < MIN_LENGTH {
        return best;
    }

    let fixed = [1, width].into_iter().filter(|&d| d <= pos);
    let chained = chain
        .candidates(argb, pos)
        .map(|p| pos - p)
        .filter(|&d| d <= WINDOW_SIZE);
    for dist in fixed.chain(chained) {
        let len = match_length(argb, pos, dist, max);
        if len > best.0 {
            best = (len, dist);
            if len == max {
                break;
            }
        }
    }
    best
}

/// Turns `argb` into literals, cache hits and copies. Stop is polled once per
/// image row.
pub(super) fn compute_backward_refs(
    argb: &[u32],
    width: usize,
    cache_bits: Option<u8>,
    stop: &dyn Stop,
) -> Result<BackwardRefs, StopReason> {
    let size = argb.len();
    let mut refs = BackwardRefs::with_capacity(size / 2);
    let mut chain = HashChain::new(size);
    let mut cache = cache_bits.map(|bits| (bits, vec![0u32; 1 << bits]));

    let mut pos = 0;
    let mut next_row = 0;
    while pos < size {
        if pos >= next_row {
            stop.check()?;
            next_row = (pos / width + 1) * width;
        }

        let (len, dist) = find_match(argb, width, pos, &chain);
        let token = if len >= MIN_LENGTH {
            PixOrCopy::Copy {
                length: len as u16,
                dist_code: distance_to_plane_code(width, dist),
            }
        } else {
            let pixel = argb[pos];
            match &cache {
                Some((bits, colors)) if colors[color_cache_key(pixel, *bits)] == pixel => {
                    PixOrCopy::CacheIndex(color_cache_key(pixel, *bits) as u16)
                }
                _ => PixOrCopy::Literal(pixel),
            }
        };

        let end = pos + token.len();
        for p in pos..end {
            chain.insert(argb, p);
            if let Some((bits, colors)) = cache.as_mut() {
                colors[color_cache_key(argb[p], *bits)] = argb[p];
            }
        }
        refs.push(token);
        pos = end;
    }

    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::lossless::plane_code_to_distance;
    use enough::Unstoppable;

    #[test]
    fn plane_codes_invert_for_any_width() {
        for xsize in [1, 2, 3, 7, 8, 9, 100] {
            for dist in 1..=300 {
                let code = distance_to_plane_code(xsize, dist);
                assert_eq!(plane_code_to_distance(xsize, code as usize), dist, "xsize {xsize} dist {dist}");
            }
        }
        assert_eq!(distance_to_plane_code(100, 1), 2);
        assert_eq!(distance_to_plane_code(100, 100), 1);
    }

    #[test]
    fn flat_image_becomes_one_literal_and_copies() {
        let pixels = vec![0xff00_0000u32; 100];
        let refs = compute_backward_refs(&pixels, 10, None, &Unstoppable).unwrap();
        assert_eq!(refs[0], PixOrCopy::Literal(0xff00_0000));
        assert!(refs[1..].iter().all(|t| matches!(t, PixOrCopy::Copy { .. })));
        assert_eq!(refs.iter().map(PixOrCopy::len).sum::<usize>(), 100);
    }

    #[test]
    fn cache_hits_replace_repeated_literals() {
        let pixels = [1u32, 2, 1, 3, 2];
        let refs = compute_backward_refs(&pixels, 5, Some(4), &Unstoppable).unwrap();
        assert_eq!(refs[0], PixOrCopy::Literal(1));
        assert_eq!(refs[2], PixOrCopy::CacheIndex(color_cache_key(1, 4) as u16));
        assert_eq!(refs[4], PixOrCopy::CacheIndex(color_cache_key(2, 4) as u16));
    }
}
