//! VP8 boolean entropy encoder, the mirror of `decoder::arithmetic`.

use alloc::vec::Vec;

pub(crate) struct BoolWriter {
    out: Vec<u8>,
    /// Low end of the current interval.
    bottom: u32,
    /// Interval width, 128..=255 between calls.
    range: u32,
    /// Bits left before the next output byte is complete.
    bit_count: i32,
}

impl BoolWriter {
    pub(crate) fn new() -> Self {
        Self::with_capacity(0)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
            bottom: 0,
            range: 255,
            bit_count: 24,
        }
    }

    /// Propagates a carry into the bytes already written.
    fn carry(&mut self) {
        for byte in self.out.iter_mut().rev() {
            if *byte == 255 {
                *byte = 0;
            } else {
                *byte += 1;
                return;
            }
        }
    }

    pub(crate) fn write_bool(&mut self, bit: bool, prob: u8) {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
        if bit {
            self.bottom = self.bottom.wrapping_add(split);
            self.range -= split;
        } else {
            self.range = split;
        }
        while self.range < 128 {
            self.range <<= 1;
            if self.bottom & (1 << 31) != 0 {
                self.carry();
            }
            self.bottom <<= 1;
            self.bit_count -= 1;
            if self.bit_count == 0 {
                self.out.push((self.bottom >> 24) as u8);
                self.bottom &= (1 << 24) - 1;
                self.bit_count = 8;
            }
        }
    }

    pub(crate) fn write_flag(&mut self, flag: bool) {
        self.write_bool(flag, 128);
    }

    /// Writes the low `n` bits of `value`, most significant first.
    pub(crate) fn write_literal(&mut self, n: u8, value: u32) {
        for bit in (0..n).rev() {
            self.write_flag((value >> bit) & 1 != 0);
        }
    }

    /// Magnitude then sign, the inverse of `BoolReader::read_signed`.
    pub(crate) fn write_signed(&mut self, n: u8, value: i32) {
        self.write_literal(n, value.unsigned_abs());
        self.write_flag(value < 0);
    }

    /// Presence flag plus signed value; zero is written as absent.
    pub(crate) fn write_optional_signed(&mut self, n: u8, value: i32) {
        self.write_flag(value != 0);
        if value != 0 {
            self.write_signed(n, value);
        }
    }

    pub(crate) fn write_tree(&mut self, tree: &[i8], probs: &[u8], value: i8) {
        self.write_tree_from(tree, probs, value, 0);
    }

    /// Encodes `value` by walking `tree` from node `start`.
    ///
    /// Trees are at most a dozen levels deep, so the path is found by a
    /// depth-first search and replayed root first.
    pub(crate) fn write_tree_from(&mut self, tree: &[i8], probs: &[u8], value: i8, start: usize) {
        let mut path = [(0usize, false); 16];
        let mut depth = 0;
        if find_path(tree, start, value, &mut path, &mut depth) {
            for &(node, bit) in &path[..depth] {
                self.write_bool(bit, probs[node >> 1]);
            }
        } else {
            log::warn!("value {value} is not a leaf of the coding tree");
        }
    }

    /// Pads the final interval and returns the encoded bytes.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        let mut c = self.bit_count;
        let mut v = self.bottom;
        if v & (1 << (32 - c)) != 0 {
            self.carry();
        }
        v <<= c & 7;
        c = (c >> 3) - 1;
        while c >= 0 {
            v <<= 8;
            c -= 1;
        }
        for _ in 0..4 {
            self.out.push((v >> 24) as u8);
            v <<= 8;
        }
        self.out
    }
}

fn find_path(
    tree: &[i8],
    node: usize,
    value: i8,
    path: &mut [(usize, bool); 16],
    depth: &mut usize,
) -> bool {
    if *depth == path.len() {
        return false;
    }
    for bit in [false, true] {
        path[*depth] = (node, bit);
        *depth += 1;
        let next = tree[node + usize::from(bit)];
        let found = if next <= 0 {
            -next == value
        } else {
            find_path(tree, next as usize, value, path, depth)
        };
        if found {
            return true;
        }
        *depth -= 1;
    }
    false
}
