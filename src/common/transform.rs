//! 4x4 transforms: the VP8 integer DCT and Walsh-Hadamard pair.
//!
//! The inverse transforms are bit-exact with RFC 6386 section 14. The forward
//! transforms are only used by the encoder and need not be exact inverses.

/// cos(pi/8) * sqrt(2) - 1 in 16-bit fixed point.
const COS_MINUS_ONE: i64 = 20091;
/// sin(pi/8) * sqrt(2) in 16-bit fixed point.
const SIN: i64 = 35468;

#[inline]
fn mul_cos(v: i64) -> i64 {
    v + ((v * COS_MINUS_ONE) >> 16)
}

#[inline]
fn mul_sin(v: i64) -> i64 {
    (v * SIN) >> 16
}

/// One 4-point inverse DCT butterfly over `v[0], v[step], v[2*step], v[3*step]`.
#[inline]
fn idct_butterfly(v: [i64; 4]) -> [i64; 4] {
    let a = v[0] + v[2];
    let b = v[0] - v[2];
    let c = mul_sin(v[1]) - mul_cos(v[3]);
    let d = mul_cos(v[1]) + mul_sin(v[3]);
    [a + d, b + c, b - c, a - d]
}

/// Inverse DCT in place. Coefficients are in raster order.
pub(crate) fn idct4x4(block: &mut [i32; 16]) {
    // Intermediates may exceed i32 for hostile coefficients.
    let mut tmp = [0i64; 16];
    for col in 0..4 {
        let out = idct_butterfly(core::array::from_fn(|r| i64::from(block[r * 4 + col])));
        for (r, v) in out.into_iter().enumerate() {
            tmp[r * 4 + col] = v;
        }
    }
    for row in 0..4 {
        let out = idct_butterfly(core::array::from_fn(|c| tmp[row * 4 + c]));
        for (c, v) in out.into_iter().enumerate() {
            block[row * 4 + c] = ((v + 4) >> 3) as i32;
        }
    }
}

/// Inverse transform when only the DC coefficient is set.
pub(crate) fn idct4x4_dc(block: &mut [i32; 16]) {
    let dc = (block[0] + 4) >> 3;
    block.fill(dc);
}

/// Inverse Walsh-Hadamard transform of the Y2 block. Output `i` is the DC of luma subblock `i`.
pub(crate) fn iwht4x4(block: &mut [i32; 16]) {
    for i in 0..4 {
        let a1 = block[i] + block[12 + i];
        let b1 = block[4 + i] + block[8 + i];
        let c1 = block[4 + i] - block[8 + i];
        let d1 = block[i] - block[12 + i];
        block[i] = a1 + b1;
        block[4 + i] = c1 + d1;
        block[8 + i] = a1 - b1;
        block[12 + i] = d1 - c1;
    }
    for row in block.chunks_exact_mut(4) {
        let a1 = row[0] + row[3];
        let b1 = row[1] + row[2];
        let c1 = row[1] - row[2];
        let d1 = row[0] - row[3];
        row[0] = (a1 + b1 + 3) >> 3;
        row[1] = (c1 + d1 + 3) >> 3;
        row[2] = (a1 - b1 + 3) >> 3;
        row[3] = (d1 - c1 + 3) >> 3;
    }
}

/// Forward DCT of a residual block (raster order in, raster order out).
pub(crate) fn dct4x4(block: &mut [i32; 16]) {
    let mut tmp = [0i64; 16];
    for row in 0..4 {
        let p = |i: usize| i64::from(block[row * 4 + i]);
        let a = (p(0) + p(3)) * 8;
        let b = (p(1) + p(2)) * 8;
        let c = (p(1) - p(2)) * 8;
        let d = (p(0) - p(3)) * 8;
        tmp[row * 4] = a + b;
        tmp[row * 4 + 2] = a - b;
        tmp[row * 4 + 1] = (c * 2217 + d * 5352 + 14500) >> 12;
        tmp[row * 4 + 3] = (d * 2217 - c * 5352 + 7500) >> 12;
    }
    for col in 0..4 {
        let t = |i: usize| tmp[i * 4 + col];
        let a = t(0) + t(3);
        let b = t(1) + t(2);
        let c = t(1) - t(2);
        let d = t(0) - t(3);
        block[col] = ((a + b + 7) >> 4) as i32;
        block[8 + col] = ((a - b + 7) >> 4) as i32;
        block[4 + col] = (((c * 2217 + d * 5352 + 12000) >> 16) + i64::from(d != 0)) as i32;
        block[12 + col] = ((d * 2217 - c * 5352 + 51000) >> 16) as i32;
    }
}

/// Forward Walsh-Hadamard transform of the 16 luma DC values.
pub(crate) fn wht4x4(block: &mut [i32; 16]) {
    let mut tmp = [0i64; 16];
    for row in 0..4 {
        let p = |i: usize| i64::from(block[row * 4 + i]);
        let a = p(0) + p(3);
        let b = p(1) + p(2);
        let c = p(1) - p(2);
        let d = p(0) - p(3);
        tmp[row * 4] = a + b;
        tmp[row * 4 + 1] = c + d;
        tmp[row * 4 + 2] = a - b;
        tmp[row * 4 + 3] = d - c;
    }
    let halve = |v: i64| (v + i64::from(v > 0)) / 2;
    for col in 0..4 {
        let t = |i: usize| tmp[i * 4 + col];
        let a = t(0) + t(3);
        let b = t(1) + t(2);
        let c = t(1) - t(2);
        let d = t(0) - t(3);
        block[col] = halve(a + b) as i32;
        block[4 + col] = halve(c + d) as i32;
        block[8 + col] = halve(a - b) as i32;
        block[12 + col] = halve(d - c) as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dct_then_idct_restores_residual() {
        const BLOCK: [i32; 16] = [
            38, 6, 210, 107, 42, 125, 185, 151, 241, 224, 125, 233, 227, 8, 57, 96,
        ];
        let mut block = BLOCK;
        dct4x4(&mut block);
        idct4x4(&mut block);
        assert_eq!(block, BLOCK);
    }

    #[test]
    fn dc_only_shortcut_matches_full_transform() {
        for dc in [-300, -17, 0, 5, 99, 2047] {
            let mut full = [0i32; 16];
            full[0] = dc;
            let mut quick = full;
            idct4x4(&mut full);
            idct4x4_dc(&mut quick);
            assert_eq!(full, quick, "dc {dc}");
        }
    }

    #[test]
    fn walsh_hadamard_spreads_dc_evenly() {
        let mut block = [0i32; 16];
        block[0] = 80;
        iwht4x4(&mut block);
        assert_eq!(block, [10; 16]);
    }

    #[test]
    fn wht_roundtrip_is_close() {
        let dcs: [i32; 16] = core::array::from_fn(|i| (i as i32 * 37) % 200 - 90);
        let mut block = dcs;
        wht4x4(&mut block);
        iwht4x4(&mut block);
        for (a, b) in block.iter().zip(dcs.iter()) {
            assert!((a - b).abs() <= 1, "{a} vs {b}");
        }
    }
}
