//! Lossless roundtrip tests.
//!
//! Verifies that encode→decode produces byte-identical RGBA for synthetic and
//! random images.

use rand::{Rng, RngCore, SeedableRng};
use webp_core::{decode_rgba32, encode_lossless, read_info, BitstreamFormat, EncodeError};

fn assert_lossless_roundtrip(rgba: &[u8], w: u32, h: u32) {
    let webp = encode_lossless(rgba, w, h, w as usize * 4, None).expect("encode failed");
    assert_eq!(read_info(&webp).unwrap().format, BitstreamFormat::Lossless);
    let (decoded, dw, dh) = decode_rgba32(&webp).expect("decode failed");
    assert_eq!((dw, dh), (w, h));
    let mismatches = decoded
        .chunks_exact(4)
        .zip(rgba.chunks_exact(4))
        .filter(|(a, b)| a != b)
        .count();
    assert_eq!(mismatches, 0, "{mismatches}/{} pixel mismatches", w * h);
}

fn horizontal_gradient(w: u32, h: u32) -> Vec<u8> {
    (0..h)
        .flat_map(|_| (0..w).map(|x| [(x * 256 / w) as u8, 100, 100, 255]))
        .flatten()
        .collect()
}

#[test]
fn checkerboard_2x2() {
    let rgba = [0, 0, 0, 255, 255, 255, 255, 255, 255, 255, 255, 255, 0, 0, 0, 255];
    let webp = encode_lossless(&rgba, 2, 2, 8, None).unwrap();
    let (decoded, w, h) = decode_rgba32(&webp).unwrap();
    assert_eq!((w, h), (2, 2));
    assert_eq!(decoded, rgba);
}

#[test]
fn single_pixel() {
    assert_lossless_roundtrip(&[12, 34, 56, 78], 1, 1);
}

#[test]
fn solid_color() {
    assert_lossless_roundtrip(&[200, 100, 50, 255].repeat(64 * 64), 64, 64);
}

#[test]
fn gradient_sizes() {
    for (w, h) in [(1, 17), (17, 1), (16, 16), (33, 7), (100, 75)] {
        assert_lossless_roundtrip(&horizontal_gradient(w, h), w, h);
    }
}

#[test]
fn few_colors_with_alpha() {
    let palette = [[255, 0, 0, 255], [0, 255, 0, 128], [0, 0, 255, 0], [9, 9, 9, 9]];
    let (w, h) = (41, 23);
    let rgba: Vec<u8> = (0..w * h)
        .flat_map(|i| palette[((i / 3) % 4) as usize])
        .collect();
    assert_lossless_roundtrip(&rgba, w, h);
}

#[test]
fn random_noise() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    for _ in 0..4 {
        let w = rng.gen_range(1..80);
        let h = rng.gen_range(1..80);
        let mut rgba = vec![0u8; (w * h * 4) as usize];
        rng.fill_bytes(&mut rgba);
        assert_lossless_roundtrip(&rgba, w, h);
    }
}

#[test]
fn random_shapes_on_flat_background() {
    let mut rng = rand::thread_rng();
    let (w, h) = (96u32, 64u32);
    let mut rgba = [240, 240, 230, 255].repeat((w * h) as usize);
    for _ in 0..12 {
        let color: [u8; 4] = rng.gen();
        let (x0, y0) = (rng.gen_range(0..w), rng.gen_range(0..h));
        let (x1, y1) = ((x0 + rng.gen_range(1..30)).min(w), (y0 + rng.gen_range(1..30)).min(h));
        for y in y0..y1 {
            for x in x0..x1 {
                let i = ((y * w + x) * 4) as usize;
                rgba[i..i + 4].copy_from_slice(&color);
            }
        }
    }
    assert_lossless_roundtrip(&rgba, w, h);
}

#[test]
fn padded_stride_is_ignored() {
    let (w, h) = (7u32, 5u32);
    let stride = w as usize * 4 + 12;
    let mut padded = vec![0xEEu8; stride * h as usize];
    let mut tight = Vec::new();
    for y in 0..h as usize {
        for x in 0..w as usize {
            let pixel = [(x * 30) as u8, (y * 40) as u8, 7, 255];
            padded[y * stride + x * 4..][..4].copy_from_slice(&pixel);
            tight.extend_from_slice(&pixel);
        }
    }
    let webp = encode_lossless(&padded, w, h, stride, None).unwrap();
    assert_eq!(decode_rgba32(&webp).unwrap().0, tight);
}

#[test]
fn rejects_oversized_images() {
    let rgba = [0u8; 4];
    assert!(matches!(
        encode_lossless(&rgba, 16385, 1, 16385 * 4, None),
        Err(EncodeError::InvalidDimensions)
    ));
}
