//! VP8 lossy encoder.
//!
//! A deterministic key frame encoder: one quantizer for the whole frame,
//! whole-block (16x16 luma, 8x8 chroma) intra prediction chosen by SAD, and
//! the default token probabilities. Quality maps linearly onto the quantizer
//! index and the loop filter strength follows the quantizer.
//!
//! ## Module organization
//!
//! - [`header`]: frame tag, compressed header and macroblock headers
//! - [`mode_selection`]: intra mode choice
//! - [`residuals`]: transform, quantization, reconstruction and token coding

#![allow(clippy::needless_range_loop)]

use alloc::vec::Vec;

use enough::Stop;

use super::api::EncodeError;
use super::arithmetic::BoolWriter;
use crate::common::prediction::PredBlock;
use crate::common::types::*;
use crate::yuv::{self, YuvPlanes};

mod header;
mod mode_selection;
mod residuals;

use residuals::MacroblockLevels;

/// Maps quality 0..=100 onto the quantizer index 127..=0.
pub(crate) fn quality_to_quant_index(quality: f32) -> u8 {
    let quality = quality.clamp(0.0, 100.0);
    ((100.0 - quality) * 127.0 / 100.0 + 0.5) as u8
}

/// Filter level that goes with a quantizer index.
fn filter_level_for(quant_index: u8) -> u8 {
    (quant_index / 2).min(63)
}

/// Mode decisions of one macroblock, written to the first partition at the end.
struct MacroblockInfo {
    luma_mode: LumaMode,
    chroma_mode: ChromaMode,
    skip: bool,
}

/// Nonzero flags of the blocks bordering a macroblock, laid out like the
/// decoder's: y2, y, y, y, y, u, u, v, v.
type Complexity = [u8; 9];

pub(crate) struct Vp8Encoder<'a> {
    width: u16,
    height: u16,
    mbwidth: usize,
    mbheight: usize,

    quant_index: u8,
    quant: QuantSteps,
    filter_level: u8,

    src: YuvPlanes,
    /// Reconstruction as the decoder will see it, before loop filtering.
    recon: YuvPlanes,

    macroblocks: Vec<MacroblockInfo>,
    tokens: BoolWriter,
    top: Vec<Complexity>,
    left: Complexity,

    stop: &'a dyn Stop,
}

impl<'a> Vp8Encoder<'a> {
    fn new(
        rgba: &[u8],
        width: u16,
        height: u16,
        stride: usize,
        quality: f32,
        stop: &'a dyn Stop,
    ) -> Self {
        let mbwidth = usize::from(width.div_ceil(16));
        let mbheight = usize::from(height.div_ceil(16));
        let src = yuv::rgba_to_yuv420(
            rgba,
            usize::from(width),
            usize::from(height),
            stride,
            mbwidth,
            mbheight,
        );
        let recon = YuvPlanes {
            y: alloc::vec![0; src.y.len()],
            u: alloc::vec![0; src.u.len()],
            v: alloc::vec![0; src.v.len()],
            y_stride: src.y_stride,
            uv_stride: src.uv_stride,
        };

        let quant_index = quality_to_quant_index(quality);
        Self {
            width,
            height,
            mbwidth,
            mbheight,
            quant_index,
            quant: QuantSteps::new(i32::from(quant_index), &QuantDeltas::default()),
            filter_level: filter_level_for(quant_index),
            src,
            recon,
            macroblocks: Vec::with_capacity(mbwidth * mbheight),
            tokens: BoolWriter::with_capacity(usize::from(width) * usize::from(height) / 4),
            top: alloc::vec![[0; 9]; mbwidth],
            left: [0; 9],
            stop,
        }
    }

    fn encode_macroblock(&mut self, mbx: usize, mby: usize) {
        let y_stride = self.src.y_stride;
        let uv_stride = self.src.uv_stride;
        let y_offset = mby * 16 * y_stride + mbx * 16;
        let uv_offset = mby * 8 * uv_stride + mbx * 8;

        let luma_border = PredBlock::load(&self.recon.y, y_stride, mbx, mby, self.mbwidth, 16);
        let (luma_mode, mut luma) =
            mode_selection::pick_luma_mode(&luma_border, &self.src.y[y_offset..], y_stride);

        let u_border = PredBlock::load(&self.recon.u, uv_stride, mbx, mby, self.mbwidth, 8);
        let v_border = PredBlock::load(&self.recon.v, uv_stride, mbx, mby, self.mbwidth, 8);
        let (chroma_mode, [mut u, mut v]) = mode_selection::pick_chroma_mode(
            [&u_border, &v_border],
            [&self.src.u[uv_offset..], &self.src.v[uv_offset..]],
            uv_stride,
        );

        let mut levels = MacroblockLevels {
            y2: [0; 16],
            blocks: [[0; 16]; 24],
        };
        residuals::quantize_luma(&self.src.y[y_offset..], y_stride, &luma, &self.quant, &mut levels);
        residuals::quantize_chroma(&self.src.u[uv_offset..], uv_stride, &u, &self.quant, &mut levels, 16);
        residuals::quantize_chroma(&self.src.v[uv_offset..], uv_stride, &v, &self.quant, &mut levels, 20);

        let skip = levels.is_empty();
        if skip {
            self.left = [0; 9];
            self.top[mbx] = [0; 9];
        } else {
            self.write_residuals(&levels, mbx);
            residuals::reconstruct_luma(&mut luma, &levels, &self.quant);
            residuals::reconstruct_chroma(&mut u, &levels, &self.quant, 16);
            residuals::reconstruct_chroma(&mut v, &levels, &self.quant, 20);
        }

        luma.store(&mut self.recon.y, y_stride, mbx, mby);
        u.store(&mut self.recon.u, uv_stride, mbx, mby);
        v.store(&mut self.recon.v, uv_stride, mbx, mby);

        self.macroblocks.push(MacroblockInfo {
            luma_mode,
            chroma_mode,
            skip,
        });
    }

    /// Token-codes Y2, the 16 luma AC blocks and the chroma blocks, tracking
    /// contexts exactly as the decoder does.
    fn write_residuals(&mut self, levels: &MacroblockLevels, mbx: usize) {
        let probs = &COEFF_PROBS;
        let writer = &mut self.tokens;
        let top = &mut self.top[mbx];
        let left = &mut self.left;

        let ctx = usize::from(top[0] + left[0]);
        let nz = u8::from(residuals::write_coefficients(writer, &levels.y2, &probs[PLANE_Y2], ctx, 0));
        top[0] = nz;
        left[0] = nz;

        for y in 0..4 {
            let mut l = left[y + 1];
            for x in 0..4 {
                let ctx = usize::from(top[x + 1] + l);
                let block = &levels.blocks[y * 4 + x];
                let nz = residuals::write_coefficients(writer, block, &probs[PLANE_Y_AFTER_Y2], ctx, 1);
                top[x + 1] = u8::from(nz);
                l = u8::from(nz);
            }
            left[y + 1] = l;
        }

        for (c, base) in [(5usize, 16usize), (7, 20)] {
            for y in 0..2 {
                let mut l = left[c + y];
                for x in 0..2 {
                    let ctx = usize::from(top[c + x] + l);
                    let block = &levels.blocks[base + y * 2 + x];
                    let nz = residuals::write_coefficients(writer, block, &probs[PLANE_CHROMA], ctx, 0);
                    top[c + x] = u8::from(nz);
                    l = u8::from(nz);
                }
                left[c + y] = l;
            }
        }
    }

    fn encode(mut self) -> Result<Vec<u8>, EncodeError> {
        for mby in 0..self.mbheight {
            self.stop.check()?;
            self.left = [0; 9];
            for mbx in 0..self.mbwidth {
                self.encode_macroblock(mbx, mby);
            }
        }

        let first_partition = self.encode_first_partition();
        let skipped = self.macroblocks.iter().filter(|mb| mb.skip).count();
        log::debug!(
            "VP8 encode {}x{}: quantizer {} filter level {}, {}/{} macroblocks skipped",
            self.width,
            self.height,
            self.quant_index,
            self.filter_level,
            skipped,
            self.macroblocks.len()
        );

        let tokens = core::mem::replace(&mut self.tokens, BoolWriter::new()).finish();
        let mut out = Vec::with_capacity(10 + first_partition.len() + tokens.len());
        self.write_uncompressed_frame_header(&mut out, first_partition.len() as u32);
        out.extend_from_slice(&first_partition);
        out.extend_from_slice(&tokens);
        Ok(out)
    }
}

/// Encodes RGBA rows `stride` bytes apart as a `VP8 ` chunk payload. Alpha is ignored.
pub(crate) fn encode_frame(
    rgba: &[u8],
    width: u16,
    height: u16,
    stride: usize,
    quality: f32,
    stop: &dyn Stop,
) -> Result<Vec<u8>, EncodeError> {
    Vp8Encoder::new(rgba, width, height, stride, quality, stop).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::vp8::Vp8Decoder;
    use alloc::vec;
    use enough::Unstoppable;

    fn roundtrip(rgba: &[u8], width: u16, height: u16, quality: f32) -> Vec<u8> {
        let data = encode_frame(rgba, width, height, usize::from(width) * 4, quality, &Unstoppable)
            .unwrap();
        let frame = Vp8Decoder::decode_frame(&data, &Unstoppable).unwrap();
        assert_eq!((frame.width, frame.height), (width, height));
        let mut out = vec![0u8; rgba.len()];
        frame.fill_rgba(&mut out);
        out
    }

    fn max_channel_error(a: &[u8], b: &[u8]) -> u8 {
        a.iter()
            .zip(b)
            .enumerate()
            .filter(|(i, _)| i % 4 != 3)
            .map(|(_, (x, y))| x.abs_diff(*y))
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn quality_mapping() {
        assert_eq!(quality_to_quant_index(100.0), 0);
        assert_eq!(quality_to_quant_index(0.0), 127);
        assert_eq!(quality_to_quant_index(50.0), 64);
        assert_eq!(quality_to_quant_index(250.0), 0);
    }

    #[test]
    fn flat_color_roundtrip() {
        let rgba: Vec<u8> = [90, 140, 200, 255].repeat(32 * 32);
        let out = roundtrip(&rgba, 32, 32, 90.0);
        assert!(max_channel_error(&rgba, &out) <= 6);
    }

    #[test]
    fn gradient_roundtrip_odd_size() {
        let (w, h) = (37u16, 21u16);
        let mut rgba = Vec::new();
        for y in 0..h {
            for x in 0..w {
                rgba.extend_from_slice(&[(x * 6) as u8, (y * 11) as u8, 128, 255]);
            }
        }
        let out = roundtrip(&rgba, w, h, 95.0);
        assert!(max_channel_error(&rgba, &out) <= 24);
        for pixel in out.chunks_exact(4) {
            assert_eq!(pixel[3], 255);
        }
    }

    #[test]
    fn lower_quality_is_smaller() {
        let (w, h) = (64u16, 64u16);
        let mut rgba = Vec::new();
        for i in 0..usize::from(w) * usize::from(h) {
            let v = ((i * 7919) % 251) as u8;
            rgba.extend_from_slice(&[v, v.wrapping_mul(3), v / 2, 255]);
        }
        let stride = usize::from(w) * 4;
        let high = encode_frame(&rgba, w, h, stride, 95.0, &Unstoppable).unwrap();
        let low = encode_frame(&rgba, w, h, stride, 10.0, &Unstoppable).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn padded_stride() {
        let (w, h) = (5u16, 3u16);
        let stride = 5 * 4 + 8;
        let mut rgba = vec![0xAAu8; stride * 3];
        for y in 0..3 {
            for x in 0..5 {
                rgba[y * stride + x * 4..][..4].copy_from_slice(&[250, 10, 10, 255]);
            }
        }
        let data = encode_frame(&rgba, w, h, stride, 90.0, &Unstoppable).unwrap();
        let frame = Vp8Decoder::decode_frame(&data, &Unstoppable).unwrap();
        let mut out = vec![0u8; 5 * 3 * 4];
        frame.fill_rgba(&mut out);
        assert!(out.chunks_exact(4).all(|p| p[0] > 200 && p[1] < 60));
    }
}
