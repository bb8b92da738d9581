//! VP8 bitstream header encoding.
//!
//! Writes the uncompressed frame tag, the compressed frame header and the
//! per-macroblock mode headers that share the first partition.

use alloc::vec::Vec;

use crate::common::types::*;
use crate::encoder::arithmetic::BoolWriter;
use crate::encoder::vec_writer::VecWriter;

use super::MacroblockInfo;

impl super::Vp8Encoder<'_> {
    pub(super) fn write_uncompressed_frame_header(&self, out: &mut Vec<u8>, partition_size: u32) {
        // key frame, version 0, shown
        let tag = (partition_size << 5) | (1 << 4);
        out.write_u24_le(tag);
        out.write_all(&[0x9d, 0x01, 0x2a]);
        out.write_u16_le(self.width & 0x3FFF);
        out.write_u16_le(self.height & 0x3FFF);
    }

    /// Writes the first partition: frame header followed by every macroblock header.
    pub(super) fn encode_first_partition(&self) -> Vec<u8> {
        let mut w = BoolWriter::with_capacity(self.macroblocks.len() + 64);

        // color space 0, clamping required
        w.write_literal(1, 0);
        w.write_literal(1, 0);

        // no segmentation
        w.write_flag(false);

        // normal loop filter, no per-mode adjustments
        w.write_flag(false);
        w.write_literal(6, u32::from(self.filter_level));
        w.write_literal(3, 0);
        w.write_flag(false);

        // a single token partition
        w.write_literal(2, 0);

        w.write_literal(7, u32::from(self.quant_index));
        for _ in 0..5 {
            w.write_optional_signed(4, 0);
        }

        // refresh entropy probs
        w.write_literal(1, 0);

        // keep the default token probabilities
        for update_prob in COEFF_UPDATE_PROBS.iter().flatten().flatten().flatten() {
            w.write_bool(false, *update_prob);
        }

        let prob_skip_false = self.skip_probability();
        w.write_flag(true);
        w.write_literal(8, u32::from(prob_skip_false));

        for mb in &self.macroblocks {
            write_macroblock_header(&mut w, mb, prob_skip_false);
        }
        w.finish()
    }

    /// Probability that a macroblock is *not* skipped, from the actual counts.
    fn skip_probability(&self) -> u8 {
        let total = self.macroblocks.len().max(1);
        let coded = self.macroblocks.iter().filter(|mb| !mb.skip).count();
        (coded * 256 / total).clamp(1, 255) as u8
    }
}

fn write_macroblock_header(w: &mut BoolWriter, mb: &MacroblockInfo, prob_skip_false: u8) {
    w.write_bool(mb.skip, prob_skip_false);
    w.write_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, mb.luma_mode as i8);
    w.write_tree(&KEYFRAME_UV_MODE_TREE, &KEYFRAME_UV_MODE_PROBS, mb.chroma_mode as i8);
}
