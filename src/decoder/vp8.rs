//! An implementation of the VP8 Video Codec
//!
//! This module contains a partial implementation of the
//! VP8 video format as defined in RFC-6386.
//!
//! It decodes Keyframes only.
//! VP8 is the underpinning of the WebP image format
//!
//! The frame is reconstructed macroblock by macroblock into planes padded to
//! whole macroblocks, then the loop filter runs over the finished frame in the
//! same raster order. Prediction therefore always sees unfiltered neighbours.
//!
//! # Related Links
//! * [rfc-6386](http://tools.ietf.org/html/rfc6386) - The VP8 Data Format and Decoding Guide

#![allow(clippy::needless_range_loop)]

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use byteorder_lite::{ByteOrder, LittleEndian};
use enough::Stop;

use super::api::DecodeError;
use super::arithmetic::BoolReader;
use super::loop_filter::{self, MacroblockFilter};
use crate::common::prediction::PredBlock;
use crate::common::transform;
use crate::common::types::*;
use crate::yuv;

#[derive(Default, Clone, Copy)]
struct MacroBlock {
    bpred: [IntraMode; 16],
    luma_mode: LumaMode,
    chroma_mode: ChromaMode,
    segment: u8,
    coeffs_skipped: bool,
    /// Some block carries a nonzero coefficient (after the Y2 DC is applied).
    non_zero: bool,
}

/// Info required from a previously decoded macro block in future
/// For the top macroblocks this will be the bottom values, for the left macroblock the right values
#[derive(Default, Clone, Copy)]
struct PreviousMacroBlock {
    bpred: [IntraMode; 4],
    // complexity is laid out like: y2,y,y,y,y,u,u,v,v
    complexity: [u8; 9],
}

#[derive(Default, Clone, Copy)]
struct Segment {
    quantizer_level: i8,
    loopfilter_level: i8,
    quant: QuantSteps,
}

/// A decoded key frame: YUV 4:2:0 planes padded to whole macroblocks.
#[derive(Default, Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) ybuf: Vec<u8>,
    pub(crate) ubuf: Vec<u8>,
    pub(crate) vbuf: Vec<u8>,

    pub(crate) version: u8,

    // Section 9.2
    pub(crate) clamping_type: u8,

    // Section 9.4 and 15
    pub(crate) simple_filter: bool,
    pub(crate) filter_level: u8,
    pub(crate) sharpness_level: u8,
}

impl Frame {
    pub(crate) fn luma_stride(&self) -> usize {
        usize::from(self.width.div_ceil(16)) * 16
    }

    pub(crate) fn chroma_stride(&self) -> usize {
        usize::from(self.width.div_ceil(16)) * 8
    }

    /// Fills an RGBA buffer of `width * height * 4` bytes. Alpha is opaque.
    pub(crate) fn fill_rgba(&self, buf: &mut [u8]) {
        yuv::fill_rgba_fancy(
            buf,
            &self.ybuf,
            &self.ubuf,
            &self.vbuf,
            usize::from(self.width),
            usize::from(self.height),
            self.luma_stride(),
            self.chroma_stride(),
        );
    }
}

/// Dimensions declared by a VP8 frame tag, read without decoding anything.
pub(crate) fn read_dimensions(data: &[u8]) -> Result<(u16, u16), DecodeError> {
    if data.len() < 10 {
        return Err(DecodeError::Truncated);
    }
    let magic = [data[3], data[4], data[5]];
    if magic != [0x9d, 0x01, 0x2a] {
        return Err(DecodeError::Vp8MagicInvalid(magic));
    }
    // the top two bits of each dimension hold an upscaling hint, which we ignore
    let width = LittleEndian::read_u16(&data[6..8]) & 0x3FFF;
    let height = LittleEndian::read_u16(&data[8..10]) & 0x3FFF;
    if width == 0 || height == 0 {
        return Err(DecodeError::InconsistentImageSizes);
    }
    Ok((width, height))
}

/// Reads coefficients `first..16` of one block in zigzag order, dequantizing
/// into raster order. Returns the position at which the block ended.
fn read_coefficients(
    reader: &mut BoolReader<'_>,
    block: &mut [i32; 16],
    probs: &[[[Prob; NUM_DCT_TOKENS - 1]; 3]; 8],
    ctx: usize,
    first: usize,
    dc_step: i32,
    ac_step: i32,
) -> usize {
    let mut ctx = ctx;
    let mut skip_eob = false;
    for n in first..16 {
        let band_probs = &probs[usize::from(COEFF_BANDS[n])][ctx];
        let start = if skip_eob { 2 } else { 0 };
        let token = reader.read_tree_from(&DCT_TOKEN_TREE, band_probs, start);

        let magnitude = match token {
            DCT_EOB => return n,
            DCT_0 => {
                // a zero can't be followed directly by end of block
                ctx = 0;
                skip_eob = true;
                continue;
            }
            DCT_1..=DCT_4 => i32::from(token),
            _ => {
                let cat = (token - DCT_CAT1) as usize;
                let extra = PROB_DCT_CAT[cat]
                    .iter()
                    .take_while(|&&p| p > 0)
                    .fold(0, |v, &p| (v << 1) | i32::from(reader.read_bool(p)));
                i32::from(DCT_CAT_BASE[cat]) + extra
            }
        };

        ctx = if magnitude == 1 { 1 } else { 2 };
        skip_eob = false;
        let value = if reader.read_flag() {
            -magnitude
        } else {
            magnitude
        };
        let step = if n > 0 { ac_step } else { dc_step };
        block[usize::from(ZIGZAG[n])] = value * step;
    }
    16
}

/// VP8 key frame decoder over a complete `VP8 ` chunk payload.
pub(crate) struct Vp8Decoder<'a> {
    data: &'a [u8],
    header: BoolReader<'a>,
    partitions: Vec<BoolReader<'a>>,

    frame: Frame,
    mbwidth: usize,
    mbheight: usize,

    segments_enabled: bool,
    segments_update_map: bool,
    segments_absolute: bool,
    segment_tree_probs: [Prob; 3],
    segment: [Segment; MAX_SEGMENTS],

    loop_filter_adjustments_enabled: bool,
    ref_delta: [i32; 4],
    mode_delta: [i32; 4],

    token_probs: Box<TokenProbTables>,
    prob_skip_false: Option<Prob>,

    top: Vec<PreviousMacroBlock>,
    left: PreviousMacroBlock,
    /// 16 Y, 4 U and 4 V blocks of the current macroblock.
    coeffs: [[i32; 16]; 24],
    filters: Vec<Option<MacroblockFilter>>,

    stop: &'a dyn Stop,
}

impl<'a> Vp8Decoder<'a> {
    fn new(data: &'a [u8], stop: &'a dyn Stop) -> Self {
        Self {
            data,
            header: BoolReader::new(&[]),
            partitions: Vec::new(),
            frame: Frame::default(),
            mbwidth: 0,
            mbheight: 0,
            segments_enabled: false,
            segments_update_map: false,
            segments_absolute: false,
            segment_tree_probs: [255; 3],
            segment: [Segment::default(); MAX_SEGMENTS],
            loop_filter_adjustments_enabled: false,
            ref_delta: [0; 4],
            mode_delta: [0; 4],
            token_probs: Box::new(COEFF_PROBS),
            prob_skip_false: None,
            top: Vec::new(),
            left: PreviousMacroBlock::default(),
            coeffs: [[0; 16]; 24],
            filters: Vec::new(),
            stop,
        }
    }

    /// Decodes the frame, polling `stop` once per macroblock row.
    pub(crate) fn decode_frame(data: &'a [u8], stop: &'a dyn Stop) -> Result<Frame, DecodeError> {
        Self::new(data, stop).decode()
    }

    fn update_token_probabilities(&mut self) {
        for (i, is) in COEFF_UPDATE_PROBS.iter().enumerate() {
            for (j, js) in is.iter().enumerate() {
                for (k, ks) in js.iter().enumerate() {
                    for (t, &update_prob) in ks.iter().enumerate() {
                        if self.header.read_bool(update_prob) {
                            self.token_probs[i][j][k][t] = self.header.read_literal(8) as u8;
                        }
                    }
                }
            }
        }
    }

    /// Splits the data after the first partition into the DCT partitions.
    fn init_partitions(&mut self, rest: &'a [u8], n: usize) -> Result<(), DecodeError> {
        let table_len = 3 * (n - 1);
        if rest.len() < table_len {
            return Err(DecodeError::Truncated);
        }
        let (sizes, mut body) = rest.split_at(table_len);
        for size in sizes.chunks_exact(3) {
            let size = LittleEndian::read_u24(size) as usize;
            if size > body.len() {
                return Err(DecodeError::Truncated);
            }
            let (partition, tail) = body.split_at(size);
            self.partitions.push(BoolReader::new(partition));
            body = tail;
        }
        // the last partition takes whatever remains
        self.partitions.push(BoolReader::new(body));
        Ok(())
    }

    fn read_quantization_indices(&mut self) {
        let yac = self.header.read_literal(7) as i32;
        let deltas = QuantDeltas {
            ydc: self.header.read_optional_signed(4),
            y2dc: self.header.read_optional_signed(4),
            y2ac: self.header.read_optional_signed(4),
            uvdc: self.header.read_optional_signed(4),
            uvac: self.header.read_optional_signed(4),
        };

        let segments = if self.segments_enabled { MAX_SEGMENTS } else { 1 };
        for segment in &mut self.segment[..segments] {
            let base = if !self.segments_enabled {
                yac
            } else if self.segments_absolute {
                i32::from(segment.quantizer_level)
            } else {
                yac + i32::from(segment.quantizer_level)
            };
            segment.quant = QuantSteps::new(base, &deltas);
        }
    }

    fn read_loop_filter_adjustments(&mut self) {
        if self.header.read_flag() {
            for i in 0..4 {
                if self.header.read_flag() {
                    self.ref_delta[i] = self.header.read_signed(6);
                }
            }
            for i in 0..4 {
                if self.header.read_flag() {
                    self.mode_delta[i] = self.header.read_signed(6);
                }
            }
        }
    }

    fn read_segment_updates(&mut self) {
        // Section 9.3
        self.segments_update_map = self.header.read_flag();
        let update_segment_feature_data = self.header.read_flag();

        if update_segment_feature_data {
            self.segments_absolute = self.header.read_flag();

            for segment in &mut self.segment {
                segment.quantizer_level = self.header.read_optional_signed(7) as i8;
            }
            for segment in &mut self.segment {
                segment.loopfilter_level = self.header.read_optional_signed(6) as i8;
            }
        }

        if self.segments_update_map {
            for prob in &mut self.segment_tree_probs {
                *prob = if self.header.read_flag() {
                    self.header.read_literal(8) as u8
                } else {
                    255
                };
            }
        }
    }

    fn read_frame_header(&mut self) -> Result<(), DecodeError> {
        let data = self.data;
        let (width, height) = read_dimensions(data)?;
        let tag = LittleEndian::read_u24(&data[..3]);

        let keyframe = tag & 1 == 0;
        if !keyframe {
            return Err(DecodeError::UnsupportedFeature("non-keyframe frames".into()));
        }
        self.frame.version = ((tag >> 1) & 7) as u8;
        if self.frame.version > 3 {
            return Err(DecodeError::VersionNumberInvalid(self.frame.version));
        }
        if (tag >> 4) & 1 == 0 {
            return Err(DecodeError::UnsupportedFeature("frame not displayable".into()));
        }

        let first_partition_size = (tag >> 5) as usize;
        if first_partition_size == 0 {
            return Err(DecodeError::PartitionLayoutInvalid);
        }
        let body = &data[10..];
        if first_partition_size > body.len() {
            return Err(DecodeError::Truncated);
        }
        let (first, rest) = body.split_at(first_partition_size);

        self.frame.width = width;
        self.frame.height = height;
        self.mbwidth = usize::from(width.div_ceil(16));
        self.mbheight = usize::from(height.div_ceil(16));

        self.header = BoolReader::new(first);

        let color_space = self.header.read_literal(1);
        self.frame.clamping_type = self.header.read_literal(1) as u8;
        if color_space != 0 {
            return Err(DecodeError::FieldOutOfRange("color space"));
        }

        self.segments_enabled = self.header.read_flag();
        if self.segments_enabled {
            self.read_segment_updates();
        }

        self.frame.simple_filter = self.header.read_flag();
        self.frame.filter_level = self.header.read_literal(6) as u8;
        self.frame.sharpness_level = self.header.read_literal(3) as u8;

        self.loop_filter_adjustments_enabled = self.header.read_flag();
        if self.loop_filter_adjustments_enabled {
            self.read_loop_filter_adjustments();
        }

        let num_partitions = 1usize << self.header.read_literal(2);
        self.init_partitions(rest, num_partitions)?;

        self.read_quantization_indices();

        // refresh_entropy_probs only matters for inter frames
        let _ = self.header.read_literal(1);

        self.update_token_probabilities();

        self.prob_skip_false = if self.header.read_flag() {
            Some(self.header.read_literal(8) as u8)
        } else {
            None
        };

        if self.header.is_exhausted() {
            return Err(DecodeError::Truncated);
        }

        log::debug!(
            "VP8 frame {}x{}: {} partition(s), {} filter level {} sharpness {}, segments {}",
            width,
            height,
            num_partitions,
            if self.frame.simple_filter { "simple" } else { "normal" },
            self.frame.filter_level,
            self.frame.sharpness_level,
            self.segments_enabled,
        );

        let luma_len = self.mbwidth * 16 * self.mbheight * 16;
        let chroma_len = self.mbwidth * 8 * self.mbheight * 8;
        self.frame.ybuf = vec![0u8; luma_len];
        self.frame.ubuf = vec![0u8; chroma_len];
        self.frame.vbuf = vec![0u8; chroma_len];
        self.top = vec![PreviousMacroBlock::default(); self.mbwidth];
        self.filters = Vec::with_capacity(self.mbwidth * self.mbheight);
        Ok(())
    }

    fn read_macroblock_header(&mut self, mbx: usize) -> MacroBlock {
        let mut mb = MacroBlock::default();

        if self.segments_update_map {
            mb.segment = self.header.read_tree(&SEGMENT_ID_TREE, &self.segment_tree_probs) as u8;
        }

        mb.coeffs_skipped = match self.prob_skip_false {
            Some(prob) => self.header.read_bool(prob),
            None => false,
        };

        let luma = self.header.read_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS);
        mb.luma_mode = LumaMode::from_i8(luma).unwrap_or_default();

        match mb.luma_mode.implied_intra() {
            Some(mode) => {
                self.top[mbx].bpred = [mode; 4];
                self.left.bpred = [mode; 4];
            }
            None => {
                for y in 0..4 {
                    let mut left = self.left.bpred[y];
                    for x in 0..4 {
                        let top = self.top[mbx].bpred[x];
                        let probs = &KEYFRAME_BPRED_MODE_PROBS[top as usize][left as usize];
                        let mode = self.header.read_tree(&KEYFRAME_BPRED_MODE_TREE, probs);
                        let mode = IntraMode::from_i8(mode).unwrap_or_default();
                        mb.bpred[y * 4 + x] = mode;
                        self.top[mbx].bpred[x] = mode;
                        left = mode;
                    }
                    self.left.bpred[y] = left;
                }
            }
        }

        let chroma = self.header.read_tree(&KEYFRAME_UV_MODE_TREE, &KEYFRAME_UV_MODE_PROBS);
        mb.chroma_mode = ChromaMode::from_i8(chroma).unwrap_or_default();
        mb
    }

    /// Token-decodes the 25 blocks of a macroblock from partition `p`.
    /// Returns whether any block ended up with a nonzero coefficient.
    fn read_residual_data(&mut self, mb: &MacroBlock, mbx: usize, p: usize) -> bool {
        let quant = self.segment[usize::from(mb.segment)].quant;
        let reader = &mut self.partitions[p];
        let probs = &*self.token_probs;
        let top = &mut self.top[mbx];
        let left = &mut self.left;

        let (first, plane) = if mb.luma_mode == LumaMode::B {
            (0, PLANE_Y_WITH_DC)
        } else {
            let mut y2 = [0i32; 16];
            let ctx = usize::from(top.complexity[0] + left.complexity[0]);
            let n = read_coefficients(
                reader,
                &mut y2,
                &probs[PLANE_Y2],
                ctx,
                0,
                quant.y2dc,
                quant.y2ac,
            );
            let nz = u8::from(n > 0);
            top.complexity[0] = nz;
            left.complexity[0] = nz;

            transform::iwht4x4(&mut y2);
            for (block, dc) in self.coeffs.iter_mut().zip(y2) {
                block[0] = dc;
            }
            (1, PLANE_Y_AFTER_Y2)
        };

        let mut non_zero = false;
        for y in 0..4 {
            let mut l = left.complexity[y + 1];
            for x in 0..4 {
                let block = &mut self.coeffs[y * 4 + x];
                let ctx = usize::from(top.complexity[x + 1] + l);
                let n = read_coefficients(
                    reader,
                    block,
                    &probs[plane],
                    ctx,
                    first,
                    quant.ydc,
                    quant.yac,
                );
                non_zero |= n > 1 || block[0] != 0;
                let nz = u8::from(n > first);
                top.complexity[x + 1] = nz;
                l = nz;
            }
            left.complexity[y + 1] = l;
        }

        for (c, base) in [(5usize, 16usize), (7, 20)] {
            for y in 0..2 {
                let mut l = left.complexity[c + y];
                for x in 0..2 {
                    let block = &mut self.coeffs[base + y * 2 + x];
                    let ctx = usize::from(top.complexity[c + x] + l);
                    let n = read_coefficients(
                        reader,
                        block,
                        &probs[PLANE_CHROMA],
                        ctx,
                        0,
                        quant.uvdc,
                        quant.uvac,
                    );
                    non_zero |= n > 1 || block[0] != 0;
                    let nz = u8::from(n > 0);
                    top.complexity[c + x] = nz;
                    l = nz;
                }
                left.complexity[c + y] = l;
            }
        }

        non_zero
    }

    fn reconstruct(&mut self, mbx: usize, mby: usize, mb: &MacroBlock) {
        let y_stride = self.frame.luma_stride();
        let mut luma = PredBlock::load(&self.frame.ybuf, y_stride, mbx, mby, self.mbwidth, 16);
        if mb.luma_mode == LumaMode::B {
            for i in 0..16 {
                let (sbx, sby) = (i % 4, i / 4);
                luma.predict_subblock(sbx, sby, mb.bpred[i]);
                add_block(&mut luma, sbx, sby, &mut self.coeffs[i]);
            }
        } else {
            luma.predict_whole(mb.luma_mode);
            for i in 0..16 {
                add_block(&mut luma, i % 4, i / 4, &mut self.coeffs[i]);
            }
        }
        luma.store(&mut self.frame.ybuf, y_stride, mbx, mby);

        let uv_stride = self.frame.chroma_stride();
        let mode = mb.chroma_mode.as_luma();
        for (plane, base) in [(&mut self.frame.ubuf, 16), (&mut self.frame.vbuf, 20)] {
            let mut chroma = PredBlock::load(plane, uv_stride, mbx, mby, self.mbwidth, 8);
            chroma.predict_whole(mode);
            for i in 0..4 {
                add_block(&mut chroma, i % 2, i / 2, &mut self.coeffs[base + i]);
            }
            chroma.store(plane, uv_stride, mbx, mby);
        }
    }

    fn macroblock_filter(&self, mb: &MacroBlock) -> Option<MacroblockFilter> {
        let mut level = i32::from(self.frame.filter_level);
        if level == 0 {
            return None;
        }

        if self.segments_enabled {
            let segment = &self.segment[usize::from(mb.segment)];
            if self.segments_absolute {
                level = i32::from(segment.loopfilter_level);
            } else {
                level += i32::from(segment.loopfilter_level);
            }
            level = level.clamp(0, 63);
        }

        let is_bpred = mb.luma_mode == LumaMode::B;
        if self.loop_filter_adjustments_enabled {
            // key frames only use the intra reference and B_PRED mode deltas
            level += self.ref_delta[0];
            if is_bpred {
                level += self.mode_delta[0];
            }
            level = level.clamp(0, 63);
        }

        MacroblockFilter::new(level, self.frame.sharpness_level, is_bpred || mb.non_zero)
    }

    fn apply_loop_filter(&mut self) -> Result<(), DecodeError> {
        let y_stride = self.frame.luma_stride();
        let uv_stride = self.frame.chroma_stride();
        let simple = self.frame.simple_filter;
        for mby in 0..self.mbheight {
            self.stop.check()?;
            for mbx in 0..self.mbwidth {
                let Some(filter) = self.filters[mby * self.mbwidth + mbx] else {
                    continue;
                };
                loop_filter::filter_luma(&mut self.frame.ybuf, y_stride, mbx, mby, &filter, simple);
                if !simple {
                    loop_filter::filter_chroma(&mut self.frame.ubuf, uv_stride, mbx, mby, &filter);
                    loop_filter::filter_chroma(&mut self.frame.vbuf, uv_stride, mbx, mby, &filter);
                }
            }
        }
        Ok(())
    }

    fn decode(mut self) -> Result<Frame, DecodeError> {
        self.read_frame_header()?;

        for mby in 0..self.mbheight {
            self.stop.check()?;
            let p = mby % self.partitions.len();
            self.left = PreviousMacroBlock::default();

            for mbx in 0..self.mbwidth {
                let mut mb = self.read_macroblock_header(mbx);
                self.coeffs = [[0; 16]; 24];

                if mb.coeffs_skipped {
                    if mb.luma_mode != LumaMode::B {
                        self.left.complexity[0] = 0;
                        self.top[mbx].complexity[0] = 0;
                    }
                    for i in 1..9 {
                        self.left.complexity[i] = 0;
                        self.top[mbx].complexity[i] = 0;
                    }
                } else {
                    mb.non_zero = self.read_residual_data(&mb, mbx, p);
                }

                self.reconstruct(mbx, mby, &mb);
                let filter = self.macroblock_filter(&mb);
                self.filters.push(filter);
            }
        }

        if self.partitions.iter().any(BoolReader::is_exhausted) {
            log::debug!("VP8 partition data ran out; remaining tokens decoded as zero");
        }

        self.apply_loop_filter()?;
        Ok(self.frame)
    }
}

/// Inverse transforms `block` and adds it onto the prediction at (`sbx`, `sby`).
pub(crate) fn add_block(pred: &mut PredBlock, sbx: usize, sby: usize, block: &mut [i32; 16]) {
    if block.iter().all(|&c| c == 0) {
        return;
    }
    if block[1..].iter().all(|&c| c == 0) {
        transform::idct4x4_dc(block);
    } else {
        transform::idct4x4(block);
    }
    pred.add_residual(sbx, sby, block);
}
