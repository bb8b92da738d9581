//! WebP container assembler.
//!
//! Builds a WebP file from already encoded bitstreams and metadata.
//!
//! # Example
//!
//! ```rust,no_run
//! use webp_core::mux::{WebPMux, MuxFrame, BlendMethod, DisposeMethod};
//! use webp_core::LoopCount;
//!
//! let mut mux = WebPMux::new(320, 240);
//! mux.set_animation([0, 0, 0, 0], LoopCount::Forever);
//!
//! mux.push_frame(MuxFrame {
//!     x_offset: 0,
//!     y_offset: 0,
//!     width: 320,
//!     height: 240,
//!     duration_ms: 100,
//!     dispose: DisposeMethod::Background,
//!     blend: BlendMethod::Overwrite,
//!     bitstream: vec![], // VP8L data here
//!     alpha_data: None,
//!     is_lossless: true,
//! })?;
//!
//! let webp_bytes = mux.assemble()?;
//! # Ok::<(), webp_core::mux::MuxError>(())
//! ```

use alloc::vec::Vec;

use super::demux::{BlendMethod, DisposeMethod, WebPDemuxer};
use super::error::MuxError;
use crate::decoder::{lossless, LoopCount};
use crate::encoder::{
    chunk_size, write_chunk, write_metadata_head, write_metadata_tail, write_vp8x, Metadata,
    VecWriter, ALPHA_FLAG, ANIMATION_FLAG,
};

/// Largest frame duration an ANMF chunk can store.
const MAX_DURATION_MS: u32 = (1 << 24) - 1;
pub(crate) const MAX_FRAME_DIMENSION: u32 = 1 << 24;

/// One encoded frame to be placed in the container.
#[derive(Debug, Clone)]
pub struct MuxFrame {
    /// Must be even.
    pub x_offset: u32,
    /// Must be even.
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
    /// At most 16777215.
    pub duration_ms: u32,
    pub dispose: DisposeMethod,
    pub blend: BlendMethod,
    /// Raw VP8 or VP8L bitstream.
    pub bitstream: Vec<u8>,
    /// `ALPH` payload for a lossy frame with transparency.
    pub alpha_data: Option<Vec<u8>>,
    /// VP8L when true, VP8 otherwise.
    pub is_lossless: bool,
}

impl MuxFrame {
    fn fourcc(&self) -> &'static [u8; 4] {
        if self.is_lossless {
            b"VP8L"
        } else {
            b"VP8 "
        }
    }

    fn has_alpha(&self) -> bool {
        if self.is_lossless {
            lossless::read_header(&self.bitstream).map_or(true, |header| header.alpha_hint)
        } else {
            self.alpha_data.is_some()
        }
    }

    /// Size of the `ALPH` and image chunks.
    fn image_chunks_size(&self) -> u32 {
        chunk_size(self.bitstream.len())
            + self.alpha_data.as_ref().map_or(0, |alpha| chunk_size(alpha.len()))
    }

    fn write_image_chunks(&self, out: &mut Vec<u8>) {
        if let Some(alpha) = &self.alpha_data {
            write_chunk(out, b"ALPH", alpha);
        }
        write_chunk(out, self.fourcc(), &self.bitstream);
    }

    fn anmf_payload_size(&self) -> u32 {
        16 + self.image_chunks_size()
    }

    fn write_anmf(&self, out: &mut Vec<u8>) {
        out.write_all(b"ANMF");
        out.write_u32_le(self.anmf_payload_size());
        out.write_u24_le(self.x_offset / 2);
        out.write_u24_le(self.y_offset / 2);
        out.write_u24_le(self.width - 1);
        out.write_u24_le(self.height - 1);
        out.write_u24_le(self.duration_ms);

        let mut flags = 0u8;
        if self.dispose == DisposeMethod::Background {
            flags |= 0b01;
        }
        if self.blend == BlendMethod::Overwrite {
            flags |= 0b10;
        }
        out.push(flags);
        self.write_image_chunks(out);
    }
}

#[derive(Debug, Clone)]
struct AnimationParams {
    /// BGRA, as stored.
    background_color: [u8; 4],
    loop_count: LoopCount,
}

/// WebP container assembler for still and animated images.
pub struct WebPMux {
    canvas_width: u32,
    canvas_height: u32,
    animation: Option<AnimationParams>,
    frames: Vec<MuxFrame>,
    image: Option<MuxFrame>,
    metadata: Metadata,
}

impl WebPMux {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas_width: width,
            canvas_height: height,
            animation: None,
            frames: Vec::new(),
            image: None,
            metadata: Metadata::default(),
        }
    }

    /// Loads an existing file, e.g. to replace its metadata.
    pub fn from_data(data: &[u8]) -> Result<Self, MuxError> {
        let demuxer = WebPDemuxer::new(data)?;
        let mut mux = Self::new(demuxer.canvas_width(), demuxer.canvas_height());
        mux.metadata = Metadata {
            icc: demuxer.icc_profile().map(<[u8]>::to_vec),
            exif: demuxer.exif().map(<[u8]>::to_vec),
            xmp: demuxer.xmp().map(<[u8]>::to_vec),
        };
        if demuxer.is_animated() {
            mux.set_animation(demuxer.background_color(), demuxer.loop_count());
        }

        for frame in demuxer.frames() {
            let frame = frame?;
            let frame = MuxFrame {
                x_offset: frame.x_offset,
                y_offset: frame.y_offset,
                width: frame.width,
                height: frame.height,
                duration_ms: frame.duration_ms,
                dispose: frame.dispose,
                blend: frame.blend,
                bitstream: frame.bitstream.to_vec(),
                alpha_data: frame.alpha_data.map(<[u8]>::to_vec),
                is_lossless: !frame.is_lossy,
            };
            if demuxer.is_animated() {
                mux.frames.push(frame);
            } else {
                mux.image = Some(frame);
            }
        }
        Ok(mux)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    /// Switches to animated output. `background_color` is BGRA.
    pub fn set_animation(&mut self, background_color: [u8; 4], loop_count: LoopCount) {
        self.animation = Some(AnimationParams {
            background_color,
            loop_count,
        });
    }

    /// Appends an animation frame after checking its placement.
    pub fn push_frame(&mut self, frame: MuxFrame) -> Result<(), MuxError> {
        self.check_placement(
            frame.x_offset,
            frame.y_offset,
            frame.width,
            frame.height,
            frame.duration_ms,
        )?;
        self.frames.push(frame);
        Ok(())
    }

    /// Checks that a frame can be stored as an ANMF chunk on this canvas.
    pub(crate) fn check_placement(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        duration_ms: u32,
    ) -> Result<(), MuxError> {
        if x % 2 != 0 || y % 2 != 0 {
            return Err(MuxError::OddFrameOffset { x, y });
        }
        if width == 0 || height == 0 || width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION
        {
            return Err(MuxError::InvalidDimensions { width, height });
        }
        if u64::from(x) + u64::from(width) > u64::from(self.canvas_width)
            || u64::from(y) + u64::from(height) > u64::from(self.canvas_height)
        {
            return Err(MuxError::FrameOutsideCanvas {
                x,
                y,
                width,
                height,
                canvas_width: self.canvas_width,
                canvas_height: self.canvas_height,
            });
        }
        if duration_ms > MAX_DURATION_MS {
            return Err(MuxError::DurationTooLong(duration_ms));
        }
        Ok(())
    }

    /// Sets the image of a still (non-animated) file.
    pub fn set_image(&mut self, frame: MuxFrame) {
        self.image = Some(frame);
    }

    pub fn num_frames(&self) -> u32 {
        self.frames.len() as u32
    }

    pub fn assemble(&self) -> Result<Vec<u8>, MuxError> {
        if self.canvas_width == 0
            || self.canvas_height == 0
            || self.canvas_width > MAX_FRAME_DIMENSION
            || self.canvas_height > MAX_FRAME_DIMENSION
        {
            return Err(MuxError::InvalidDimensions {
                width: self.canvas_width,
                height: self.canvas_height,
            });
        }
        match &self.animation {
            Some(animation) => self.assemble_animated(animation),
            None => self.assemble_still(),
        }
    }

    fn assemble_still(&self) -> Result<Vec<u8>, MuxError> {
        let frame = self.image.as_ref().ok_or(MuxError::NoFrames)?;
        let mut out = Vec::new();
        out.write_all(b"RIFF");

        if self.metadata.is_empty() && frame.alpha_data.is_none() {
            out.write_u32_le(4 + frame.image_chunks_size());
            out.write_all(b"WEBP");
            frame.write_image_chunks(&mut out);
            return Ok(out);
        }

        let mut flags = self.metadata.vp8x_flags();
        if frame.has_alpha() {
            flags |= ALPHA_FLAG;
        }
        out.write_u32_le(
            4 + chunk_size(10) + self.metadata.chunks_size() + frame.image_chunks_size(),
        );
        out.write_all(b"WEBP");
        write_vp8x(&mut out, flags, self.canvas_width, self.canvas_height);
        write_metadata_head(&mut out, &self.metadata);
        frame.write_image_chunks(&mut out);
        write_metadata_tail(&mut out, &self.metadata);
        Ok(out)
    }

    fn assemble_animated(&self, animation: &AnimationParams) -> Result<Vec<u8>, MuxError> {
        if self.frames.is_empty() {
            return Err(MuxError::NoFrames);
        }

        let frames_size: u32 = self
            .frames
            .iter()
            .map(|frame| 8 + frame.anmf_payload_size())
            .sum();
        let total = 4 + chunk_size(10) + chunk_size(6) + self.metadata.chunks_size() + frames_size;

        let mut out = Vec::with_capacity(total as usize + 8);
        out.write_all(b"RIFF");
        out.write_u32_le(total);
        out.write_all(b"WEBP");

        let mut flags = self.metadata.vp8x_flags() | ANIMATION_FLAG;
        if self.frames.iter().any(MuxFrame::has_alpha) {
            flags |= ALPHA_FLAG;
        }
        write_vp8x(&mut out, flags, self.canvas_width, self.canvas_height);
        write_metadata_head(&mut out, &self.metadata);

        let mut anim = Vec::with_capacity(6);
        anim.write_all(&animation.background_color);
        anim.write_u16_le(animation.loop_count.to_u16());
        write_chunk(&mut out, b"ANIM", &anim);

        for frame in &self.frames {
            frame.write_anmf(&mut out);
        }
        write_metadata_tail(&mut out, &self.metadata);

        log::debug!(
            "assembled {} frame(s) on a {}x{} canvas, {} bytes",
            self.frames.len(),
            self.canvas_width,
            self.canvas_height,
            out.len()
        );
        Ok(out)
    }
}
