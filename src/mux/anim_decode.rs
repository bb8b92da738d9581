//! Animation decoding.
//!
//! [`AnimationDecoder`] steps through an animated WebP one composited canvas
//! at a time. [`decode_animation_frames`] and [`decode_animation_raw_frames`]
//! collect every frame at once.
//!
//! # Example
//!
//! ```rust,no_run
//! use webp_core::AnimationDecoder;
//!
//! let webp_data: &[u8] = &[]; // your animated WebP data
//! let mut decoder = AnimationDecoder::new(webp_data)?;
//! let info = decoder.info();
//! println!("{}x{}, {} frames", info.canvas_width, info.canvas_height, info.frame_count);
//!
//! while let Some(frame) = decoder.next_frame()? {
//!     println!("frame at {}ms, duration {}ms", frame.timestamp_ms, frame.duration_ms);
//! }
//! # Ok::<(), webp_core::DecodeError>(())
//! ```

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use enough::Stop;

use super::demux::{BlendMethod, DisposeMethod};
use crate::decoder::{DecodeConfig, DecodeError, Limits, LoopCount, RawFrame, WebPDecoder};

/// One frame of an animation, with owned RGBA pixels.
///
/// Decoding produces these; [`encode_animation`](super::encode_animation)
/// consumes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationFrame {
    /// Horizontal offset on the canvas. Must be even when encoding.
    pub x: u32,
    /// Vertical offset on the canvas. Must be even when encoding.
    pub y: u32,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Display time in milliseconds, below 2^24.
    pub duration_ms: u32,
    /// How the frame combines with the canvas under it.
    pub blend: BlendMethod,
    /// What happens to the frame's rectangle before the next frame is drawn.
    pub dispose: DisposeMethod,
    /// Codec of the frame's bitstream when decoded raw. When encoding,
    /// overrides [`AnimationConfig::lossless`](super::AnimationConfig::lossless).
    pub lossless: Option<bool>,
    /// `width * height * 4` bytes.
    pub rgba: Vec<u8>,
}

impl AnimationFrame {
    /// A frame at the canvas origin that replaces what is under it and is
    /// not disposed.
    #[must_use]
    pub fn new(rgba: Vec<u8>, width: u32, height: u32, duration_ms: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            duration_ms,
            blend: BlendMethod::Overwrite,
            dispose: DisposeMethod::None,
            lossless: None,
            rgba,
        }
    }

    #[must_use]
    pub fn at(mut self, x: u32, y: u32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    #[must_use]
    pub fn blend(mut self, blend: BlendMethod) -> Self {
        self.blend = blend;
        self
    }

    #[must_use]
    pub fn dispose(mut self, dispose: DisposeMethod) -> Self {
        self.dispose = dispose;
        self
    }

    #[must_use]
    pub fn lossless(mut self, lossless: bool) -> Self {
        self.lossless = Some(lossless);
        self
    }

    fn from_raw(raw: RawFrame) -> Self {
        Self {
            x: raw.rect.x,
            y: raw.rect.y,
            width: raw.rect.width,
            height: raw.rect.height,
            duration_ms: raw.duration_ms,
            blend: if raw.blend {
                BlendMethod::AlphaBlend
            } else {
                BlendMethod::Overwrite
            },
            dispose: if raw.dispose {
                DisposeMethod::Background
            } else {
                DisposeMethod::None
            },
            lossless: Some(raw.is_lossless),
            rgba: raw.rgba,
        }
    }
}

/// Every frame of an animation plus its global settings.
#[derive(Debug, Clone)]
pub struct DecodedAnimation {
    /// Frames in display order.
    pub frames: Vec<AnimationFrame>,
    /// Canvas width in pixels.
    pub canvas_width: u32,
    /// Canvas height in pixels.
    pub canvas_height: u32,
    /// Number of times the animation plays.
    pub loop_count: LoopCount,
    /// ANIM background in file (BGRA) order.
    pub background_color: [u8; 4],
}

/// A composited canvas snapshot.
#[derive(Debug, Clone)]
pub struct AnimFrame {
    /// RGBA pixel data (canvas_width * canvas_height * 4 bytes).
    pub data: Vec<u8>,
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    /// Sum of the durations of the frames before this one.
    pub timestamp_ms: u32,
    /// Display time of this frame in milliseconds.
    pub duration_ms: u32,
}

/// Global properties of an animated WebP.
#[derive(Debug, Clone)]
pub struct AnimationInfo {
    /// Canvas width in pixels.
    pub canvas_width: u32,
    /// Canvas height in pixels.
    pub canvas_height: u32,
    /// Number of ANMF frames.
    pub frame_count: u32,
    /// Number of times the animation plays.
    pub loop_count: LoopCount,
    /// ANIM background in file (BGRA) order.
    pub background_color: [u8; 4],
    /// Whether the VP8X header announces alpha.
    pub has_alpha: bool,
}

/// Animated WebP decoder yielding owned snapshots of the composited canvas.
pub struct AnimationDecoder<'a> {
    decoder: WebPDecoder<'a>,
    buf: Vec<u8>,
    cumulative_ms: u32,
    frames_read: u32,
    total_frames: u32,
}

impl<'a> AnimationDecoder<'a> {
    /// Fails if the data is not an animated WebP.
    pub fn new(data: &'a [u8]) -> Result<Self, DecodeError> {
        Self::new_with_config(data, &DecodeConfig::default())
    }

    pub fn new_with_config(data: &'a [u8], config: &DecodeConfig) -> Result<Self, DecodeError> {
        let decoder = WebPDecoder::new_with_config(data, config)?;
        if !decoder.is_animated() {
            return Err(DecodeError::InvalidParameter(String::from(
                "not an animated WebP",
            )));
        }
        let total_frames = decoder.num_frames();
        let buf = vec![0u8; decoder.output_buffer_size()];
        Ok(Self {
            decoder,
            buf,
            cumulative_ms: 0,
            frames_read: 0,
            total_frames,
        })
    }

    pub fn info(&self) -> AnimationInfo {
        let (canvas_width, canvas_height) = self.decoder.dimensions();
        AnimationInfo {
            canvas_width,
            canvas_height,
            frame_count: self.total_frames,
            loop_count: self.decoder.loop_count(),
            background_color: self.decoder.background_color_hint().unwrap_or_default(),
            has_alpha: self.decoder.has_alpha(),
        }
    }

    pub fn has_more_frames(&self) -> bool {
        self.frames_read < self.total_frames
    }

    pub fn frames_read(&self) -> u32 {
        self.frames_read
    }

    /// Overrides the RGBA color of the initial canvas and disposed frames.
    pub fn set_background_color(&mut self, color: [u8; 4]) -> Result<(), DecodeError> {
        self.decoder.set_background_color(color)
    }

    /// Polled once per frame.
    pub fn set_stop(&mut self, stop: &'a dyn Stop) {
        self.decoder.set_stop(Some(stop));
    }

    pub fn icc_profile(&self) -> Result<Option<Vec<u8>>, DecodeError> {
        self.decoder.icc_profile()
    }

    pub fn exif_metadata(&self) -> Result<Option<Vec<u8>>, DecodeError> {
        self.decoder.exif_metadata()
    }

    pub fn xmp_metadata(&self) -> Result<Option<Vec<u8>>, DecodeError> {
        self.decoder.xmp_metadata()
    }

    /// Total duration of all frames in milliseconds.
    pub fn loop_duration(&self) -> u64 {
        self.decoder.loop_duration()
    }

    /// Decodes the next frame, or returns `None` once all have been read.
    pub fn next_frame(&mut self) -> Result<Option<AnimFrame>, DecodeError> {
        let Some(duration_ms) = self.decoder.read_frame(&mut self.buf)? else {
            return Ok(None);
        };
        let timestamp_ms = self.cumulative_ms;
        self.cumulative_ms = self.cumulative_ms.saturating_add(duration_ms);
        self.frames_read += 1;
        let (width, height) = self.decoder.dimensions();
        Ok(Some(AnimFrame {
            data: self.buf.clone(),
            width,
            height,
            timestamp_ms,
            duration_ms,
        }))
    }

    /// Rewinds to the first frame.
    pub fn reset(&mut self) -> Result<(), DecodeError> {
        self.decoder.reset_animation()?;
        self.cumulative_ms = 0;
        self.frames_read = 0;
        Ok(())
    }

    /// Decodes every frame from the start.
    pub fn decode_all(&mut self) -> Result<Vec<AnimFrame>, DecodeError> {
        self.reset()?;
        let mut frames = Vec::with_capacity(self.total_frames as usize);
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

impl Iterator for AnimationDecoder<'_> {
    type Item = Result<AnimFrame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Decodes an animation into full-canvas frames, each the composited state
/// after that frame was drawn. Output frames sit at the origin, overwrite
/// and are never disposed. A still image yields a single frame.
///
/// Every snapshot is kept, so the frame count times the canvas size is
/// checked against [`Limits::max_animation_memory()`] up front.
pub fn decode_animation_frames(data: &[u8], limits: &Limits) -> Result<DecodedAnimation, DecodeError> {
    let config = DecodeConfig::default().limits(limits.clone());
    let mut decoder = WebPDecoder::new_with_config(data, &config)?;
    let (canvas_width, canvas_height) = decoder.dimensions();
    let mut buf = vec![0u8; decoder.output_buffer_size()];

    let mut frames = Vec::new();
    if decoder.is_animated() {
        limits.check_animation_memory(u64::from(decoder.num_frames()), buf.len() as u64)?;
        while let Some(duration_ms) = decoder.read_frame(&mut buf)? {
            frames.push(AnimationFrame::new(buf.clone(), canvas_width, canvas_height, duration_ms));
        }
    } else {
        decoder.read_image(&mut buf)?;
        frames.push(AnimationFrame::new(buf, canvas_width, canvas_height, 0));
    }
    log::debug!("decoded {} composited frame(s)", frames.len());

    Ok(DecodedAnimation {
        frames,
        canvas_width,
        canvas_height,
        loop_count: decoder.loop_count(),
        background_color: decoder.background_color_hint().unwrap_or_default(),
    })
}

/// Decodes every animation frame to its own rectangle without compositing,
/// keeping offsets and blend/dispose flags. A still image yields a single
/// frame covering the canvas.
pub fn decode_animation_raw_frames(
    data: &[u8],
    limits: &Limits,
) -> Result<DecodedAnimation, DecodeError> {
    let config = DecodeConfig::default().limits(limits.clone());
    let mut decoder = WebPDecoder::new_with_config(data, &config)?;
    let (canvas_width, canvas_height) = decoder.dimensions();

    let mut frames = Vec::with_capacity(decoder.num_frames() as usize);
    if decoder.is_animated() {
        for index in 0..decoder.num_frames() as usize {
            if let Some(raw) = decoder.decode_raw_frame(index)? {
                frames.push(AnimationFrame::from_raw(raw));
            }
        }
    } else {
        let mut buf = vec![0u8; decoder.output_buffer_size()];
        decoder.read_image(&mut buf)?;
        let mut frame = AnimationFrame::new(buf, canvas_width, canvas_height, 0);
        frame.lossless = Some(!decoder.is_lossy());
        frames.push(frame);
    }

    Ok(DecodedAnimation {
        frames,
        canvas_width,
        canvas_height,
        loop_count: decoder.loop_count(),
        background_color: decoder.background_color_hint().unwrap_or_default(),
    })
}
