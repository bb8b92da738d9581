//! Animation encoder.
//!
//! # Example
//!
//! ```rust
//! use webp_core::mux::{AnimationConfig, AnimationEncoder, AnimationFrame};
//! use webp_core::LoopCount;
//!
//! let config = AnimationConfig {
//!     loop_count: LoopCount::Forever,
//!     ..Default::default()
//! };
//! let mut anim = AnimationEncoder::new(32, 24, config)?;
//!
//! let pixels = vec![255u8; 32 * 24 * 4];
//! anim.add_frame(&AnimationFrame::new(pixels.clone(), 32, 24, 100))?;
//! anim.add_frame(&AnimationFrame::new(pixels, 32, 24, 100))?;
//!
//! let webp = anim.finalize()?;
//! # Ok::<(), webp_core::mux::MuxError>(())
//! ```

use alloc::vec::Vec;

use enough::{Stop, Unstoppable};

use super::anim_decode::AnimationFrame;
use super::assemble::{MuxFrame, WebPMux, MAX_FRAME_DIMENSION};
use super::error::MuxError;
use crate::decoder::LoopCount;
use crate::encoder::{encode_frame, EncodeError, EncoderConfig, Metadata};

/// Settings shared by every frame of an animation.
#[derive(Debug, Clone)]
pub struct AnimationConfig {
    /// Background color in file (BGRA) order.
    pub background_color: [u8; 4],
    pub loop_count: LoopCount,
    /// Codec for frames that do not choose one. Default: true.
    pub lossless: bool,
    /// Quality of lossy frames, 0 to 100. Default: 75.
    pub quality: f32,
    /// Canvas size. When `None`, the smallest canvas holding every frame.
    pub canvas_size: Option<(u32, u32)>,
    pub metadata: Metadata,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            background_color: [0, 0, 0, 0],
            loop_count: LoopCount::Forever,
            lossless: true,
            quality: 75.0,
            canvas_size: None,
            metadata: Metadata::default(),
        }
    }
}

impl AnimationConfig {
    fn frame_config(&self, frame: &AnimationFrame) -> EncoderConfig {
        EncoderConfig::new()
            .lossless(frame.lossless.unwrap_or(self.lossless))
            .quality(self.quality)
    }
}

/// Encodes frames one at a time into an animated WebP.
pub struct AnimationEncoder<'a> {
    mux: WebPMux,
    config: AnimationConfig,
    stop: &'a dyn Stop,
}

impl<'a> AnimationEncoder<'a> {
    /// The canvas must be between 1 and 16777216 pixels on each side.
    pub fn new(width: u32, height: u32, config: AnimationConfig) -> Result<Self, MuxError> {
        if width == 0 || height == 0 || width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION
        {
            return Err(MuxError::InvalidDimensions { width, height });
        }
        EncoderConfig::new().quality(config.quality).validate()?;

        let mut mux = WebPMux::new(width, height);
        mux.set_animation(config.background_color, config.loop_count);
        mux.set_metadata(config.metadata.clone());
        Ok(Self {
            mux,
            config,
            stop: &Unstoppable,
        })
    }

    /// Polled before each frame and by the frame encoders.
    #[must_use]
    pub fn with_stop(mut self, stop: &'a dyn Stop) -> Self {
        self.stop = stop;
        self
    }

    /// Encodes `frame` with its own codec choice, or the configured default.
    pub fn add_frame(&mut self, frame: &AnimationFrame) -> Result<(), MuxError> {
        self.stop.check().map_err(EncodeError::from)?;
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.rgba.len() != expected {
            return Err(MuxError::FrameBufferSize {
                expected,
                actual: frame.rgba.len(),
            });
        }
        self.mux
            .check_placement(frame.x, frame.y, frame.width, frame.height, frame.duration_ms)?;

        let config = self.config.frame_config(frame);
        let encoded = encode_frame(
            &frame.rgba,
            frame.width,
            frame.height,
            frame.width as usize * 4,
            &config,
            self.stop,
        )?;
        log::trace!(
            "frame {}: {}x{} at ({}, {}) as {}",
            self.mux.num_frames(),
            frame.width,
            frame.height,
            frame.x,
            frame.y,
            core::str::from_utf8(&encoded.fourcc).unwrap_or("?")
        );

        self.mux.push_frame(MuxFrame {
            x_offset: frame.x,
            y_offset: frame.y,
            width: frame.width,
            height: frame.height,
            duration_ms: frame.duration_ms,
            dispose: frame.dispose,
            blend: frame.blend,
            is_lossless: &encoded.fourcc == b"VP8L",
            bitstream: encoded.data,
            alpha_data: encoded.alpha,
        })
    }

    pub fn num_frames(&self) -> u32 {
        self.mux.num_frames()
    }

    /// Writes the container. Fails if no frame was added.
    pub fn finalize(self) -> Result<Vec<u8>, MuxError> {
        self.mux.assemble()
    }
}

/// Encodes `frames` as an animated WebP.
///
/// Each frame keeps its offset, duration, blend and dispose settings. Frames
/// with `lossless: None` use [`AnimationConfig::lossless`].
pub fn encode_animation(
    frames: &[AnimationFrame],
    config: &AnimationConfig,
) -> Result<Vec<u8>, MuxError> {
    if frames.is_empty() {
        return Err(MuxError::NoFrames);
    }
    let (width, height) = config.canvas_size.unwrap_or_else(|| {
        frames.iter().fold((0, 0), |(w, h), frame| {
            (
                w.max(frame.x.saturating_add(frame.width)),
                h.max(frame.y.saturating_add(frame.height)),
            )
        })
    });

    let mut encoder = AnimationEncoder::new(width, height, config.clone())?;
    for frame in frames {
        encoder.add_frame(frame)?;
    }
    encoder.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{read_info, Limits};
    use crate::mux::{decode_animation_raw_frames, BlendMethod, DisposeMethod, WebPDemuxer};
    use alloc::vec;
    use enough::StopReason;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        rgba.repeat((width * height) as usize)
    }

    #[test]
    fn canvas_defaults_to_frame_bounds() {
        let frames = [
            AnimationFrame::new(solid(4, 4, [255, 0, 0, 255]), 4, 4, 50),
            AnimationFrame::new(solid(2, 2, [0, 255, 0, 255]), 2, 2, 50).at(6, 2),
        ];
        let webp = encode_animation(&frames, &AnimationConfig::default()).unwrap();
        let info = read_info(&webp).unwrap();
        assert_eq!((info.width, info.height), (8, 4));
        assert!(info.has_animation);
        assert_eq!(info.frame_count, 2);
    }

    #[test]
    fn per_frame_codec_choice() {
        let frames = [
            AnimationFrame::new(solid(8, 8, [10, 20, 30, 255]), 8, 8, 100),
            AnimationFrame::new(solid(8, 8, [10, 20, 30, 128]), 8, 8, 100).lossless(false),
        ];
        let webp = encode_animation(&frames, &AnimationConfig::default()).unwrap();
        let demuxer = WebPDemuxer::new(&webp).unwrap();
        let kinds: Vec<(bool, bool)> = demuxer
            .frames()
            .map(|frame| frame.map(|f| (f.is_lossy, f.alpha_data.is_some())))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(kinds, [(false, false), (true, true)]);
        assert!(demuxer.has_alpha());
    }

    #[test]
    fn raw_frames_keep_their_settings() {
        let frames = [
            AnimationFrame::new(solid(6, 6, [1, 2, 3, 255]), 6, 6, 70),
            AnimationFrame::new(solid(2, 4, [9, 8, 7, 100]), 2, 4, 30)
                .at(2, 2)
                .blend(BlendMethod::AlphaBlend)
                .dispose(DisposeMethod::Background),
        ];
        let webp = encode_animation(&frames, &AnimationConfig::default()).unwrap();
        let decoded = decode_animation_raw_frames(&webp, &Limits::default()).unwrap();
        assert_eq!(decoded.frames.len(), 2);
        for (out, original) in decoded.frames.iter().zip(&frames) {
            assert_eq!(out.rgba, original.rgba);
            assert_eq!((out.x, out.y, out.width, out.height), (original.x, original.y, original.width, original.height));
            assert_eq!((out.blend, out.dispose, out.duration_ms), (original.blend, original.dispose, original.duration_ms));
            assert_eq!(out.lossless, Some(true));
        }
    }

    #[test]
    fn invalid_frames_are_rejected() {
        let odd = [AnimationFrame::new(solid(2, 2, [0; 4]), 2, 2, 10).at(1, 0)];
        let config = AnimationConfig {
            canvas_size: Some((4, 4)),
            ..AnimationConfig::default()
        };
        assert!(matches!(encode_animation(&odd, &config), Err(MuxError::OddFrameOffset { .. })));

        let outside = [AnimationFrame::new(solid(4, 4, [0; 4]), 4, 4, 10).at(2, 0)];
        assert!(matches!(
            encode_animation(&outside, &config),
            Err(MuxError::FrameOutsideCanvas { .. })
        ));

        let short = [AnimationFrame::new(vec![0; 7], 2, 2, 10)];
        assert!(matches!(encode_animation(&short, &config), Err(MuxError::FrameBufferSize { .. })));
        assert!(matches!(encode_animation(&[], &config), Err(MuxError::NoFrames)));

        let bad_quality = AnimationConfig {
            quality: 150.0,
            ..AnimationConfig::default()
        };
        assert!(AnimationEncoder::new(4, 4, bad_quality).is_err());
    }

    #[test]
    fn cancellation_stops_encoding() {
        struct AlwaysStop;
        impl Stop for AlwaysStop {
            fn check(&self) -> Result<(), StopReason> {
                Err(StopReason::Cancelled)
            }
        }
        let mut encoder = AnimationEncoder::new(2, 2, AnimationConfig::default())
            .unwrap()
            .with_stop(&AlwaysStop);
        let result = encoder.add_frame(&AnimationFrame::new(solid(2, 2, [0; 4]), 2, 2, 10));
        assert!(matches!(
            result,
            Err(MuxError::EncodeError(EncodeError::Cancelled(_)))
        ));
    }
}
