//! Error type for container assembly and animation encoding.

use alloc::string::String;
use thiserror::Error;

use crate::decoder::DecodeError;
use crate::encoder::EncodeError;

/// Errors from muxing, demuxing and animation encoding.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MuxError {
    /// The data is not a WebP file this module can parse.
    #[error("Invalid WebP format: {0}")]
    InvalidFormat(String),

    /// Zero or oversized canvas or frame.
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Encoding error: {0}")]
    EncodeError(#[from] EncodeError),

    #[error("Decoding error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Nothing to assemble.
    #[error("No frames to assemble")]
    NoFrames,

    /// ANMF offsets are stored in units of two pixels.
    #[error("Frame offset must be even: ({x}, {y})")]
    OddFrameOffset { x: u32, y: u32 },

    #[error(
        "Frame at ({x}, {y}) size {width}x{height} exceeds canvas {canvas_width}x{canvas_height}"
    )]
    FrameOutsideCanvas {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        canvas_width: u32,
        canvas_height: u32,
    },

    /// Frame duration does not fit the 24-bit ANMF field.
    #[error("Frame duration {0}ms exceeds 16777215ms")]
    DurationTooLong(u32),

    /// Frame pixel buffer does not hold `width * height` RGBA pixels.
    #[error("Frame buffer holds {actual} bytes, expected {expected}")]
    FrameBufferSize { expected: usize, actual: usize },
}
