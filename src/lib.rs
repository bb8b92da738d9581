//! Decoding and encoding of WebP images.
//!
//! Supports lossy (VP8) and lossless (VP8L) bitstreams, the extended container
//! with alpha, ICC/EXIF/XMP metadata and animation.
//!
//! # Features
//!
//! - `std` (default): `std::io::Write` output for [`EncodeRequest`].
//!
//! # no_std Support
//!
//! Everything works in `no_std` environments with `alloc`:
//! ```toml
//! [dependencies]
//! webp-core = { version = "...", default-features = false }
//! ```
//!
//! All functions take `&[u8]` slices directly; no Read/Seek traits required.
//!
//! # Encoding
//!
//! ```rust
//! let rgba = vec![255u8; 4 * 4 * 4]; // 4x4 RGBA image
//! let lossless = webp_core::encode_lossless(&rgba, 4, 4, 16, None)?;
//! let lossy = webp_core::encode_lossy(&rgba, 4, 4, 16, 80.0, None)?;
//! # Ok::<(), webp_core::EncodeError>(())
//! ```
//!
//! Or use [`EncoderConfig`] for reusable configuration:
//!
//! ```rust
//! use webp_core::{EncodeRequest, EncoderConfig, Metadata};
//!
//! let config = EncoderConfig::new()
//!     .quality(85.0)
//!     .metadata(Metadata::new().with_exif(vec![0u8; 8]));
//! let rgba = vec![255u8; 4 * 4 * 4];
//! let webp = EncodeRequest::new(&config, &rgba, 4, 4).encode()?;
//! # Ok::<(), webp_core::EncodeError>(())
//! ```
//!
//! # Decoding
//!
//! ```rust,no_run
//! let webp_data: &[u8] = &[]; // your WebP data
//! let (pixels, width, height) = webp_core::decode_rgba32(webp_data)?;
//! # Ok::<(), webp_core::DecodeError>(())
//! ```
//!
//! Or the [`WebPDecoder`] for more control:
//!
//! ```rust,no_run
//! use webp_core::WebPDecoder;
//!
//! let webp_data: &[u8] = &[]; // your WebP data
//! let mut decoder = WebPDecoder::new(webp_data)?;
//! let (width, height) = decoder.dimensions();
//! let mut output = vec![0u8; decoder.output_buffer_size()];
//! decoder.read_image(&mut output)?;
//! # Ok::<(), webp_core::DecodeError>(())
//! ```
//!
//! # Animation
//!
//! ```rust,no_run
//! use webp_core::{decode_animation_frames, encode_animation, AnimationConfig, Limits};
//!
//! let webp_data: &[u8] = &[]; // your animated WebP data
//! let animation = decode_animation_frames(webp_data, &Limits::default())?;
//! let reencoded = encode_animation(&animation.frames, &AnimationConfig::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod common;
pub mod decoder;
pub mod encoder;
pub mod mux;

// Slice reader utility (used by decoder and mux)
mod slice_reader;
mod yuv;

// Re-export decoder public API
pub use decoder::{
    decode_rgba32, is_webp, read_info, BitstreamFormat, DecodeConfig, DecodeError, DecodeRequest,
    ErrorKind, ImageInfo, Limits, LoopCount, WebPDecoder,
};

// Re-export encoder public API
pub use encoder::{
    encode_lossless, encode_lossy, EncodeError, EncodeRequest, EncoderConfig, Metadata,
};

// Re-export mux/demux public API
pub use mux::{
    decode_animation_frames, decode_animation_raw_frames, encode_animation, AnimFrame,
    AnimationConfig, AnimationDecoder, AnimationEncoder, AnimationFrame, AnimationInfo,
    BlendMethod, DecodedAnimation, DemuxFrame, DisposeMethod, MuxError, MuxFrame, WebPDemuxer,
    WebPMux,
};

// Re-export cooperative cancellation types
pub use enough::{Stop, StopReason, Unstoppable};
