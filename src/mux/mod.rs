//! WebP mux/demux and animation.
//!
//! - **Demux** ([`WebPDemuxer`]): chunk-level parsing; frames and raw
//!   bitstreams without decoding pixels.
//! - **Mux** ([`WebPMux`]): assembles containers from encoded bitstreams
//!   and metadata (ICC, EXIF, XMP).
//! - **Animation**: [`encode_animation`] and [`AnimationEncoder`] write
//!   animated files; [`decode_animation_frames`], [`decode_animation_raw_frames`]
//!   and [`AnimationDecoder`] read them.
//!
//! All types work in `no_std + alloc` environments.

mod anim;
mod anim_decode;
mod assemble;
mod demux;
mod error;

pub use anim::{encode_animation, AnimationConfig, AnimationEncoder};
pub use anim_decode::{
    decode_animation_frames, decode_animation_raw_frames, AnimFrame, AnimationDecoder,
    AnimationFrame, AnimationInfo, DecodedAnimation,
};
pub use assemble::{MuxFrame, WebPMux};
pub use demux::{BlendMethod, DemuxFrame, DemuxFrameIter, DisposeMethod, WebPDemuxer};
pub use error::MuxError;
