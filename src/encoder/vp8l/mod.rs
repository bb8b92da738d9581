//! VP8L lossless encoder.
//!
//! Bitstream format: <https://developers.google.com/speed/webp/docs/webp_lossless_bitstream_specification>

mod backward_refs;
mod bitwriter;
mod encode;
mod huffman;
mod transforms;
mod types;

pub(crate) use encode::{encode_alpha_plane, encode_vp8l};
