//! WebP encoder implementation

mod api;
mod arithmetic;
mod vec_writer;
/// VP8 (lossy) encoder
mod vp8;
/// VP8L (lossless) encoder
mod vp8l;

// Re-export public API
pub use api::{encode_lossless, encode_lossy, EncodeError, EncodeRequest, EncoderConfig, Metadata};

// Crate-internal re-exports for the mux module
pub(crate) use api::{
    chunk_size, encode_frame, write_chunk, write_metadata_head, write_metadata_tail, write_vp8x,
    ALPHA_FLAG, ANIMATION_FLAG,
};
pub(crate) use vec_writer::VecWriter;
