//! WebP decoder implementation

mod api;
pub(crate) mod arithmetic;
mod bit_reader;
pub(crate) mod extended;
mod huffman;
mod limits;
mod loop_filter;
pub(crate) mod lossless;
pub(crate) mod lossless_transform;
pub(crate) mod vp8;

pub(crate) use api::{parse_anmf, read_chunk_header, RawFrame, WebPRiffChunk};

// Re-export public API
pub use api::{
    decode_rgba32, is_webp, read_info, BitstreamFormat, DecodeConfig, DecodeError,
    DecodeRequest, ErrorKind, ImageInfo, LoopCount, WebPDecoder,
};
pub use limits::Limits;
