//! Tables and signal processing shared by the VP8 decoder and encoder.

pub(crate) mod prediction;
pub(crate) mod transform;
pub(crate) mod types;
