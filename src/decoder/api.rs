use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::num::NonZeroU16;
use core::ops::Range;

use enough::{Stop, StopReason, Unstoppable};
use hashbrown::HashMap;
use thiserror::Error;

use super::extended::{self, FrameRect, WebPExtendedInfo};
use super::limits::Limits;
use super::lossless::{self, LosslessDecoder};
use super::vp8::{self, Vp8Decoder};
use crate::slice_reader::SliceReader;

/// Errors that can occur when attempting to decode a WebP image
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// RIFF's "RIFF" signature not found or invalid
    #[error("Invalid RIFF signature: {0:x?}")]
    RiffSignatureInvalid([u8; 4]),

    /// WebP's "WEBP" signature not found or invalid
    #[error("Invalid WebP signature: {0:x?}")]
    WebpSignatureInvalid([u8; 4]),

    /// VP8's `[0x9D, 0x01, 0x2A]` start code not found
    #[error("Invalid VP8 magic: {0:x?}")]
    Vp8MagicInvalid([u8; 3]),

    /// Signature of 0x2f not found
    #[error("Invalid lossless signature: {0:x?}")]
    LosslessSignatureInvalid(u8),

    /// Unsupported bitstream version
    #[error("Invalid version number: {0}")]
    VersionNumberInvalid(u8),

    /// Chunk header was incorrect or invalid in its usage
    #[error("Invalid chunk header: {0:x?}")]
    ChunkHeaderInvalid([u8; 4]),

    /// An expected chunk was missing
    #[error("An expected chunk was missing")]
    ChunkMissing,

    /// A chunk is too small for its fixed fields
    #[error("Invalid chunk size")]
    InvalidChunkSize,

    /// An invalid prefix code was encountered
    #[error("Invalid Huffman code")]
    HuffmanError,

    /// The transforms specified were invalid
    #[error("Invalid transform")]
    TransformError,

    /// Invalid color cache bits
    #[error("Invalid color cache bits: {0}")]
    InvalidColorCacheBits(u8),

    /// A backward reference points before the start of the image or past its end
    #[error("Invalid backward reference")]
    BackReferenceInvalid,

    /// The VP8 partitions do not fit the declared layout
    #[error("Invalid VP8 partition layout")]
    PartitionLayoutInvalid,

    /// A header field holds a value outside its documented range
    #[error("Header field out of range: {0}")]
    FieldOutOfRange(&'static str),

    /// Inconsistent image sizes
    #[error("Inconsistent image sizes")]
    InconsistentImageSizes,

    /// Frame would go out of the canvas
    #[error("Frame outside image")]
    FrameOutsideImage,

    /// Alpha chunk doesn't match the frame's size
    #[error("Alpha chunk size mismatch")]
    AlphaChunkSizeMismatch,

    /// Invalid ALPH compression method
    #[error("Invalid compression method")]
    InvalidCompressionMethod,

    /// The ALPH chunk preprocessing info flag was invalid
    #[error("Alpha chunk preprocessing flag invalid")]
    InvalidAlphaPreprocessing,

    /// A chunk, partition or table runs past the end of the data
    #[error("Truncated data")]
    Truncated,

    /// The file may be valid, but this crate doesn't support decoding it.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Invalid function call or parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A declared size exceeds the configured [`Limits`]
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Decoding was cancelled via a [`enough::Stop`] token.
    #[error("Decoding cancelled: {0}")]
    Cancelled(StopReason),
}

/// Broad classification of a [`DecodeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad signature, start code, prefix code or other structural corruption.
    Format,
    /// The data ends before a chunk, partition or table does.
    Truncated,
    /// Valid data using a feature outside what is decoded here.
    Unsupported,
    /// A declared size exceeds the caller's budget.
    LimitExceeded,
    /// The caller's stop token fired.
    Cancelled,
}

impl DecodeError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Truncated => ErrorKind::Truncated,
            Self::VersionNumberInvalid(_)
            | Self::UnsupportedFeature(_)
            | Self::InvalidParameter(_) => ErrorKind::Unsupported,
            Self::LimitExceeded(_) => ErrorKind::LimitExceeded,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            _ => ErrorKind::Format,
        }
    }
}

impl From<StopReason> for DecodeError {
    fn from(reason: StopReason) -> Self {
        Self::Cancelled(reason)
    }
}

/// All possible RIFF chunks in a WebP image file
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Hash, Eq)]
pub(crate) enum WebPRiffChunk {
    RIFF,
    WEBP,
    VP8,
    VP8L,
    VP8X,
    ANIM,
    ANMF,
    ALPH,
    ICCP,
    EXIF,
    XMP,
    Unknown([u8; 4]),
}

impl WebPRiffChunk {
    pub(crate) const fn from_fourcc(chunk_fourcc: [u8; 4]) -> Self {
        match &chunk_fourcc {
            b"RIFF" => Self::RIFF,
            b"WEBP" => Self::WEBP,
            b"VP8 " => Self::VP8,
            b"VP8L" => Self::VP8L,
            b"VP8X" => Self::VP8X,
            b"ANIM" => Self::ANIM,
            b"ANMF" => Self::ANMF,
            b"ALPH" => Self::ALPH,
            b"ICCP" => Self::ICCP,
            b"EXIF" => Self::EXIF,
            b"XMP " => Self::XMP,
            _ => Self::Unknown(chunk_fourcc),
        }
    }

    pub(crate) const fn to_fourcc(self) -> [u8; 4] {
        match self {
            Self::RIFF => *b"RIFF",
            Self::WEBP => *b"WEBP",
            Self::VP8 => *b"VP8 ",
            Self::VP8L => *b"VP8L",
            Self::VP8X => *b"VP8X",
            Self::ANIM => *b"ANIM",
            Self::ANMF => *b"ANMF",
            Self::ALPH => *b"ALPH",
            Self::ICCP => *b"ICCP",
            Self::EXIF => *b"EXIF",
            Self::XMP => *b"XMP ",
            Self::Unknown(fourcc) => fourcc,
        }
    }

    pub(crate) const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

pub(crate) fn read_fourcc(r: &mut SliceReader<'_>) -> Result<WebPRiffChunk, DecodeError> {
    let mut chunk_fourcc = [0; 4];
    r.read_exact(&mut chunk_fourcc)?;
    Ok(WebPRiffChunk::from_fourcc(chunk_fourcc))
}

/// Reads a chunk header, returning the chunk, its size and its padded size.
pub(crate) fn read_chunk_header(
    r: &mut SliceReader<'_>,
) -> Result<(WebPRiffChunk, u64, u64), DecodeError> {
    let chunk = read_fourcc(r)?;
    let chunk_size = u64::from(r.read_u32_le()?);
    let chunk_size_rounded = chunk_size + (chunk_size & 1);
    log::trace!("chunk {:?} ({} bytes)", chunk, chunk_size);
    Ok((chunk, chunk_size, chunk_size_rounded))
}

/// Number of times that an animation loops.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoopCount {
    /// The animation loops forever.
    Forever,
    /// Each frame of the animation is displayed the specified number of times.
    Times(NonZeroU16),
}

impl LoopCount {
    /// The value stored in the ANIM chunk (0 = forever).
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Forever => 0,
            Self::Times(n) => n.get(),
        }
    }
}

impl core::fmt::Display for LoopCount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LoopCount::Forever => f.write_str("infinite"),
            LoopCount::Times(n) => write!(f, "{} time{}", n, if n.get() == 1 { "" } else { "s" }),
        }
    }
}

impl From<u16> for LoopCount {
    fn from(n: u16) -> Self {
        match NonZeroU16::new(n) {
            None => LoopCount::Forever,
            Some(n) => LoopCount::Times(n),
        }
    }
}

/// Decoder configuration. Reusable across requests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodeConfig {
    /// Resource limits checked before any pixel buffer is allocated.
    pub limits: Limits,
}

impl DecodeConfig {
    /// Replace the limits.
    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

/// Decoding request that borrows configuration and input data.
///
/// # Example
///
/// ```rust,no_run
/// use webp_core::{DecodeConfig, DecodeRequest};
///
/// let config = DecodeConfig::default();
/// let webp_data: &[u8] = &[]; // your WebP data
/// let (pixels, w, h) = DecodeRequest::new(&config, webp_data).decode_rgba()?;
/// # Ok::<(), webp_core::DecodeError>(())
/// ```
pub struct DecodeRequest<'a> {
    config: &'a DecodeConfig,
    data: &'a [u8],
    stop: Option<&'a dyn Stop>,
}

impl<'a> DecodeRequest<'a> {
    /// Create a new decoding request.
    #[must_use]
    pub fn new(config: &'a DecodeConfig, data: &'a [u8]) -> Self {
        Self {
            config,
            data,
            stop: None,
        }
    }

    /// Set a cooperative cancellation token.
    #[must_use]
    pub fn stop(mut self, stop: &'a dyn Stop) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Decode to RGBA pixels. Animations yield their first composited frame.
    pub fn decode_rgba(self) -> Result<(Vec<u8>, u32, u32), DecodeError> {
        let mut decoder = WebPDecoder::new_with_config(self.data, self.config)?;
        decoder.set_stop(self.stop);
        let (w, h) = decoder.dimensions();
        let mut buf = vec![0u8; decoder.output_buffer_size()];
        decoder.read_image(&mut buf)?;
        Ok((buf, w, h))
    }

    /// Read image info without decoding pixel data.
    pub fn info(self) -> Result<ImageInfo, DecodeError> {
        let decoder = WebPDecoder::new_with_config(self.data, self.config)?;
        Ok(ImageInfo::from_decoder(&decoder))
    }
}

enum ImageKind {
    Lossy,
    Lossless,
    Extended(WebPExtendedInfo),
}

#[derive(Default)]
struct AnimationState {
    next_frame: usize,
    dispose_previous: bool,
    previous_rect: Option<FrameRect>,
    canvas: Option<Vec<u8>>,
}

/// WebP image format decoder.
///
/// Parses the container eagerly on construction; pixel decoding happens in
/// [`read_image`](Self::read_image) and [`read_frame`](Self::read_frame).
pub struct WebPDecoder<'a> {
    r: SliceReader<'a>,
    limits: Limits,

    width: u32,
    height: u32,

    kind: ImageKind,
    animation: AnimationState,

    is_lossy: bool,
    has_alpha: bool,
    loop_count: LoopCount,
    loop_duration: u64,

    chunks: HashMap<WebPRiffChunk, Range<u64>>,
    frames: Vec<Range<u64>>,

    stop: Option<&'a dyn Stop>,
}

impl<'a> WebPDecoder<'a> {
    /// Create a new `WebPDecoder` from the data slice with default limits.
    pub fn new(data: &'a [u8]) -> Result<Self, DecodeError> {
        Self::new_with_config(data, &DecodeConfig::default())
    }

    /// Create a new `WebPDecoder` with the given configuration.
    pub fn new_with_config(data: &'a [u8], config: &DecodeConfig) -> Result<Self, DecodeError> {
        config.limits.check_file_size(data.len() as u64)?;
        let mut decoder = Self {
            r: SliceReader::new(data),
            limits: config.limits.clone(),
            width: 0,
            height: 0,
            kind: ImageKind::Lossy,
            animation: AnimationState::default(),
            is_lossy: false,
            has_alpha: false,
            loop_count: LoopCount::from(1),
            loop_duration: 0,
            chunks: HashMap::new(),
            frames: Vec::new(),
            stop: None,
        };
        decoder.read_data()?;

        decoder.limits.check_dimensions(decoder.width, decoder.height)?;
        if decoder.is_animated() {
            decoder
                .limits
                .check_frame_count(decoder.frames.len() as u64)?;
            decoder
                .limits
                .check_animation_duration(decoder.loop_duration)?;
        }
        Ok(decoder)
    }

    fn read_data(&mut self) -> Result<(), DecodeError> {
        let (riff, riff_size, _) = read_chunk_header(&mut self.r)?;
        if riff != WebPRiffChunk::RIFF {
            return Err(DecodeError::RiffSignatureInvalid(riff.to_fourcc()));
        }

        match read_fourcc(&mut self.r)? {
            WebPRiffChunk::WEBP => {}
            fourcc => return Err(DecodeError::WebpSignatureInvalid(fourcc.to_fourcc())),
        }

        let (chunk, chunk_size, chunk_size_rounded) = read_chunk_header(&mut self.r)?;
        let start = self.r.position();
        let range = start..start + chunk_size;

        match chunk {
            WebPRiffChunk::VP8 => {
                let (w, h) = vp8::read_dimensions(self.slice(&range)?)?;
                self.width = u32::from(w);
                self.height = u32::from(h);
                self.chunks.insert(WebPRiffChunk::VP8, range);
                self.kind = ImageKind::Lossy;
                self.is_lossy = true;
            }
            WebPRiffChunk::VP8L => {
                let header = lossless::read_header(self.slice(&range)?)?;
                self.width = u32::from(header.width);
                self.height = u32::from(header.height);
                self.has_alpha = header.alpha_hint;
                self.chunks.insert(WebPRiffChunk::VP8L, range);
                self.kind = ImageKind::Lossless;
            }
            WebPRiffChunk::VP8X => {
                if chunk_size < 10 {
                    return Err(DecodeError::InvalidChunkSize);
                }
                let mut info = extended::read_extended_header(&mut self.r)?;
                self.width = info.canvas_width;
                self.height = info.canvas_height;
                // Before indexing, so a huge canvas fails on the budget alone.
                self.limits.check_dimensions(self.width, self.height)?;
                if u64::from(self.width) * u64::from(self.height) > u64::from(u32::MAX) {
                    return Err(DecodeError::InconsistentImageSizes);
                }

                self.index_chunks(start + chunk_size_rounded, riff_size)?;
                self.is_lossy = self.is_lossy || self.chunks.contains_key(&WebPRiffChunk::VP8);

                // ICCP without the flag (and the reverse) is common enough to allow
                if info.animation
                    && (!self.chunks.contains_key(&WebPRiffChunk::ANIM) || self.frames.is_empty())
                    || info.exif_metadata && !self.chunks.contains_key(&WebPRiffChunk::EXIF)
                    || info.xmp_metadata && !self.chunks.contains_key(&WebPRiffChunk::XMP)
                    || !info.animation
                        && self.chunks.contains_key(&WebPRiffChunk::VP8)
                            == self.chunks.contains_key(&WebPRiffChunk::VP8L)
                {
                    return Err(DecodeError::ChunkMissing);
                }

                if info.animation {
                    let anim = self.chunk_data(WebPRiffChunk::ANIM)?.unwrap_or_default();
                    if anim.len() < 6 {
                        return Err(DecodeError::InvalidChunkSize);
                    }
                    info.background_color_hint.copy_from_slice(&anim[..4]);
                    self.loop_count = LoopCount::from(u16::from_le_bytes([anim[4], anim[5]]));
                }

                self.has_alpha = info.alpha;
                self.kind = ImageKind::Extended(info);
            }
            _ => return Err(DecodeError::ChunkHeaderInvalid(chunk.to_fourcc())),
        };

        Ok(())
    }

    /// Records the position of every chunk after VP8X, and of every ANMF frame.
    fn index_chunks(&mut self, mut position: u64, riff_size: u64) -> Result<(), DecodeError> {
        let max_position = (8 + riff_size).min(self.r.get_ref().len() as u64);
        while position + 8 <= max_position {
            self.r.seek_from_start(position)?;
            let (chunk, chunk_size, chunk_size_rounded) = match read_chunk_header(&mut self.r) {
                Ok(header) => header,
                Err(DecodeError::Truncated) => break,
                Err(e) => return Err(e),
            };
            let range = position + 8..position + 8 + chunk_size;
            position += 8 + chunk_size_rounded;

            if chunk == WebPRiffChunk::ANMF {
                if chunk_size < 24 {
                    return Err(DecodeError::InvalidChunkSize);
                }
                let payload = self.slice(&range)?;
                let duration = u32::from_le_bytes([payload[12], payload[13], payload[14], 0]);
                self.loop_duration += u64::from(duration);
                // lossless frames never carry ALPH
                if matches!(&payload[16..20], b"VP8 " | b"ALPH") {
                    self.is_lossy = true;
                }
                self.frames.push(range.clone());
            }

            if !chunk.is_unknown() {
                self.chunks.entry(chunk).or_insert(range);
            }
        }
        log::debug!(
            "indexed {} chunk kinds, {} animation frames",
            self.chunks.len(),
            self.frames.len()
        );
        Ok(())
    }

    fn slice(&self, range: &Range<u64>) -> Result<&'a [u8], DecodeError> {
        let data = self.r.get_ref();
        let start = usize::try_from(range.start).map_err(|_| DecodeError::Truncated)?;
        let end = usize::try_from(range.end).map_err(|_| DecodeError::Truncated)?;
        data.get(start..end).ok_or(DecodeError::Truncated)
    }

    fn chunk_data(&self, chunk: WebPRiffChunk) -> Result<Option<&'a [u8]>, DecodeError> {
        match self.chunks.get(&chunk) {
            Some(range) => self.slice(range).map(Some),
            None => Ok(None),
        }
    }

    /// Set a cooperative cancellation token for decoding.
    pub fn set_stop(&mut self, stop: Option<&'a dyn Stop>) {
        self.stop = stop;
    }

    /// Get the background color stored in the ANIM chunk (BGRA order), if animated.
    pub fn background_color_hint(&self) -> Option<[u8; 4]> {
        match &self.kind {
            ImageKind::Extended(info) if info.animation => Some(info.background_color_hint),
            _ => None,
        }
    }

    /// Overrides the RGBA color used for the initial canvas and disposed frames.
    pub fn set_background_color(&mut self, color: [u8; 4]) -> Result<(), DecodeError> {
        match &mut self.kind {
            ImageKind::Extended(info) if info.animation => {
                info.background_color = Some(color);
                Ok(())
            }
            _ => Err(DecodeError::InvalidParameter(String::from(
                "background color can only be set on an animated WebP",
            ))),
        }
    }

    /// Returns the (width, height) of the image (the canvas, if animated).
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Returns whether the image declares an alpha channel.
    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// Returns true if the image is animated.
    pub fn is_animated(&self) -> bool {
        match &self.kind {
            ImageKind::Lossy | ImageKind::Lossless => false,
            ImageKind::Extended(extended) => extended.animation,
        }
    }

    /// Returns whether the image is lossy. For animated images, this is true if any frame is lossy.
    pub fn is_lossy(&self) -> bool {
        self.is_lossy
    }

    /// Number of animation frames, or zero if the image is not animated.
    pub fn num_frames(&self) -> u32 {
        self.frames.len() as u32
    }

    /// Returns the number of times the animation should loop.
    pub fn loop_count(&self) -> LoopCount {
        self.loop_count
    }

    /// Sum of all frame durations in milliseconds, or zero if the image is not animated.
    pub fn loop_duration(&self) -> u64 {
        self.loop_duration
    }

    /// Returns the raw bytes of the ICC profile, if any.
    pub fn icc_profile(&self) -> Result<Option<Vec<u8>>, DecodeError> {
        Ok(self.chunk_data(WebPRiffChunk::ICCP)?.map(<[u8]>::to_vec))
    }

    /// Returns the raw bytes of the EXIF metadata, if any.
    pub fn exif_metadata(&self) -> Result<Option<Vec<u8>>, DecodeError> {
        Ok(self.chunk_data(WebPRiffChunk::EXIF)?.map(<[u8]>::to_vec))
    }

    /// Returns the raw bytes of the XMP metadata, if any.
    pub fn xmp_metadata(&self) -> Result<Option<Vec<u8>>, DecodeError> {
        Ok(self.chunk_data(WebPRiffChunk::XMP)?.map(<[u8]>::to_vec))
    }

    /// Bytes required for one RGBA image or canvas.
    pub fn output_buffer_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    fn check_buffer(&self, buf: &[u8]) -> Result<(), DecodeError> {
        if buf.len() != self.output_buffer_size() {
            return Err(DecodeError::InvalidParameter(format!(
                "output buffer is {} bytes, need {}",
                buf.len(),
                self.output_buffer_size()
            )));
        }
        Ok(())
    }

    fn stop_token(&self) -> &'a dyn Stop {
        self.stop.unwrap_or(&Unstoppable)
    }

    /// Decodes the image as RGBA. For animated images, this is the first composited frame.
    pub fn read_image(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        self.check_buffer(buf)?;

        if self.is_animated() {
            let saved = core::mem::take(&mut self.animation);
            let result = self.read_frame(buf);
            self.animation = saved;
            return result.map(|_| ());
        }

        let (chunk, is_lossless) = match self.chunks.get(&WebPRiffChunk::VP8L) {
            Some(_) => (WebPRiffChunk::VP8L, true),
            None => (WebPRiffChunk::VP8, false),
        };
        let bitstream = self.chunk_data(chunk)?.ok_or(DecodeError::ChunkMissing)?;
        let alpha = if is_lossless {
            None
        } else {
            self.chunk_data(WebPRiffChunk::ALPH)?
        };

        decode_frame_into(
            bitstream,
            is_lossless,
            alpha,
            self.width,
            self.height,
            self.stop_token(),
            buf,
        )
    }

    /// Decodes the next animation frame and writes the composited canvas into `buf`.
    ///
    /// Returns the frame duration in milliseconds, or `None` once every frame
    /// has been read.
    pub fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<u32>, DecodeError> {
        let ImageKind::Extended(info) = &self.kind else {
            return Err(DecodeError::InvalidParameter(String::from(
                "not an animated WebP",
            )));
        };
        if !info.animation {
            return Err(DecodeError::InvalidParameter(String::from(
                "not an animated WebP",
            )));
        }
        self.check_buffer(buf)?;

        let Some(frame) = self.decode_raw_frame(self.animation.next_frame)? else {
            return Ok(None);
        };
        let rect = frame.rect;

        let background = info.background_rgba();
        let canvas = self.animation.canvas.get_or_insert_with(|| {
            let mut canvas = vec![0u8; self.width as usize * self.height as usize * 4];
            for pixel in canvas.chunks_exact_mut(4) {
                pixel.copy_from_slice(&background);
            }
            canvas
        });

        if self.animation.dispose_previous {
            if let Some(previous) = self.animation.previous_rect {
                extended::clear_rect(canvas, self.width, previous, background);
            }
        }
        extended::composite_frame(canvas, self.width, &frame.rgba, rect, frame.blend);
        buf.copy_from_slice(canvas);

        log::trace!(
            "frame {}: {}x{} at ({}, {}) blend={} dispose={} {}ms",
            self.animation.next_frame,
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            frame.blend,
            frame.dispose,
            frame.duration_ms
        );

        self.animation.previous_rect = Some(rect);
        self.animation.dispose_previous = frame.dispose;
        self.animation.next_frame += 1;

        Ok(Some(frame.duration_ms))
    }

    /// Decodes animation frame `index` on its own, without compositing.
    pub(crate) fn decode_raw_frame(&self, index: usize) -> Result<Option<RawFrame>, DecodeError> {
        let Some(range) = self.frames.get(index).cloned() else {
            return Ok(None);
        };
        let stop = self.stop_token();
        stop.check()?;

        let frame = parse_anmf(self.slice(&range)?)?;
        let rect = frame.rect;
        self.limits.check_frame_dimensions(rect.width, rect.height)?;
        if rect.x + rect.width > self.width || rect.y + rect.height > self.height {
            return Err(DecodeError::FrameOutsideImage);
        }

        let mut rgba = vec![0u8; rect.width as usize * rect.height as usize * 4];
        decode_frame_into(
            frame.bitstream,
            frame.is_lossless,
            frame.alpha,
            rect.width,
            rect.height,
            stop,
            &mut rgba,
        )?;
        Ok(Some(RawFrame {
            rect,
            duration_ms: frame.duration_ms,
            blend: frame.blend,
            dispose: frame.dispose,
            is_lossless: frame.is_lossless,
            rgba,
        }))
    }

    /// Resets the animation to the first frame.
    pub fn reset_animation(&mut self) -> Result<(), DecodeError> {
        if !self.is_animated() {
            return Err(DecodeError::InvalidParameter(String::from(
                "not an animated WebP",
            )));
        }
        self.animation = AnimationState::default();
        Ok(())
    }
}

/// One animation frame decoded to its own rectangle.
pub(crate) struct RawFrame {
    pub(crate) rect: FrameRect,
    pub(crate) duration_ms: u32,
    pub(crate) blend: bool,
    pub(crate) dispose: bool,
    pub(crate) is_lossless: bool,
    pub(crate) rgba: Vec<u8>,
}

/// The fields and sub-chunks of one ANMF payload.
pub(crate) struct AnmfFrame<'a> {
    pub(crate) rect: FrameRect,
    pub(crate) duration_ms: u32,
    pub(crate) blend: bool,
    pub(crate) dispose: bool,
    pub(crate) is_lossless: bool,
    pub(crate) bitstream: &'a [u8],
    pub(crate) alpha: Option<&'a [u8]>,
}

pub(crate) fn parse_anmf(payload: &[u8]) -> Result<AnmfFrame<'_>, DecodeError> {
    let mut r = SliceReader::new(payload);
    let x = r.read_u24_le()? * 2;
    let y = r.read_u24_le()? * 2;
    let width = r.read_u24_le()? + 1;
    let height = r.read_u24_le()? + 1;
    let duration_ms = r.read_u24_le()?;
    let flags = r.read_u8()?;
    let blend = flags & 0b10 == 0;
    let dispose = flags & 0b01 != 0;

    let (first, first_size, first_size_rounded) = read_chunk_header(&mut r)?;
    let (chunk, size, alpha) = if first == WebPRiffChunk::ALPH {
        let alpha = r.take_slice(first_size as usize)?;
        r.seek_relative((first_size_rounded - first_size) as i64)?;
        let (chunk, size, _) = read_chunk_header(&mut r)?;
        if chunk != WebPRiffChunk::VP8 {
            return Err(DecodeError::ChunkHeaderInvalid(chunk.to_fourcc()));
        }
        (chunk, size, Some(alpha))
    } else {
        (first, first_size, None)
    };

    let is_lossless = match chunk {
        WebPRiffChunk::VP8 => false,
        WebPRiffChunk::VP8L => true,
        _ => return Err(DecodeError::ChunkHeaderInvalid(chunk.to_fourcc())),
    };
    let bitstream = r.take_slice(size as usize)?;

    Ok(AnmfFrame {
        rect: FrameRect {
            x,
            y,
            width,
            height,
        },
        duration_ms,
        blend,
        dispose,
        is_lossless,
        bitstream,
        alpha,
    })
}

/// Decodes one VP8 or VP8L bitstream (plus optional ALPH payload) into an
/// RGBA buffer of exactly `width * height * 4` bytes.
pub(crate) fn decode_frame_into(
    bitstream: &[u8],
    is_lossless: bool,
    alpha: Option<&[u8]>,
    width: u32,
    height: u32,
    stop: &dyn Stop,
    buf: &mut [u8],
) -> Result<(), DecodeError> {
    // Checked against the limit-approved size before any plane is allocated.
    let (declared_width, declared_height) = if is_lossless {
        let header = lossless::read_header(bitstream)?;
        (header.width, header.height)
    } else {
        vp8::read_dimensions(bitstream)?
    };
    if u32::from(declared_width) != width || u32::from(declared_height) != height {
        return Err(DecodeError::InconsistentImageSizes);
    }

    if is_lossless {
        let (_, argb) = LosslessDecoder::new(bitstream, stop).decode_frame()?;
        lossless::argb_to_rgba(&argb, buf);
        return Ok(());
    }

    let frame = Vp8Decoder::decode_frame(bitstream, stop)?;
    frame.fill_rgba(buf);

    if let Some(alpha) = alpha {
        let alpha = extended::read_alpha_chunk(alpha, frame.width, frame.height, stop)?;
        extended::apply_alpha(buf, &alpha.data);
    }
    Ok(())
}

/// Decode WebP data to RGBA pixels.
///
/// Animated files yield their first composited frame.
///
/// # Example
///
/// ```rust,no_run
/// let webp_data: &[u8] = &[]; // your WebP data
/// let (pixels, width, height) = webp_core::decode_rgba32(webp_data)?;
/// # Ok::<(), webp_core::DecodeError>(())
/// ```
pub fn decode_rgba32(data: &[u8]) -> Result<(Vec<u8>, u32, u32), DecodeError> {
    DecodeRequest::new(&DecodeConfig::default(), data).decode_rgba()
}

/// Read dimensions and format without decoding pixels.
pub fn read_info(data: &[u8]) -> Result<ImageInfo, DecodeError> {
    ImageInfo::from_webp(data)
}

/// Quick signature test: `RIFF....WEBP`.
pub fn is_webp(data: &[u8]) -> bool {
    data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP"
}

/// Image information obtained from WebP data header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Whether the image has an alpha channel.
    pub has_alpha: bool,
    /// Whether the image uses lossy compression.
    pub is_lossy: bool,
    /// Whether the image is animated.
    pub has_animation: bool,
    /// Number of frames (1 for static images).
    pub frame_count: u32,
    /// Bitstream format (lossy or lossless).
    pub format: BitstreamFormat,
}

impl ImageInfo {
    /// Parse image information from WebP data.
    pub fn from_webp(data: &[u8]) -> Result<Self, DecodeError> {
        let decoder = WebPDecoder::new(data)?;
        Ok(Self::from_decoder(&decoder))
    }

    fn from_decoder(decoder: &WebPDecoder<'_>) -> Self {
        let (width, height) = decoder.dimensions();
        let is_lossy = decoder.is_lossy();
        let has_animation = decoder.is_animated();
        Self {
            width,
            height,
            has_alpha: decoder.has_alpha(),
            is_lossy,
            has_animation,
            frame_count: if has_animation { decoder.num_frames() } else { 1 },
            format: if is_lossy {
                BitstreamFormat::Lossy
            } else {
                BitstreamFormat::Lossless
            },
        }
    }
}

/// Bitstream compression format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum BitstreamFormat {
    /// Lossy compression (VP8).
    #[default]
    Lossy,
    /// Lossless compression (VP8L).
    Lossless,
}

impl core::fmt::Display for BitstreamFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BitstreamFormat::Lossy => f.write_str("lossy"),
            BitstreamFormat::Lossless => f.write_str("lossless"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // $ convert -size 2x2 xc:#f00 red.webp
    const RED_2X2: [u8; 68] = [
        0x52, 0x49, 0x46, 0x46, 0x3c, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50, 0x56, 0x50,
        0x38, 0x20, 0x30, 0x00, 0x00, 0x00, 0xd0, 0x01, 0x00, 0x9d, 0x01, 0x2a, 0x02, 0x00,
        0x02, 0x00, 0x02, 0x00, 0x34, 0x25, 0xa0, 0x02, 0x74, 0xba, 0x01, 0xf8, 0x00, 0x03,
        0xb0, 0x00, 0xfe, 0xf0, 0xc4, 0x0b, 0xff, 0x20, 0xb9, 0x61, 0x75, 0xc8, 0xd7, 0xff,
        0x20, 0x3f, 0xe4, 0x07, 0xfc, 0x80, 0xff, 0xf8, 0xf2, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn add_with_overflow_size() {
        let bytes = vec![
            0x52, 0x49, 0x46, 0x46, 0xaf, 0x37, 0x80, 0x47, 0x57, 0x45, 0x42, 0x50, 0x6c, 0x64,
            0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xfb, 0x7e, 0x73, 0x00, 0x06, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x65, 0x65, 0x65, 0x65, 0x65, 0x65,
            0x40, 0xfb, 0xff, 0xff, 0x65, 0x65, 0x65, 0x65, 0x65, 0x65, 0x65, 0x65, 0x65, 0x65,
            0x00, 0x00, 0x00, 0x00, 0x62, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x49,
            0x49, 0x54, 0x55, 0x50, 0x4c, 0x54, 0x59, 0x50, 0x45, 0x33, 0x37, 0x44, 0x4d, 0x46,
        ];

        assert!(WebPDecoder::new(&bytes).is_err());
    }

    #[test]
    fn decode_2x2_single_color_image() {
        let (data, w, h) = decode_rgba32(&RED_2X2).unwrap();
        assert_eq!((w, h), (2, 2));

        let first_pixel = &data[..4];
        assert!(data.chunks_exact(4).all(|ch| ch == first_pixel));
        assert!(first_pixel[0] > 200 && first_pixel[1] < 60 && first_pixel[2] < 60);
        assert_eq!(first_pixel[3], 255);
    }

    #[test]
    fn decode_3x3_single_color_image() {
        // odd dimensions exercise the partial macroblock and chroma tail
        let mut bytes = RED_2X2;
        bytes[26] = 3;
        bytes[28] = 3;

        let (data, w, h) = decode_rgba32(&bytes).unwrap();
        assert_eq!((w, h), (3, 3));
        let first_pixel = &data[..4];
        assert!(data.chunks_exact(4).all(|ch| ch == first_pixel));
    }

    #[test]
    fn info_without_decoding() {
        let info = read_info(&RED_2X2).unwrap();
        assert_eq!(info.width, 2);
        assert_eq!(info.format, BitstreamFormat::Lossy);
        assert!(!info.has_alpha && !info.has_animation);
        assert_eq!(info.frame_count, 1);
        assert!(is_webp(&RED_2X2));
        assert!(!is_webp(&RED_2X2[..11]));
    }

    #[test]
    fn signature_errors() {
        let mut bytes = RED_2X2;
        bytes[0] = b'X';
        assert!(matches!(
            decode_rgba32(&bytes),
            Err(DecodeError::RiffSignatureInvalid(_))
        ));

        let mut bytes = RED_2X2;
        bytes[8] = b'X';
        let err = decode_rgba32(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::WebpSignatureInvalid(_)));
        assert_eq!(err.kind(), ErrorKind::Format);

        let mut bytes = RED_2X2;
        bytes[23] = 0;
        assert!(matches!(
            decode_rgba32(&bytes),
            Err(DecodeError::Vp8MagicInvalid(_))
        ));
    }

    #[test]
    fn truncated_chunk_is_reported() {
        let err = decode_rgba32(&RED_2X2[..40]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncated);
    }

    #[test]
    fn limits_apply_before_decoding() {
        let config = DecodeConfig::default().limits(Limits::none().max_dimensions(1, 1));
        let err = DecodeRequest::new(&config, &RED_2X2)
            .decode_rgba()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LimitExceeded);

        let config = DecodeConfig::default().limits(Limits::none().max_file_size(10));
        assert!(matches!(
            DecodeRequest::new(&config, &RED_2X2).info(),
            Err(DecodeError::LimitExceeded(_))
        ));
    }

    #[test]
    fn cancelled_decode() {
        struct AlwaysStop;
        impl Stop for AlwaysStop {
            fn check(&self) -> Result<(), StopReason> {
                Err(StopReason::Cancelled)
            }
        }
        let config = DecodeConfig::default();
        let err = DecodeRequest::new(&config, &RED_2X2)
            .stop(&AlwaysStop)
            .decode_rgba()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    /// VP8X with a 1x1 canvas wrapping one image chunk.
    fn tiny_canvas_with(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&(4 + 18 + 8 + payload.len() as u32).to_le_bytes());
        data.extend_from_slice(b"WEBPVP8X");
        data.extend_from_slice(&10u32.to_le_bytes());
        data.extend_from_slice(&[0; 10]);
        data.extend_from_slice(fourcc);
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn bitstream_larger_than_canvas_is_rejected_early() {
        // 16384x16384 VP8L header, no transforms and no color cache
        let mut lossless = vec![0x2f, 0xff, 0xff, 0xff, 0x0f];
        lossless.extend_from_slice(&[0; 15]);
        let data = tiny_canvas_with(b"VP8L", &lossless);
        let config = DecodeConfig::default().limits(Limits::none().max_total_pixels(100));
        assert!(matches!(
            DecodeRequest::new(&config, &data).decode_rgba(),
            Err(DecodeError::InconsistentImageSizes)
        ));

        // 16383x16383 key frame
        let mut lossy = vec![0x50, 0x01, 0x00, 0x9d, 0x01, 0x2a, 0xff, 0x3f, 0xff, 0x3f];
        lossy.extend_from_slice(&[0; 16]);
        let data = tiny_canvas_with(b"VP8 ", &lossy);
        assert!(matches!(
            DecodeRequest::new(&config, &data).decode_rgba(),
            Err(DecodeError::InconsistentImageSizes)
        ));
    }

    #[test]
    fn loop_count_from_anim_field() {
        assert_eq!(LoopCount::from(0), LoopCount::Forever);
        assert_eq!(LoopCount::from(3).to_u16(), 3);
        assert_eq!(alloc::format!("{}", LoopCount::from(1)), "1 time");
    }
}
