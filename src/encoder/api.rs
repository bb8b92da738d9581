//! Encoding of WebP images.
//!
//! # API
//!
//! ```rust
//! use webp_core::{EncodeRequest, EncoderConfig, Metadata};
//!
//! let config = EncoderConfig::new()
//!     .quality(85.0)
//!     .metadata(Metadata::new().with_icc(vec![0u8; 16]));
//!
//! let rgba = vec![255u8; 4 * 4 * 4]; // 4x4 RGBA image
//! let webp = EncodeRequest::new(&config, &rgba, 4, 4).encode()?;
//! # Ok::<(), webp_core::EncodeError>(())
//! ```

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use enough::{Stop, StopReason, Unstoppable};
use thiserror::Error;

use super::vec_writer::VecWriter;
use super::vp8::encode_frame as encode_vp8;
use super::vp8l::{encode_alpha_plane, encode_vp8l};

/// Largest width or height a `VP8L` stream can describe.
const MAX_LOSSLESS_DIMENSION: u32 = 16384;
/// Largest width or height a `VP8 ` frame header can describe.
const MAX_LOSSY_DIMENSION: u32 = 16383;

/// Error that can occur during encoding.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// The image dimensions are not allowed by the WebP format.
    #[error("Invalid dimensions")]
    InvalidDimensions,

    /// The input buffer is too small for the given dimensions and stride.
    #[error("Invalid buffer size: {0}")]
    InvalidBufferSize(String),

    /// A configuration value is out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Encoding was cancelled via a [`Stop`].
    #[error("Encoding cancelled: {0}")]
    Cancelled(StopReason),
}

impl From<StopReason> for EncodeError {
    fn from(reason: StopReason) -> Self {
        Self::Cancelled(reason)
    }
}

/// ICC profile, EXIF and XMP payloads carried through the container unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub icc: Option<Vec<u8>>,
    pub exif: Option<Vec<u8>>,
    pub xmp: Option<Vec<u8>>,
}

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_icc(mut self, data: Vec<u8>) -> Self {
        self.icc = Some(data);
        self
    }

    #[must_use]
    pub fn with_exif(mut self, data: Vec<u8>) -> Self {
        self.exif = Some(data);
        self
    }

    #[must_use]
    pub fn with_xmp(mut self, data: Vec<u8>) -> Self {
        self.xmp = Some(data);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.icc.is_none() && self.exif.is_none() && self.xmp.is_none()
    }

    /// `VP8X` flag bits for the chunks present.
    pub(crate) fn vp8x_flags(&self) -> u8 {
        let mut flags = 0;
        if self.icc.is_some() {
            flags |= ICC_FLAG;
        }
        if self.exif.is_some() {
            flags |= EXIF_FLAG;
        }
        if self.xmp.is_some() {
            flags |= XMP_FLAG;
        }
        flags
    }

    /// Size of the metadata chunks once written.
    pub(crate) fn chunks_size(&self) -> u32 {
        [&self.icc, &self.exif, &self.xmp]
            .into_iter()
            .flatten()
            .map(|data| chunk_size(data.len()))
            .sum()
    }
}

pub(crate) const ICC_FLAG: u8 = 1 << 5;
pub(crate) const ALPHA_FLAG: u8 = 1 << 4;
pub(crate) const EXIF_FLAG: u8 = 1 << 3;
pub(crate) const XMP_FLAG: u8 = 1 << 2;
pub(crate) const ANIMATION_FLAG: u8 = 1 << 1;

/// Encoder settings.
#[derive(Clone, Debug)]
pub struct EncoderConfig {
    /// Encode with VP8L instead of VP8. Default: false.
    pub lossless: bool,
    /// Lossy quality, 0.0 (smallest) to 100.0 (best). At 100 the lossless
    /// path is used. Default: 75.0.
    pub quality: f32,
    /// Carry the alpha channel of lossy images in an `ALPH` chunk. When
    /// false, lossy output is opaque. Default: true.
    pub keep_alpha: bool,
    pub metadata: Metadata,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            lossless: false,
            quality: 75.0,
            keep_alpha: true,
            metadata: Metadata::default(),
        }
    }
}

impl EncoderConfig {
    /// Lossy encoding at the default quality.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new_lossless() -> Self {
        Self {
            lossless: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn lossless(mut self, lossless: bool) -> Self {
        self.lossless = lossless;
        self
    }

    #[must_use]
    pub fn quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    #[must_use]
    pub fn keep_alpha(mut self, keep: bool) -> Self {
        self.keep_alpha = keep;
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), EncodeError> {
        if !(0.0..=100.0).contains(&self.quality) {
            return Err(EncodeError::InvalidParameter(format!(
                "quality {} outside 0..=100",
                self.quality
            )));
        }
        Ok(())
    }

    /// Whether pixels go through VP8L.
    pub(crate) fn uses_lossless(&self) -> bool {
        self.lossless || self.quality >= 100.0
    }
}

/// Encoding request that borrows the configuration and pixels.
///
/// # Example
///
/// ```rust
/// use webp_core::{EncodeRequest, EncoderConfig};
///
/// let config = EncoderConfig::new_lossless();
/// // 2x2 image in rows of 12 bytes
/// let rgba = vec![0u8; 12 * 2];
/// let webp = EncodeRequest::new(&config, &rgba, 2, 2).stride(12).encode()?;
/// # Ok::<(), webp_core::EncodeError>(())
/// ```
pub struct EncodeRequest<'a> {
    config: &'a EncoderConfig,
    rgba: &'a [u8],
    width: u32,
    height: u32,
    stride: Option<usize>,
    stop: &'a dyn Stop,
}

impl<'a> EncodeRequest<'a> {
    /// `rgba` holds `height` rows of `width` RGBA pixels.
    #[must_use]
    pub fn new(config: &'a EncoderConfig, rgba: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            config,
            rgba,
            width,
            height,
            stride: None,
            stop: &Unstoppable,
        }
    }

    /// Distance between rows in bytes, at least `width * 4`.
    #[must_use]
    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = Some(stride);
        self
    }

    #[must_use]
    pub fn stop(mut self, stop: &'a dyn Stop) -> Self {
        self.stop = stop;
        self
    }

    /// Encode to WebP bytes.
    pub fn encode(self) -> Result<Vec<u8>, EncodeError> {
        self.config.validate()?;
        let stride = self.stride.unwrap_or(self.width as usize * 4);
        let frame = encode_frame(
            self.rgba,
            self.width,
            self.height,
            stride,
            self.config,
            self.stop,
        )?;
        Ok(assemble_still(&frame, self.width, self.height, &self.config.metadata))
    }

    /// Encode to WebP bytes, appending to an existing Vec.
    pub fn encode_into(self, output: &mut Vec<u8>) -> Result<(), EncodeError> {
        output.extend_from_slice(&self.encode()?);
        Ok(())
    }

    /// Encode to WebP, writing to an [`io::Write`](std::io::Write) implementor.
    #[cfg(feature = "std")]
    pub fn encode_to<W: std::io::Write>(self, mut writer: W) -> std::io::Result<()> {
        let encoded = self
            .encode()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        writer.write_all(&encoded)
    }
}

/// Encodes RGBA rows `stride` bytes apart as a lossless WebP.
pub fn encode_lossless(
    rgba: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    metadata: Option<&Metadata>,
) -> Result<Vec<u8>, EncodeError> {
    let config = EncoderConfig::new_lossless().metadata(metadata.cloned().unwrap_or_default());
    EncodeRequest::new(&config, rgba, width, height)
        .stride(stride)
        .encode()
}

/// Encodes RGBA rows `stride` bytes apart as a lossy WebP. Non-opaque
/// images get an `ALPH` chunk; `quality >= 100` encodes losslessly.
pub fn encode_lossy(
    rgba: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    quality: f32,
    metadata: Option<&Metadata>,
) -> Result<Vec<u8>, EncodeError> {
    let config = EncoderConfig::new()
        .quality(quality)
        .metadata(metadata.cloned().unwrap_or_default());
    EncodeRequest::new(&config, rgba, width, height)
        .stride(stride)
        .encode()
}

/// One encoded image bitstream, before it is wrapped in a container.
pub(crate) struct EncodedFrame {
    /// `VP8 ` or `VP8L`.
    pub(crate) fourcc: [u8; 4],
    pub(crate) data: Vec<u8>,
    /// Payload of the `ALPH` chunk that goes with a lossy frame.
    pub(crate) alpha: Option<Vec<u8>>,
    pub(crate) has_alpha: bool,
}

impl EncodedFrame {
    /// Size of the `ALPH` and image chunks once written.
    pub(crate) fn chunks_size(&self) -> u32 {
        chunk_size(self.data.len()) + self.alpha.as_ref().map_or(0, |a| chunk_size(a.len()))
    }

    pub(crate) fn write_chunks(&self, out: &mut Vec<u8>) {
        if let Some(alpha) = &self.alpha {
            write_chunk(out, b"ALPH", alpha);
        }
        write_chunk(out, &self.fourcc, &self.data);
    }
}

/// Checks dimensions, stride and buffer length for a `width x height` RGBA image.
pub(crate) fn validate_input(
    rgba: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    max_dimension: u32,
) -> Result<(), EncodeError> {
    if width == 0 || height == 0 || width > max_dimension || height > max_dimension {
        return Err(EncodeError::InvalidDimensions);
    }
    let row_bytes = width as usize * 4;
    if stride < row_bytes {
        return Err(EncodeError::InvalidBufferSize(format!(
            "stride {stride} < row size {row_bytes}"
        )));
    }
    let expected = stride * (height as usize - 1) + row_bytes;
    if rgba.len() < expected {
        return Err(EncodeError::InvalidBufferSize(format!(
            "buffer too small: got {}, expected {}",
            rgba.len(),
            expected
        )));
    }
    Ok(())
}

/// Encodes one image with `config`'s codec choice. The alpha plane of a lossy
/// image goes to an `ALPH` payload.
pub(crate) fn encode_frame(
    rgba: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    config: &EncoderConfig,
    stop: &dyn Stop,
) -> Result<EncodedFrame, EncodeError> {
    let has_alpha = rgba
        .chunks(stride)
        .take(height as usize)
        .any(|row| row[..width as usize * 4].chunks_exact(4).any(|p| p[3] != 255));

    if config.uses_lossless() {
        validate_input(rgba, width, height, stride, MAX_LOSSLESS_DIMENSION)?;
        log::debug!("encoding {width}x{height} losslessly");
        return Ok(EncodedFrame {
            fourcc: *b"VP8L",
            data: encode_vp8l(rgba, width, height, stride, stop)?,
            alpha: None,
            has_alpha,
        });
    }

    validate_input(rgba, width, height, stride, MAX_LOSSY_DIMENSION)?;
    log::debug!("encoding {width}x{height} lossy at quality {}", config.quality);
    let data = encode_vp8(rgba, width as u16, height as u16, stride, config.quality, stop)?;

    let alpha = if has_alpha && config.keep_alpha {
        let plane: Vec<u8> = rgba
            .chunks(stride)
            .take(height as usize)
            .flat_map(|row| row[..width as usize * 4].chunks_exact(4).map(|p| p[3]))
            .collect();
        // no preprocessing, no filter, VP8L compression
        let mut payload = Vec::with_capacity(plane.len() / 4 + 1);
        payload.push(0x01);
        payload.extend_from_slice(&encode_alpha_plane(&plane, width, height, stop)?);
        Some(payload)
    } else {
        None
    };

    Ok(EncodedFrame {
        fourcc: *b"VP8 ",
        has_alpha: alpha.is_some(),
        data,
        alpha,
    })
}

/// Size of a chunk with `inner_bytes` of payload: header plus even padding.
pub(crate) const fn chunk_size(inner_bytes: usize) -> u32 {
    (8 + inner_bytes + inner_bytes % 2) as u32
}

pub(crate) fn write_chunk(w: &mut Vec<u8>, name: &[u8; 4], data: &[u8]) {
    w.write_all(name);
    w.write_u32_le(data.len() as u32);
    w.write_all(data);
    if data.len() % 2 == 1 {
        w.push(0);
    }
}

/// Writes a `VP8X` chunk for a canvas of `width x height`.
pub(crate) fn write_vp8x(w: &mut Vec<u8>, flags: u8, width: u32, height: u32) {
    let mut vp8x = Vec::with_capacity(10);
    vp8x.push(flags);
    vp8x.write_all(&[0; 3]);
    vp8x.write_u24_le(width - 1);
    vp8x.write_u24_le(height - 1);
    write_chunk(w, b"VP8X", &vp8x);
}

pub(crate) fn write_metadata_head(w: &mut Vec<u8>, metadata: &Metadata) {
    if let Some(icc) = &metadata.icc {
        write_chunk(w, b"ICCP", icc);
    }
}

pub(crate) fn write_metadata_tail(w: &mut Vec<u8>, metadata: &Metadata) {
    if let Some(exif) = &metadata.exif {
        write_chunk(w, b"EXIF", exif);
    }
    if let Some(xmp) = &metadata.xmp {
        write_chunk(w, b"XMP ", xmp);
    }
}

/// Wraps a still image. The simple container is used unless metadata or an
/// `ALPH` chunk requires `VP8X`.
fn assemble_still(frame: &EncodedFrame, width: u32, height: u32, metadata: &Metadata) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.data.len() + metadata.chunks_size() as usize + 64);
    out.write_all(b"RIFF");

    if metadata.is_empty() && frame.alpha.is_none() {
        out.write_u32_le(4 + frame.chunks_size());
        out.write_all(b"WEBP");
        frame.write_chunks(&mut out);
        return out;
    }

    let mut flags = metadata.vp8x_flags();
    if frame.has_alpha {
        flags |= ALPHA_FLAG;
    }
    out.write_u32_le(4 + chunk_size(10) + metadata.chunks_size() + frame.chunks_size());
    out.write_all(b"WEBP");
    write_vp8x(&mut out, flags, width, height);
    write_metadata_head(&mut out, metadata);
    frame.write_chunks(&mut out);
    write_metadata_tail(&mut out, metadata);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode_rgba32, read_info, BitstreamFormat, WebPDecoder};
    use alloc::vec;
    use rand::RngCore;

    fn gradient(width: u32, height: u32, alpha: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .flat_map(|(x, y)| [(x * 9) as u8, (y * 5) as u8, (x + y) as u8, alpha(x, y)])
            .collect()
    }

    #[test]
    fn random_lossless_roundtrip() {
        let mut img = vec![0; 64 * 48 * 4];
        rand::thread_rng().fill_bytes(&mut img);
        let webp = encode_lossless(&img, 64, 48, 64 * 4, None).unwrap();
        assert_eq!(&webp[12..16], b"VP8L");
        assert_eq!(decode_rgba32(&webp).unwrap(), (img, 64, 48));
    }

    #[test]
    fn riff_size_matches_output() {
        let img = gradient(7, 5, |_, _| 255);
        let webp = encode_lossy(&img, 7, 5, 28, 60.0, None).unwrap();
        let riff_size = u32::from_le_bytes([webp[4], webp[5], webp[6], webp[7]]);
        assert_eq!(riff_size as usize + 8, webp.len());
        assert_eq!(webp.len() % 2, 0);
    }

    #[test]
    fn metadata_uses_extended_container() {
        let img = gradient(5, 3, |_, _| 255);
        let metadata = Metadata::new()
            .with_icc(vec![1, 2, 3])
            .with_exif(vec![4, 5])
            .with_xmp(b"<x/>".to_vec());
        let webp = encode_lossless(&img, 5, 3, 20, Some(&metadata)).unwrap();
        assert_eq!(&webp[12..16], b"VP8X");
        assert_eq!(webp[20], ICC_FLAG | EXIF_FLAG | XMP_FLAG);

        let decoder = WebPDecoder::new(&webp).unwrap();
        assert_eq!(decoder.icc_profile().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(decoder.exif_metadata().unwrap(), Some(vec![4, 5]));
        assert_eq!(decoder.xmp_metadata().unwrap(), Some(b"<x/>".to_vec()));
        assert_eq!(decode_rgba32(&webp).unwrap().0, img);
    }

    #[test]
    fn lossy_alpha_is_lossless() {
        let img = gradient(19, 13, |x, y| ((x * 13 + y * 7) % 256) as u8);
        let webp = encode_lossy(&img, 19, 13, 19 * 4, 80.0, None).unwrap();
        let info = read_info(&webp).unwrap();
        assert!(info.has_alpha);
        assert_eq!(info.format, BitstreamFormat::Lossy);

        let (decoded, width, height) = decode_rgba32(&webp).unwrap();
        assert_eq!((width, height), (19, 13));
        for (out, src) in decoded.chunks_exact(4).zip(img.chunks_exact(4)) {
            assert_eq!(out[3], src[3]);
        }
    }

    #[test]
    fn dropping_alpha_keeps_the_simple_container() {
        let img = gradient(8, 8, |_, _| 10);
        let config = EncoderConfig::new().keep_alpha(false);
        let webp = EncodeRequest::new(&config, &img, 8, 8).encode().unwrap();
        assert_eq!(&webp[12..16], b"VP8 ");
        assert!(decode_rgba32(&webp).unwrap().0.chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn full_quality_switches_to_lossless() {
        let img = gradient(6, 6, |_, _| 255);
        let webp = encode_lossy(&img, 6, 6, 24, 100.0, None).unwrap();
        assert_eq!(read_info(&webp).unwrap().format, BitstreamFormat::Lossless);
        assert_eq!(decode_rgba32(&webp).unwrap().0, img);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let img = vec![0u8; 16];
        assert!(matches!(
            encode_lossless(&img, 0, 4, 0, None),
            Err(EncodeError::InvalidDimensions)
        ));
        assert!(matches!(
            encode_lossless(&img, 2, 2, 4, None),
            Err(EncodeError::InvalidBufferSize(_))
        ));
        assert!(matches!(
            encode_lossless(&img, 2, 3, 8, None),
            Err(EncodeError::InvalidBufferSize(_))
        ));
        assert!(matches!(
            encode_lossy(&img, 2, 2, 8, 101.0, None),
            Err(EncodeError::InvalidParameter(_))
        ));
        assert!(matches!(
            encode_lossy(&img, 16384, 1, 16384 * 4, 50.0, None),
            Err(EncodeError::InvalidDimensions)
        ));
    }

    #[test]
    fn cancellation_is_reported() {
        struct AlwaysStop;
        impl Stop for AlwaysStop {
            fn check(&self) -> Result<(), StopReason> {
                Err(StopReason::Cancelled)
            }
        }
        let img = gradient(16, 16, |_, _| 255);
        for config in [EncoderConfig::new(), EncoderConfig::new_lossless()] {
            let result = EncodeRequest::new(&config, &img, 16, 16).stop(&AlwaysStop).encode();
            assert!(matches!(result, Err(EncodeError::Cancelled(StopReason::Cancelled))));
        }
    }
}
