//! Zero-copy WebP demuxer.
//!
//! Parses a WebP file at the chunk level, exposing frame placement and raw
//! bitstream data without decoding pixels.
//!
//! # Example
//!
//! ```rust,no_run
//! use webp_core::mux::WebPDemuxer;
//!
//! let data: &[u8] = &[]; // your WebP data
//! let demuxer = WebPDemuxer::new(data)?;
//! println!("{}x{}, {} frame(s)", demuxer.canvas_width(), demuxer.canvas_height(), demuxer.num_frames());
//!
//! for frame in demuxer.frames() {
//!     let frame = frame?;
//!     println!("  frame {}: {}x{} at ({},{}) duration={}ms",
//!         frame.frame_num, frame.width, frame.height,
//!         frame.x_offset, frame.y_offset, frame.duration_ms);
//! }
//! # Ok::<(), webp_core::mux::MuxError>(())
//! ```

use alloc::format;
use alloc::vec::Vec;
use core::ops::Range;

use super::error::MuxError;
use crate::decoder::extended::read_extended_header;
use crate::decoder::{lossless, parse_anmf, read_chunk_header, vp8, LoopCount, WebPRiffChunk};
use crate::slice_reader::SliceReader;

/// How the frame area is disposed after rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeMethod {
    /// The frame stays on the canvas.
    None,
    /// The frame rectangle is filled with the background color before the next frame.
    Background,
}

/// How the frame is combined with the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMethod {
    /// Alpha blend over the existing canvas content.
    AlphaBlend,
    /// Replace the canvas region with the frame.
    Overwrite,
}

/// One frame as stored in the file.
///
/// `bitstream` holds the raw VP8 or VP8L data without chunk framing. Lossy
/// frames with transparency carry their `ALPH` payload in `alpha_data`.
#[derive(Debug, Clone)]
pub struct DemuxFrame<'a> {
    /// 1-based frame number.
    pub frame_num: u32,
    /// Always even.
    pub x_offset: u32,
    /// Always even.
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u32,
    pub dispose: DisposeMethod,
    pub blend: BlendMethod,
    /// Whether the frame uses VP8. `false` means VP8L.
    pub is_lossy: bool,
    pub bitstream: &'a [u8],
    pub alpha_data: Option<&'a [u8]>,
}

/// Still-image bitstream location.
#[derive(Debug, Clone)]
struct StillImage {
    is_lossless: bool,
    bitstream: Range<usize>,
    alpha: Option<Range<usize>>,
}

/// Zero-copy WebP demuxer.
pub struct WebPDemuxer<'a> {
    data: &'a [u8],
    canvas_width: u32,
    canvas_height: u32,
    loop_count: LoopCount,
    background_color: [u8; 4],
    has_alpha: bool,
    is_animated: bool,
    frames: Vec<Range<usize>>,
    still: Option<StillImage>,
    icc: Option<Range<usize>>,
    exif: Option<Range<usize>>,
    xmp: Option<Range<usize>>,
}

impl<'a> WebPDemuxer<'a> {
    /// Parses the container structure and records byte ranges. No pixel
    /// decoding is performed.
    pub fn new(data: &'a [u8]) -> Result<Self, MuxError> {
        if data.len() < 12 {
            return Err(MuxError::InvalidFormat("file too small".into()));
        }
        let mut r = SliceReader::new(data);

        let (riff, riff_size, _) = read_chunk_header(&mut r)?;
        if riff != WebPRiffChunk::RIFF {
            return Err(MuxError::InvalidFormat("missing RIFF signature".into()));
        }
        let mut webp = [0u8; 4];
        r.read_exact(&mut webp)?;
        if &webp != b"WEBP" {
            return Err(MuxError::InvalidFormat("missing WEBP signature".into()));
        }

        let mut demuxer = Self {
            data,
            canvas_width: 0,
            canvas_height: 0,
            loop_count: LoopCount::from(1),
            background_color: [0; 4],
            has_alpha: false,
            is_animated: false,
            frames: Vec::new(),
            still: None,
            icc: None,
            exif: None,
            xmp: None,
        };

        let (chunk, size, rounded) = read_chunk_header(&mut r)?;
        let start = r.position() as usize;
        let payload = r.take_slice(size as usize)?;
        let range = start..start + size as usize;

        match chunk {
            WebPRiffChunk::VP8 => {
                let (w, h) = vp8::read_dimensions(payload)?;
                demuxer.canvas_width = u32::from(w);
                demuxer.canvas_height = u32::from(h);
                demuxer.still = Some(StillImage {
                    is_lossless: false,
                    bitstream: range,
                    alpha: None,
                });
            }
            WebPRiffChunk::VP8L => {
                let header = lossless::read_header(payload)?;
                demuxer.canvas_width = u32::from(header.width);
                demuxer.canvas_height = u32::from(header.height);
                demuxer.has_alpha = header.alpha_hint;
                demuxer.still = Some(StillImage {
                    is_lossless: true,
                    bitstream: range,
                    alpha: None,
                });
            }
            WebPRiffChunk::VP8X => {
                let info = read_extended_header(&mut SliceReader::new(payload))?;
                demuxer.canvas_width = info.canvas_width;
                demuxer.canvas_height = info.canvas_height;
                demuxer.has_alpha = info.alpha;
                demuxer.is_animated = info.animation;
                let end = (8 + riff_size as usize).min(data.len());
                demuxer.index_chunks(start + rounded as usize, end)?;
            }
            other => {
                return Err(MuxError::InvalidFormat(format!(
                    "unexpected first chunk {:?}",
                    other.to_fourcc()
                )))
            }
        }
        Ok(demuxer)
    }

    /// Records the chunks following `VP8X`, stopping at the first truncated one.
    fn index_chunks(&mut self, mut position: usize, end: usize) -> Result<(), MuxError> {
        let mut alpha = None;
        while position + 8 <= end {
            let mut r = SliceReader::new(&self.data[..end]);
            r.seek_from_start(position as u64)?;
            let (chunk, size, rounded) = read_chunk_header(&mut r)?;
            let start = position + 8;
            if start + size as usize > end {
                break;
            }
            let range = start..start + size as usize;
            position = start + rounded as usize;

            match chunk {
                WebPRiffChunk::ICCP => self.icc = self.icc.take().or(Some(range)),
                WebPRiffChunk::EXIF => self.exif = self.exif.take().or(Some(range)),
                WebPRiffChunk::XMP => self.xmp = self.xmp.take().or(Some(range)),
                WebPRiffChunk::ANIM if self.is_animated => {
                    let anim = &self.data[range];
                    if anim.len() < 6 {
                        return Err(MuxError::InvalidFormat("ANIM chunk too small".into()));
                    }
                    self.background_color.copy_from_slice(&anim[..4]);
                    self.loop_count = LoopCount::from(u16::from_le_bytes([anim[4], anim[5]]));
                }
                WebPRiffChunk::ANMF if self.is_animated => self.frames.push(range),
                WebPRiffChunk::ALPH if !self.is_animated => alpha = Some(range),
                WebPRiffChunk::VP8 | WebPRiffChunk::VP8L
                    if !self.is_animated && self.still.is_none() =>
                {
                    let is_lossless = chunk == WebPRiffChunk::VP8L;
                    self.still = Some(StillImage {
                        is_lossless,
                        bitstream: range,
                        alpha: if is_lossless { None } else { alpha.take() },
                    });
                }
                _ => {}
            }
        }

        if self.is_animated && self.frames.is_empty() || !self.is_animated && self.still.is_none()
        {
            return Err(MuxError::InvalidFormat("no image data".into()));
        }
        log::debug!(
            "demuxed {}x{} canvas, {} frame(s)",
            self.canvas_width,
            self.canvas_height,
            self.num_frames()
        );
        Ok(())
    }

    pub fn canvas_width(&self) -> u32 {
        self.canvas_width
    }

    pub fn canvas_height(&self) -> u32 {
        self.canvas_height
    }

    /// Number of frames. Still images have one.
    pub fn num_frames(&self) -> u32 {
        if self.is_animated {
            self.frames.len() as u32
        } else {
            1
        }
    }

    pub fn loop_count(&self) -> LoopCount {
        self.loop_count
    }

    /// ANIM background color in file (BGRA) order.
    pub fn background_color(&self) -> [u8; 4] {
        self.background_color
    }

    pub fn is_animated(&self) -> bool {
        self.is_animated
    }

    /// Whether the `VP8X` alpha flag (or VP8L alpha hint) is set.
    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// Frame `n`, counted from 1. `None` when out of range.
    pub fn frame(&self, n: u32) -> Option<Result<DemuxFrame<'a>, MuxError>> {
        let index = n.checked_sub(1)? as usize;
        if !self.is_animated {
            let still = self.still.as_ref().filter(|_| index == 0)?;
            return Some(Ok(DemuxFrame {
                frame_num: 1,
                x_offset: 0,
                y_offset: 0,
                width: self.canvas_width,
                height: self.canvas_height,
                duration_ms: 0,
                dispose: DisposeMethod::None,
                blend: BlendMethod::Overwrite,
                is_lossy: !still.is_lossless,
                bitstream: &self.data[still.bitstream.clone()],
                alpha_data: still.alpha.clone().map(|range| &self.data[range]),
            }));
        }

        let range = self.frames.get(index)?.clone();
        Some(parse_anmf(&self.data[range]).map_err(MuxError::from).map(|anmf| DemuxFrame {
            frame_num: n,
            x_offset: anmf.rect.x,
            y_offset: anmf.rect.y,
            width: anmf.rect.width,
            height: anmf.rect.height,
            duration_ms: anmf.duration_ms,
            dispose: if anmf.dispose {
                DisposeMethod::Background
            } else {
                DisposeMethod::None
            },
            blend: if anmf.blend {
                BlendMethod::AlphaBlend
            } else {
                BlendMethod::Overwrite
            },
            is_lossy: !anmf.is_lossless,
            bitstream: anmf.bitstream,
            alpha_data: anmf.alpha,
        }))
    }

    /// Iterates over all frames in file order.
    pub fn frames(&self) -> DemuxFrameIter<'a, '_> {
        DemuxFrameIter {
            demuxer: self,
            current: 1,
        }
    }

    pub fn icc_profile(&self) -> Option<&'a [u8]> {
        self.icc.clone().map(|range| &self.data[range])
    }

    pub fn exif(&self) -> Option<&'a [u8]> {
        self.exif.clone().map(|range| &self.data[range])
    }

    pub fn xmp(&self) -> Option<&'a [u8]> {
        self.xmp.clone().map(|range| &self.data[range])
    }
}

/// Iterator over demuxed frames.
pub struct DemuxFrameIter<'a, 'b> {
    demuxer: &'b WebPDemuxer<'a>,
    current: u32,
}

impl<'a> Iterator for DemuxFrameIter<'a, '_> {
    type Item = Result<DemuxFrame<'a>, MuxError>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.demuxer.frame(self.current)?;
        self.current += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.demuxer.num_frames() + 1).saturating_sub(self.current) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DemuxFrameIter<'_, '_> {}
