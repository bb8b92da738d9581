//! Extended file format pieces: the VP8X header, ALPH chunks and canvas
//! compositing for animations.

use alloc::vec::Vec;

use enough::Stop;

use super::api::DecodeError;
use super::lossless::LosslessDecoder;
use crate::slice_reader::SliceReader;

/// Contents of the VP8X chunk plus the ANIM background once read.
#[derive(Debug, Clone)]
pub(crate) struct WebPExtendedInfo {
    pub(crate) alpha: bool,
    pub(crate) canvas_width: u32,
    pub(crate) canvas_height: u32,
    pub(crate) icc_profile: bool,
    pub(crate) exif_metadata: bool,
    pub(crate) xmp_metadata: bool,
    pub(crate) animation: bool,
    /// ANIM background in file (BGRA) order.
    pub(crate) background_color_hint: [u8; 4],
    /// Caller override, RGBA.
    pub(crate) background_color: Option<[u8; 4]>,
}

impl WebPExtendedInfo {
    /// The color disposed rectangles and the initial canvas are filled with, RGBA.
    pub(crate) fn background_rgba(&self) -> [u8; 4] {
        self.background_color.unwrap_or_else(|| {
            let [b, g, r, a] = self.background_color_hint;
            [r, g, b, a]
        })
    }
}

/// Reads the 10-byte VP8X payload.
pub(crate) fn read_extended_header(r: &mut SliceReader<'_>) -> Result<WebPExtendedInfo, DecodeError> {
    let flags = r.read_u8()?;

    let icc_profile = flags & 0b0010_0000 != 0;
    let alpha = flags & 0b0001_0000 != 0;
    let exif_metadata = flags & 0b0000_1000 != 0;
    let xmp_metadata = flags & 0b0000_0100 != 0;
    let animation = flags & 0b0000_0010 != 0;

    // reserved
    r.seek_relative(3)?;

    let canvas_width = read_3_bytes(r)? + 1;
    let canvas_height = read_3_bytes(r)? + 1;

    log::debug!(
        "VP8X canvas {canvas_width}x{canvas_height} alpha={alpha} animation={animation} \
         icc={icc_profile} exif={exif_metadata} xmp={xmp_metadata}"
    );

    Ok(WebPExtendedInfo {
        alpha,
        canvas_width,
        canvas_height,
        icc_profile,
        exif_metadata,
        xmp_metadata,
        animation,
        background_color_hint: [0; 4],
        background_color: None,
    })
}

pub(crate) fn read_3_bytes(r: &mut SliceReader<'_>) -> Result<u32, DecodeError> {
    r.read_u24_le()
}

/// Spatial predictor applied to the alpha plane before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilteringMethod {
    None,
    Horizontal,
    Vertical,
    Gradient,
}

impl FilteringMethod {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::None,
            1 => Self::Horizontal,
            2 => Self::Vertical,
            _ => Self::Gradient,
        }
    }
}

#[derive(Debug)]
pub(crate) struct AlphaChunk {
    /// Level reduction was applied by the encoder; informational only.
    pub(crate) _preprocessing: bool,
    pub(crate) filtering_method: FilteringMethod,
    /// Unfiltered alpha plane, `width * height` bytes.
    pub(crate) data: Vec<u8>,
}

/// Parses and fully reconstructs an ALPH payload.
pub(crate) fn read_alpha_chunk(
    data: &[u8],
    width: u16,
    height: u16,
    stop: &dyn Stop,
) -> Result<AlphaChunk, DecodeError> {
    let (&info, payload) = data.split_first().ok_or(DecodeError::Truncated)?;

    let preprocessing = (info >> 4) & 0b11;
    let filtering_method = FilteringMethod::from_bits(info >> 2);
    let compression = info & 0b11;

    let preprocessing = match preprocessing {
        0 => false,
        1 => true,
        _ => return Err(DecodeError::InvalidAlphaPreprocessing),
    };

    let pixels = usize::from(width) * usize::from(height);
    let mut plane = match compression {
        0 => {
            if payload.len() < pixels {
                return Err(DecodeError::AlphaChunkSizeMismatch);
            }
            payload[..pixels].to_vec()
        }
        1 => {
            let argb = LosslessDecoder::new(payload, stop).decode_implicit(width, height)?;
            argb.iter().map(|&p| (p >> 8) as u8).collect()
        }
        _ => return Err(DecodeError::InvalidCompressionMethod),
    };

    unfilter_alpha(
        &mut plane,
        usize::from(width),
        usize::from(height),
        filtering_method,
    );

    Ok(AlphaChunk {
        _preprocessing: preprocessing,
        filtering_method,
        data: plane,
    })
}

/// Undoes the ALPH spatial filter in place.
fn unfilter_alpha(plane: &mut [u8], width: usize, height: usize, method: FilteringMethod) {
    if method == FilteringMethod::None {
        return;
    }

    // the first row is always predicted from the left
    for x in 1..width {
        plane[x] = plane[x].wrapping_add(plane[x - 1]);
    }

    for y in 1..height {
        let row = y * width;
        let above = row - width;
        plane[row] = plane[row].wrapping_add(plane[above]);
        for x in 1..width {
            let predictor = match method {
                FilteringMethod::Horizontal => plane[row + x - 1],
                FilteringMethod::Vertical => plane[above + x],
                FilteringMethod::Gradient => {
                    let left = i16::from(plane[row + x - 1]);
                    let top = i16::from(plane[above + x]);
                    let top_left = i16::from(plane[above + x - 1]);
                    (left + top - top_left).clamp(0, 255) as u8
                }
                FilteringMethod::None => 0,
            };
            plane[row + x] = plane[row + x].wrapping_add(predictor);
        }
    }
}

/// Writes an alpha plane into the fourth channel of an RGBA buffer.
pub(crate) fn apply_alpha(rgba: &mut [u8], alpha: &[u8]) {
    for (pixel, &a) in rgba.chunks_exact_mut(4).zip(alpha) {
        pixel[3] = a;
    }
}

/// Non-premultiplied "src over dst" for one channel set.
fn blend_pixel(src: [u8; 4], dst: [u8; 4]) -> [u8; 4] {
    let src_a = u32::from(src[3]);
    if src_a == 255 {
        return src;
    }
    if src_a == 0 {
        return dst;
    }

    let dst_factor = u32::from(dst[3]) * (255 - src_a) / 255;
    let out_a = src_a + dst_factor;
    if out_a == 0 {
        return [0; 4];
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let value = (u32::from(src[c]) * src_a + u32::from(dst[c]) * dst_factor) / out_a;
        out[c] = value as u8;
    }
    out[3] = out_a as u8;
    out
}

/// Placement of one frame on the canvas.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameRect {
    pub(crate) x: u32,
    pub(crate) y: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// Fills `rect` of the canvas with `color`.
pub(crate) fn clear_rect(canvas: &mut [u8], canvas_width: u32, rect: FrameRect, color: [u8; 4]) {
    let stride = canvas_width as usize * 4;
    for y in rect.y..rect.y + rect.height {
        let start = y as usize * stride + rect.x as usize * 4;
        let row = &mut canvas[start..start + rect.width as usize * 4];
        for pixel in row.chunks_exact_mut(4) {
            pixel.copy_from_slice(&color);
        }
    }
}

/// Draws an RGBA frame onto the canvas, alpha blending when `blend` is set.
pub(crate) fn composite_frame(
    canvas: &mut [u8],
    canvas_width: u32,
    frame: &[u8],
    rect: FrameRect,
    blend: bool,
) {
    let stride = canvas_width as usize * 4;
    let frame_stride = rect.width as usize * 4;
    for (row_index, src_row) in frame.chunks_exact(frame_stride).enumerate() {
        let y = rect.y as usize + row_index;
        let start = y * stride + rect.x as usize * 4;
        let dst_row = &mut canvas[start..start + frame_stride];

        if !blend {
            dst_row.copy_from_slice(src_row);
            continue;
        }
        for (dst, src) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
            let blended = blend_pixel(
                [src[0], src[1], src[2], src[3]],
                [dst[0], dst[1], dst[2], dst[3]],
            );
            dst.copy_from_slice(&blended);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enough::Unstoppable;

    #[test]
    fn vp8x_fields() {
        let payload = [0b0011_0010, 0, 0, 0, 99, 0, 0, 49, 0, 0];
        let mut r = SliceReader::new(&payload);
        let info = read_extended_header(&mut r).unwrap();
        assert!(info.animation && info.alpha && info.icc_profile);
        assert!(!info.exif_metadata && !info.xmp_metadata);
        assert_eq!((info.canvas_width, info.canvas_height), (100, 50));
    }

    #[test]
    fn raw_alpha_with_filters() {
        // 3x2 plane; residuals chosen so every filter reconstructs [10,20,30 / 40,50,60]
        let plane = [10u8, 20, 30, 40, 50, 60];

        let mut chunk = alloc::vec![0u8];
        chunk.extend_from_slice(&plane);
        assert_eq!(read_alpha_chunk(&chunk, 3, 2, &Unstoppable).unwrap().data, plane);

        // horizontal: first column from above, the rest from the left
        let chunk = [1 << 2, 10, 10, 10, 30, 10, 10];
        assert_eq!(read_alpha_chunk(&chunk, 3, 2, &Unstoppable).unwrap().data, plane);

        // vertical
        let chunk = [2 << 2, 10, 10, 10, 30, 30, 30];
        assert_eq!(read_alpha_chunk(&chunk, 3, 2, &Unstoppable).unwrap().data, plane);

        // gradient: left + top - top_left is exact on this ramp
        let chunk = [3 << 2, 10, 10, 10, 30, 0, 0];
        assert_eq!(read_alpha_chunk(&chunk, 3, 2, &Unstoppable).unwrap().data, plane);
    }

    #[test]
    fn alpha_header_errors() {
        assert!(matches!(
            read_alpha_chunk(&[0, 1, 2], 2, 2, &Unstoppable),
            Err(DecodeError::AlphaChunkSizeMismatch)
        ));
        assert!(matches!(
            read_alpha_chunk(&[2, 0, 0, 0, 0], 2, 2, &Unstoppable),
            Err(DecodeError::InvalidCompressionMethod)
        ));
        assert!(matches!(
            read_alpha_chunk(&[0b10_0000, 0, 0, 0, 0], 2, 2, &Unstoppable),
            Err(DecodeError::InvalidAlphaPreprocessing)
        ));
        assert!(matches!(
            read_alpha_chunk(&[], 2, 2, &Unstoppable),
            Err(DecodeError::Truncated)
        ));
    }

    #[test]
    fn blending() {
        let red = [255, 0, 0, 255];
        assert_eq!(blend_pixel([0, 0, 255, 0], red), red);
        assert_eq!(blend_pixel([0, 0, 255, 255], red), [0, 0, 255, 255]);
        assert_eq!(blend_pixel([0, 0, 255, 128], [0, 0, 0, 0]), [0, 0, 255, 128]);

        let half = blend_pixel([0, 0, 255, 128], red);
        assert_eq!(half[3], 255);
        assert!(half[0] > 100 && half[2] > 100);
    }

    #[test]
    fn composite_and_clear() {
        let mut canvas = alloc::vec![0u8; 4 * 4 * 4];
        let frame = [9u8; 2 * 2 * 4];
        let rect = FrameRect {
            x: 2,
            y: 2,
            width: 2,
            height: 2,
        };
        composite_frame(&mut canvas, 4, &frame, rect, false);
        assert_eq!(&canvas[(2 * 4 + 2) * 4..(2 * 4 + 4) * 4], &[9u8; 8]);
        assert_eq!(&canvas[..4], &[0, 0, 0, 0]);

        clear_rect(&mut canvas, 4, rect, [1, 2, 3, 4]);
        assert_eq!(&canvas[(3 * 4 + 3) * 4..], &[1, 2, 3, 4]);
    }

    #[test]
    fn background_is_stored_bgra() {
        let mut payload = [0u8; 10];
        payload[0] = 0b10;
        let mut info = read_extended_header(&mut SliceReader::new(&payload)).unwrap();
        info.background_color_hint = [1, 2, 3, 4];
        assert_eq!(info.background_rgba(), [3, 2, 1, 4]);
        info.background_color = Some([9, 9, 9, 9]);
        assert_eq!(info.background_rgba(), [9, 9, 9, 9]);
    }
}
