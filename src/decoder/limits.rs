//! Resource limits for decoding untrusted WebP data.
//!
//! Every check runs against header-declared values, before the buffer those
//! values size is allocated.

use alloc::format;

use super::api::DecodeError;

/// Decode budget.
///
/// All limits are optional; `None` means unlimited.
///
/// # Example
///
/// ```rust
/// use webp_core::Limits;
///
/// let limits = Limits::default()
///     .max_dimensions(4096, 4096)
///     .max_total_pixels(10_000_000);
///
/// // trusted input only
/// let unlimited = Limits::none();
/// # let _ = (limits, unlimited);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Limits {
    /// Maximum canvas width in pixels.
    pub max_width: Option<u32>,

    /// Maximum canvas height in pixels.
    pub max_height: Option<u32>,

    /// Maximum canvas area (width * height).
    pub max_total_pixels: Option<u64>,

    /// Maximum number of animation frames.
    pub max_frame_count: Option<u64>,

    /// Maximum input size in bytes.
    pub max_file_size: Option<u64>,

    /// Maximum size of a single decoded buffer in bytes.
    pub max_memory: Option<u64>,

    /// Maximum area of a single animation frame.
    pub max_frame_pixels: Option<u64>,

    /// Maximum summed duration of all animation frames.
    pub max_animation_duration_ms: Option<u64>,

    /// Maximum bytes held at once by calls that return every frame.
    pub max_animation_memory: Option<u64>,
}

impl Default for Limits {
    /// Limits suitable for server-side use.
    ///
    /// - 16384 x 16384 canvas (the VP8/VP8L maximum)
    /// - 100 megapixels per canvas and per frame
    /// - 10,000 frames, one hour of animation
    /// - 100 MB input, 1 GB per buffer, 4 GB for a whole decoded animation
    fn default() -> Self {
        Self {
            max_width: Some(16384),
            max_height: Some(16384),
            max_total_pixels: Some(100_000_000),
            max_frame_count: Some(10_000),
            max_file_size: Some(100 * 1024 * 1024),
            max_memory: Some(1024 * 1024 * 1024),
            max_frame_pixels: Some(100_000_000),
            max_animation_duration_ms: Some(60 * 60 * 1000),
            max_animation_memory: Some(4 * 1024 * 1024 * 1024),
        }
    }
}

impl Limits {
    /// No restrictions at all. Only for trusted inputs.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_width: None,
            max_height: None,
            max_total_pixels: None,
            max_frame_count: None,
            max_file_size: None,
            max_memory: None,
            max_frame_pixels: None,
            max_animation_duration_ms: None,
            max_animation_memory: None,
        }
    }

    /// Set maximum dimensions.
    #[must_use]
    pub fn max_dimensions(mut self, width: u32, height: u32) -> Self {
        self.max_width = Some(width);
        self.max_height = Some(height);
        self
    }

    /// Set maximum total pixels.
    #[must_use]
    pub fn max_total_pixels(mut self, pixels: u64) -> Self {
        self.max_total_pixels = Some(pixels);
        self
    }

    /// Set maximum frame count.
    #[must_use]
    pub fn max_frame_count(mut self, count: u64) -> Self {
        self.max_frame_count = Some(count);
        self
    }

    /// Set maximum input size in bytes.
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Set maximum size of one decoded buffer in bytes.
    #[must_use]
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Set maximum pixels of one animation frame.
    #[must_use]
    pub fn max_frame_pixels(mut self, pixels: u64) -> Self {
        self.max_frame_pixels = Some(pixels);
        self
    }

    /// Set maximum total animation duration.
    #[must_use]
    pub fn max_animation_duration_ms(mut self, ms: u64) -> Self {
        self.max_animation_duration_ms = Some(ms);
        self
    }

    /// Set maximum memory for all frames of a decoded animation.
    #[must_use]
    pub fn max_animation_memory(mut self, bytes: u64) -> Self {
        self.max_animation_memory = Some(bytes);
        self
    }

    /// Checks canvas dimensions and the RGBA buffer they imply.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), DecodeError> {
        if let Some(max_w) = self.max_width {
            if width > max_w {
                return Err(DecodeError::LimitExceeded(format!(
                    "width {width} exceeds limit {max_w}"
                )));
            }
        }
        if let Some(max_h) = self.max_height {
            if height > max_h {
                return Err(DecodeError::LimitExceeded(format!(
                    "height {height} exceeds limit {max_h}"
                )));
            }
        }

        let total_pixels = u64::from(width) * u64::from(height);
        if let Some(max_pixels) = self.max_total_pixels {
            if total_pixels > max_pixels {
                return Err(DecodeError::LimitExceeded(format!(
                    "total pixels {total_pixels} exceeds limit {max_pixels}"
                )));
            }
        }
        self.check_memory(total_pixels.saturating_mul(4))
    }

    /// Checks the area of one animation frame.
    pub fn check_frame_dimensions(&self, width: u32, height: u32) -> Result<(), DecodeError> {
        let pixels = u64::from(width) * u64::from(height);
        if let Some(max) = self.max_frame_pixels {
            if pixels > max {
                return Err(DecodeError::LimitExceeded(format!(
                    "frame pixels {pixels} exceed limit {max}"
                )));
            }
        }
        self.check_memory(pixels.saturating_mul(4))
    }

    /// Checks the number of animation frames.
    pub fn check_frame_count(&self, count: u64) -> Result<(), DecodeError> {
        if let Some(max) = self.max_frame_count {
            if count > max {
                return Err(DecodeError::LimitExceeded(format!(
                    "frame count {count} exceeds limit {max}"
                )));
            }
        }
        Ok(())
    }

    /// Checks the summed animation duration.
    pub fn check_animation_duration(&self, duration_ms: u64) -> Result<(), DecodeError> {
        if let Some(max) = self.max_animation_duration_ms {
            if duration_ms > max {
                return Err(DecodeError::LimitExceeded(format!(
                    "animation duration {duration_ms}ms exceeds limit {max}ms"
                )));
            }
        }
        Ok(())
    }

    /// Checks the input size.
    pub fn check_file_size(&self, size: u64) -> Result<(), DecodeError> {
        if let Some(max) = self.max_file_size {
            if size > max {
                return Err(DecodeError::LimitExceeded(format!(
                    "file size {size} bytes exceeds limit {max} bytes"
                )));
            }
        }
        Ok(())
    }

    /// Checks `frames` buffers of `frame_bytes` each, all held at once.
    pub fn check_animation_memory(&self, frames: u64, frame_bytes: u64) -> Result<(), DecodeError> {
        let total = frames.saturating_mul(frame_bytes);
        if let Some(max) = self.max_animation_memory {
            if total > max {
                return Err(DecodeError::LimitExceeded(format!(
                    "{frames} frames of {frame_bytes} bytes exceed animation memory limit {max}"
                )));
            }
        }
        Ok(())
    }

    /// Checks the size of one buffer.
    pub fn check_memory(&self, bytes: u64) -> Result<(), DecodeError> {
        if let Some(max) = self.max_memory {
            if bytes > max {
                return Err(DecodeError::LimitExceeded(format!(
                    "buffer of {bytes} bytes exceeds memory limit {max}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::ErrorKind;

    #[test]
    fn default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_width, Some(16384));
        assert!(limits.max_frame_pixels.is_some());
    }

    #[test]
    fn check_dimensions_ok() {
        let limits = Limits::default().max_dimensions(1000, 1000);
        assert!(limits.check_dimensions(500, 500).is_ok());
        assert!(limits.check_dimensions(1000, 1000).is_ok());
    }

    #[test]
    fn check_dimensions_too_large() {
        let limits = Limits::default().max_dimensions(1000, 1000);
        let err = limits.check_dimensions(1001, 500).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LimitExceeded);
    }

    #[test]
    fn check_total_pixels() {
        let limits = Limits::none().max_total_pixels(10_000_000);
        assert!(limits.check_dimensions(1000, 1000).is_ok());
        assert!(matches!(
            limits.check_dimensions(100_000, 100_000),
            Err(DecodeError::LimitExceeded(_))
        ));
    }

    #[test]
    fn memory_limit_covers_rgba_buffer() {
        let limits = Limits::none().max_memory(4 * 100);
        assert!(limits.check_dimensions(10, 10).is_ok());
        assert!(limits.check_dimensions(10, 11).is_err());
    }

    #[test]
    fn animation_budgets() {
        let limits = Limits::none()
            .max_frame_count(3)
            .max_frame_pixels(64)
            .max_animation_duration_ms(1000);
        assert!(limits.check_frame_count(3).is_ok());
        assert!(limits.check_frame_count(4).is_err());
        assert!(limits.check_frame_dimensions(8, 8).is_ok());
        assert!(limits.check_frame_dimensions(8, 9).is_err());
        assert!(limits.check_animation_duration(1001).is_err());
    }

    #[test]
    fn animation_memory_is_summed_over_frames() {
        let limits = Limits::none().max_animation_memory(1000);
        assert!(limits.check_animation_memory(10, 100).is_ok());
        assert!(limits.check_animation_memory(11, 100).is_err());
        assert!(limits.check_animation_memory(u64::MAX, u64::MAX).is_err());
        assert!(Limits::default().check_animation_memory(10_000, 400_000_000).is_err());
    }

    #[test]
    fn no_limits() {
        let limits = Limits::none();
        assert!(limits.check_dimensions(u32::MAX, u32::MAX).is_ok());
        assert!(limits.check_frame_count(u64::MAX).is_ok());
        assert!(limits.check_file_size(u64::MAX).is_ok());
    }
}
