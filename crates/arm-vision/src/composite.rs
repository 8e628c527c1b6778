//! Mask overlay compositing.
//!
//! Compositing is pure: the input frame is never mutated, and any shape
//! mismatch yields an unmodified copy of the input. Re-applying a mask to an
//! already composited frame darkens it further; callers always blend onto the
//! original camera frame.

use crate::error::VisionResult;
use crate::mask::{decode_mask, MaskBuffer};
use arm_core::limits::{MASK_MAX_OPACITY, RGBA_CHANNELS};
use arm_core::ArmError;
use tracing::warn;

/// Row-major 8-bit RGBA pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// `width * height * 4` bytes.
    pub data: Vec<u8>,
}

impl RgbaFrame {
    /// Wrap a buffer without checking its length.
    #[must_use]
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// `width * height`, or `None` on overflow.
    #[must_use]
    pub fn pixel_count(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }

    /// Verify the buffer length against the declared dimensions.
    pub fn check_shape(&self) -> Result<usize, ArmError> {
        let pixels = self.pixel_count().ok_or(ArmError::SizeOverflow {
            context: "frame pixel count",
        })?;
        let expected = pixels
            .checked_mul(RGBA_CHANNELS)
            .ok_or(ArmError::SizeOverflow {
                context: "frame byte size",
            })?;
        if self.data.len() != expected {
            return Err(ArmError::DataShape {
                context: "frame",
                expected,
                actual: self.data.len(),
            });
        }
        Ok(pixels)
    }
}

/// Decode `compressed_mask` and blend it onto `frame` at the default opacity.
///
/// Never fails: undecodable masks and shape mismatches are logged and the
/// frame comes back unchanged.
#[must_use]
pub fn composite(frame: &RgbaFrame, compressed_mask: &str) -> RgbaFrame {
    match try_composite(frame, compressed_mask, MASK_MAX_OPACITY) {
        Ok(out) => out,
        Err(err) => {
            warn!(error = %err, "Skipping mask overlay");
            frame.clone()
        }
    }
}

/// Fallible variant of [`composite`] with an explicit opacity.
pub fn try_composite(
    frame: &RgbaFrame,
    compressed_mask: &str,
    max_opacity: f64,
) -> VisionResult<RgbaFrame> {
    let mask = decode_mask(compressed_mask)?;
    Ok(blend(frame, &mask, max_opacity))
}

/// Blend a decoded mask onto a frame as a green tint.
///
/// For each pixel, `fg = mask / 255 * max_opacity` and `bg = 1 - fg`. Red and
/// blue are scaled by `bg`, green becomes `G * bg + 255 * fg`, alpha is kept.
/// Results are floored.
#[must_use]
pub fn blend(frame: &RgbaFrame, mask: &MaskBuffer, max_opacity: f64) -> RgbaFrame {
    let pixels = match frame.check_shape() {
        Ok(pixels) => pixels,
        Err(err) => {
            warn!(error = %err, width = frame.width, height = frame.height, "Frame shape mismatch, overlay skipped");
            return frame.clone();
        }
    };
    if mask.len() != pixels {
        let err = ArmError::DataShape {
            context: "mask",
            expected: pixels,
            actual: mask.len(),
        };
        warn!(error = %err, "Mask shape mismatch, overlay skipped");
        return frame.clone();
    }

    let mut out = frame.data.clone();
    for (px, &m) in out.chunks_exact_mut(RGBA_CHANNELS).zip(mask.values()) {
        let fg = m / 255.0 * max_opacity;
        let bg = 1.0 - fg;
        px[0] = channel(f64::from(px[0]) * bg);
        px[1] = channel(f64::from(px[1]) * bg + 255.0 * fg);
        px[2] = channel(f64::from(px[2]) * bg);
    }
    RgbaFrame::new(frame.width, frame.height, out)
}

// Float to u8 casts saturate and map NaN to 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn channel(value: f64) -> u8 {
    value.floor() as u8
}
