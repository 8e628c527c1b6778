//! Shared constants and hard limits.
//!
//! This module centralizes:
//! - Timer intervals for the heartbeat and reconnect logic
//! - Capacity of the bounded frame history
//! - Overlay blend constants and frame size ceilings

use crate::error::ArmError;
use std::time::Duration;

// =============================================================================
// Timing
// =============================================================================

/// Interval between heartbeat probes (2 seconds).
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Timeout applied to one-shot HTTP collaborator calls (15 seconds).
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

// =============================================================================
// Frames
// =============================================================================

/// Number of records kept by the frame history.
pub const FRAME_HISTORY_CAPACITY: usize = 8;

/// Upper bound accepted for a configured history capacity.
pub const MAX_FRAME_HISTORY_CAPACITY: usize = 256;

/// Bytes per pixel in an RGBA buffer.
pub const RGBA_CHANNELS: usize = 4;

/// Maximum opacity of the mask overlay at full mask intensity.
pub const MASK_MAX_OPACITY: f64 = 0.6;

/// Maximum supported width/height for frames.
pub const MAX_FRAME_DIMENSION: u32 = 16_384;

/// Maximum allowed frame payload in bytes (256MB).
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Maximum size of a single multipart part before the decoder gives up on it.
pub const MAX_PART_BYTES: usize = 16 * 1024 * 1024;

/// Validated frame sizing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    /// `width * height`.
    pub pixels: usize,
    /// `pixels * bytes_per_pixel`.
    pub bytes: usize,
}

/// Validate frame dimensions and calculate pixel/byte sizes safely.
pub fn validate_frame_size(
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Result<FrameSize, ArmError> {
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(ArmError::FrameTooLarge {
            bytes: (width as usize)
                .saturating_mul(height as usize)
                .saturating_mul(bytes_per_pixel),
            max_bytes: MAX_FRAME_BYTES,
        });
    }

    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or(ArmError::SizeOverflow {
            context: "frame pixel count",
        })?;

    let bytes = pixels
        .checked_mul(bytes_per_pixel)
        .ok_or(ArmError::SizeOverflow {
            context: "frame byte size",
        })?;

    if bytes > MAX_FRAME_BYTES {
        return Err(ArmError::FrameTooLarge {
            bytes,
            max_bytes: MAX_FRAME_BYTES,
        });
    }

    Ok(FrameSize { pixels, bytes })
}
