//! Errors raised while decoding masks and frames.

use arm_core::ArmError;
use thiserror::Error;

/// Result alias for this crate.
pub type VisionResult<T> = std::result::Result<T, VisionError>;

/// Failure to turn an encoded mask or image into pixels.
#[derive(Error, Debug)]
pub enum VisionError {
    /// Mask text is not valid base64.
    #[error("Mask is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Neither zlib nor raw DEFLATE could inflate the payload.
    #[error("Mask decompression failed: {0}")]
    Inflate(#[source] std::io::Error),

    /// Inflated payload is not UTF-8.
    #[error("Mask payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Inflated payload is not a JSON numeric array.
    #[error("Mask payload is not a numeric array: {0}")]
    Parse(#[from] serde_json::Error),

    /// JPEG/PNG codec failure.
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// Buffer sizes do not line up.
    #[error(transparent)]
    Shape(#[from] ArmError),
}
