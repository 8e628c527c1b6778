//! Image side of the arm supervision client.
//!
//! Masks arrive from the segmentation service as base64 text wrapping a
//! DEFLATE-compressed JSON array of per-pixel intensities. This crate decodes
//! them and blends them onto RGBA camera frames as a green tint.

pub mod codec;
pub mod composite;
pub mod error;
pub mod mask;

pub use composite::{blend, composite, RgbaFrame};
pub use error::{VisionError, VisionResult};
pub use mask::{decode_mask, MaskBuffer};
