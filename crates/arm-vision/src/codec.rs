//! JPEG decoding and PNG encoding of camera frames.

use crate::composite::RgbaFrame;
use crate::error::VisionResult;
use arm_core::limits::{validate_frame_size, RGBA_CHANNELS};
use arm_core::ArmError;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

/// Decode a JPEG camera frame to RGBA.
pub fn decode_jpeg(jpeg: &[u8]) -> VisionResult<RgbaFrame> {
    let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgba8();
    let (width, height) = image.dimensions();
    validate_frame_size(width, height, RGBA_CHANNELS)?;
    Ok(RgbaFrame::new(width, height, image.into_raw()))
}

/// Decode a base64-encoded JPEG, as stored in frame records.
pub fn decode_jpeg_base64(encoded: &str) -> VisionResult<RgbaFrame> {
    let jpeg = BASE64_STANDARD.decode(encoded.trim())?;
    decode_jpeg(&jpeg)
}

/// Encode an RGBA frame as PNG.
pub fn encode_png(frame: &RgbaFrame) -> VisionResult<Vec<u8>> {
    frame.check_shape()?;
    let image = RgbaImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
        ArmError::DataShape {
            context: "png frame",
            expected: frame.pixel_count().unwrap_or(0) * RGBA_CHANNELS,
            actual: frame.data.len(),
        },
    )?;
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageBuffer, Rgb};

    fn tiny_jpeg() -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(4, 3, |_, _| Rgb([120, 60, 30]));
        let mut buf = Vec::new();
        JpegEncoder::new(&mut buf).encode_image(&img).unwrap();
        buf
    }

    #[test]
    fn jpeg_decodes_to_rgba() {
        let frame = decode_jpeg(&tiny_jpeg()).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.data.len(), 4 * 3 * 4);
        assert!(frame.data.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn base64_jpeg_decodes() {
        let encoded = BASE64_STANDARD.encode(tiny_jpeg());
        assert_eq!(decode_jpeg_base64(&encoded).unwrap().width, 4);
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(
            decode_jpeg(b"definitely not a jpeg"),
            Err(crate::VisionError::Image(_))
        ));
    }

    #[test]
    fn png_has_signature() {
        let frame = RgbaFrame::new(2, 2, vec![255; 16]);
        let png = encode_png(&frame).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn png_rejects_bad_shape() {
        let frame = RgbaFrame::new(2, 2, vec![255; 3]);
        assert!(matches!(
            encode_png(&frame),
            Err(crate::VisionError::Shape(ArmError::DataShape { .. }))
        ));
    }
}
