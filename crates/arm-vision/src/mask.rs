//! Compressed mask decoding.

use crate::error::{VisionError, VisionResult};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;
use tracing::trace;

/// Per-pixel mask intensities, nominally in `0..=255`, row-major.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaskBuffer {
    values: Vec<f64>,
}

impl MaskBuffer {
    /// Wrap already decoded values.
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the mask has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw values.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl From<Vec<f64>> for MaskBuffer {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

/// Decode a mask as returned by the segmentation service.
///
/// The text is base64; the decoded bytes are zlib-wrapped DEFLATE, with raw
/// DEFLATE accepted as a fallback. The inflated payload is a UTF-8 JSON array
/// of numbers.
pub fn decode_mask(encoded: &str) -> VisionResult<MaskBuffer> {
    let compressed = BASE64_STANDARD.decode(encoded.trim())?;
    let inflated = inflate(&compressed)?;
    let text = String::from_utf8(inflated)?;
    let values: Vec<f64> = serde_json::from_str(&text)?;
    trace!(len = values.len(), "Decoded mask");
    Ok(MaskBuffer::new(values))
}

fn inflate(compressed: &[u8]) -> VisionResult<Vec<u8>> {
    let mut out = Vec::new();
    match ZlibDecoder::new(compressed).read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(zlib_err) => {
            trace!(error = %zlib_err, "zlib inflate failed, trying raw DEFLATE");
            out.clear();
            DeflateDecoder::new(compressed)
                .read_to_end(&mut out)
                .map_err(VisionError::Inflate)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    pub(crate) fn encode_zlib(values: &[f64]) -> String {
        let json = serde_json::to_string(values).unwrap();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        BASE64_STANDARD.encode(encoder.finish().unwrap())
    }

    #[test]
    fn decodes_zlib_payload() {
        let mask = decode_mask(&encode_zlib(&[0.0, 127.0, 255.0])).unwrap();
        assert_eq!(mask.values(), &[0.0, 127.0, 255.0]);
    }

    #[test]
    fn decodes_raw_deflate_payload() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(b"[1,2,3]").unwrap();
        let encoded = BASE64_STANDARD.encode(encoder.finish().unwrap());
        assert_eq!(decode_mask(&encoded).unwrap().len(), 3);
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(matches!(decode_mask("@@@"), Err(VisionError::Base64(_))));
    }

    #[test]
    fn rejects_non_numeric_payload() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"not": "an array"}"#).unwrap();
        let encoded = BASE64_STANDARD.encode(encoder.finish().unwrap());
        assert!(matches!(decode_mask(&encoded), Err(VisionError::Parse(_))));
    }
}
