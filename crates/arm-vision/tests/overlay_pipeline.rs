//! Camera frame to composited PNG, end to end.

use arm_vision::codec::{decode_jpeg, encode_png};
use arm_vision::{composite, RgbaFrame};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};
use std::io::Write;

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_fn(width, height, |x, _| Rgb([(x * 20) as u8, 80, 160]));
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 95)
        .encode_image(&img)
        .unwrap();
    buf
}

fn mask(values: &[u8]) -> String {
    let json = serde_json::to_string(values).unwrap();
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(json.as_bytes()).unwrap();
    BASE64_STANDARD.encode(encoder.finish().unwrap())
}

#[test]
fn jpeg_mask_png_pipeline() {
    let frame = decode_jpeg(&jpeg(8, 8)).unwrap();
    let values: Vec<u8> = (0..64).map(|i| if i % 2 == 0 { 255 } else { 0 }).collect();

    let out = composite(&frame, &mask(&values));
    assert_eq!(out.data.len(), frame.data.len());

    for (i, (before, after)) in frame
        .data
        .chunks_exact(4)
        .zip(out.data.chunks_exact(4))
        .enumerate()
    {
        assert_eq!(before[3], after[3], "alpha changed at pixel {i}");
        if values[i] == 0 {
            assert_eq!(before, after);
        } else {
            assert!(after[1] >= before[1].min(153));
            assert!(after[0] <= before[0]);
        }
    }

    let png = encode_png(&out).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(decoded.into_raw(), out.data);
}

#[test]
fn wrong_sized_mask_is_a_no_op() {
    let frame = RgbaFrame::new(4, 4, vec![9; 64]);
    assert_eq!(composite(&frame, &mask(&[255; 15])), frame);
}
