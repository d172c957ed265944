//! Image encoding: captured sub-raster → base64 PNG.
//!
//! VLM APIs accept images as base64 payloads embedded in the JSON request
//! body. PNG is lossless: thin drawing lines, hatching and small dimension text
//! survive exactly as rendered, where JPEG artefacts would smear them.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// MIME type of every captured artifact.
pub const PNG_MIME: &str = "image/png";

/// Encode an image as a base64 PNG payload.
pub fn encode_png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} region → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );
    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_png_base64(&img).expect("encode should succeed");
        let decoded = STANDARD.decode(&data).expect("valid base64");
        // PNG signature
        assert_eq!(&decoded[..4], b"\x89PNG");
    }
}
