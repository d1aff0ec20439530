//! Image encoding: `RgbImage` → base64 PNG wrapped in `ImageData`.
//!
//! Vision models receive images as base64 data embedded in the request body.
//! PNG keeps rendered text crisp for OCR; `detail: "high"` asks the model for
//! its full tile budget so small print survives.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::RgbImage;
use std::io::Cursor;
use tracing::debug;

/// Encode pixels as a base64 PNG ready for a vision request.
pub fn encode_image(img: &RgbImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn encodes_png_payload() {
        let img = RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]));
        let data = encode_image(&img).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).unwrap();
        assert_eq!(&decoded[..4], b"\x89PNG");
    }
}
