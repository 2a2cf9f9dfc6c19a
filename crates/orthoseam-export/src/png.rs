//! PNG encoding of binary masks.

use image::{ExtendedColorType, ImageEncoder};
use orthoseam_pipeline::GrayImage;

use crate::ExportError;

/// Encode a mask as an 8-bit grayscale PNG.
///
/// # Errors
///
/// Returns [`ExportError::PngEncode`] if PNG encoding fails.
pub fn encode_mask_png(mask: &GrayImage) -> Result<Vec<u8>, ExportError> {
    let mut png_bytes = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
    encoder.write_image(
        mask.as_raw(),
        mask.width(),
        mask.height(),
        ExtendedColorType::L8,
    )?;
    Ok(png_bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn decodes_back_to_same_mask() {
        let mask = GrayImage::from_fn(9, 4, |x, y| Luma([if x > y { 255 } else { 0 }]));
        let bytes = encode_mask_png(&mask).unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
        let decoded = image::load_from_memory(&bytes).unwrap().to_luma8();
        assert_eq!(decoded, mask);
    }
}
