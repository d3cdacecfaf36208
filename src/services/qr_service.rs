//! QR image rendering.

use std::io::Cursor;

use image::{ImageFormat, Luma, imageops::FilterType};
use qrcode::{EcLevel, QrCode};
use thiserror::Error;

/// Pixels per QR module before the final resize.
const MODULE_PIXELS: u32 = 10;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("data cannot be encoded as a QR code: {0}")]
    Encode(#[from] qrcode::types::QrError),
    #[error("failed to encode png: {0}")]
    Png(#[from] image::ImageError),
}

/// Renders `data` as a black-on-white `size × size` PNG.
pub fn render(data: &str, size: u32) -> Result<Vec<u8>, RenderError> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L)?;
    let modules = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .module_dimensions(MODULE_PIXELS, MODULE_PIXELS)
        .build();

    let resized = image::imageops::resize(&modules, size, size, FilterType::Nearest);

    let mut png = Cursor::new(Vec::new());
    resized.write_to(&mut png, ImageFormat::Png)?;
    Ok(png.into_inner())
}

#[cfg(test)]
mod tests {
    use image::GenericImageView;

    use super::*;

    #[test]
    fn renders_requested_dimensions() {
        let png = render("https://example.com", 200).unwrap();
        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        assert_eq!(decoded.dimensions(), (200, 200));
    }

    #[test]
    fn corners_are_quiet_zone_white() {
        let png = render("hello", 64).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.get_pixel(0, 0).0[0], 255);
        assert_eq!(decoded.get_pixel(63, 63).0[0], 255);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let data = "x".repeat(8000);
        assert!(matches!(render(&data, 100), Err(RenderError::Encode(_))));
    }
}
