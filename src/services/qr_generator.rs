use base64::{engine::general_purpose::STANDARD, Engine};
use qrcode::render::svg;
use qrcode::QrCode;

#[derive(thiserror::Error, Debug)]
pub enum QrGenerationError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    ImageError(#[from] image::ImageError),
}

/// Light modules around the symbol, as scanners expect
const QUIET_ZONE_MODULES: u32 = 4;
const MODULE_SIZE: u32 = 8;

/// Generates a QR code SVG encoding the issued card id
pub fn generate_qr_svg(content: &str) -> Result<String, QrGenerationError> {
    let code = QrCode::new(content.as_bytes())?;

    let svg = code
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .quiet_zone(true)
        .build();

    Ok(svg)
}

/// Generates a QR code PNG encoding the issued card id
pub fn generate_qr_png(content: &str) -> Result<Vec<u8>, QrGenerationError> {
    use image::{ImageBuffer, Luma};

    let code = QrCode::new(content.as_bytes())?;

    let width = code.width() as u32;
    let img_size = (width + 2 * QUIET_ZONE_MODULES) * MODULE_SIZE;

    let img = ImageBuffer::<Luma<u8>, Vec<u8>>::from_fn(img_size, img_size, |x, y| {
        let module_x = (x / MODULE_SIZE).checked_sub(QUIET_ZONE_MODULES);
        let module_y = (y / MODULE_SIZE).checked_sub(QUIET_ZONE_MODULES);

        match (module_x, module_y) {
            (Some(mx), Some(my)) if mx < width && my < width => {
                match code[(mx as usize, my as usize)] {
                    qrcode::types::Color::Dark => Luma([0u8]),
                    qrcode::types::Color::Light => Luma([255u8]),
                }
            }
            _ => Luma([255u8]),
        }
    });

    let mut png_data = Vec::new();
    image::DynamicImage::ImageLuma8(img).write_to(
        &mut std::io::Cursor::new(&mut png_data),
        image::ImageFormat::Png,
    )?;

    Ok(png_data)
}

/// PNG QR code as a `data:` URI, for embedding into standalone markup
pub fn qr_data_uri(content: &str) -> Result<String, QrGenerationError> {
    let png = generate_qr_png(content)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}
