/// QR join link construction and rendering.
use crate::error::{RoomError, RoomResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

/// Rendered QR images are at least this many pixels wide
const QR_MIN_DIMENSION: u32 = 300;

/// Join URL embedding the room credentials as query parameters.
/// The password is in cleartext; the short artifact lifetime is the only mitigation.
pub fn join_url(origin: &str, room_code: &str, password: &str) -> String {
    format!(
        "{}/?room={}&password={}",
        origin.trim_end_matches('/'),
        room_code,
        password
    )
}

/// Render `content` as a QR code and return it as a PNG data URL
pub fn render_data_url(content: &str) -> RoomResult<String> {
    let code = QrCode::with_error_correction_level(content.as_bytes(), EcLevel::M)
        .map_err(|e| RoomError::Qr(e.to_string()))?;

    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| RoomError::Qr(e.to_string()))?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}
