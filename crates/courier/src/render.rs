//! Pairing code rendering.
//!
//! Turns the raw pairing code emitted by the driver into a scannable QR
//! image, as PNG bytes and as a `data:` URI for embedding in JSON.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use thiserror::Error;

const DEFAULT_SIZE: u32 = 300;
const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("pairing code cannot be encoded as QR: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("png encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Renders pairing codes as square QR images.
#[derive(Debug, Clone, Copy)]
pub struct QrRenderer {
    size: u32,
}

impl Default for QrRenderer {
    fn default() -> Self {
        Self { size: DEFAULT_SIZE }
    }
}

impl QrRenderer {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    /// Render `code` to PNG bytes. Output is deterministic for a given code.
    pub fn render_png(&self, code: &str) -> Result<Vec<u8>, RenderError> {
        let symbol = QrCode::new(code.as_bytes())?;
        let pixels = symbol
            .render::<Luma<u8>>()
            .min_dimensions(self.size, self.size)
            .quiet_zone(true)
            .build();

        let mut png = Vec::new();
        DynamicImage::ImageLuma8(pixels).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }
}

/// Encode PNG bytes as a `data:image/png;base64,...` URI.
pub fn png_data_uri(png: &[u8]) -> String {
    let mut uri = String::with_capacity(PNG_DATA_URI_PREFIX.len() + png.len().div_ceil(3) * 4);
    uri.push_str(PNG_DATA_URI_PREFIX);
    STANDARD.encode_string(png, &mut uri);
    uri
}
