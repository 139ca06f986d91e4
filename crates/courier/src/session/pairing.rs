//! Pairing artifact cache entry.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::render::{QrRenderer, RenderError, png_data_uri};

/// The current pairing code together with its rendered forms.
///
/// Built in one go, so the code, image, data URI and timestamp always
/// describe the same code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingArtifact {
    code: String,
    png: Bytes,
    data_uri: String,
    issued_at: DateTime<Utc>,
}

impl PairingArtifact {
    pub fn render(
        code: String,
        renderer: &QrRenderer,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, RenderError> {
        let png = renderer.render_png(&code)?;
        let data_uri = png_data_uri(&png);
        Ok(Self {
            code,
            png: Bytes::from(png),
            data_uri,
            issued_at,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn png(&self) -> Bytes {
        self.png.clone()
    }

    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}
