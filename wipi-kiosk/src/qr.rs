//! QR rendering of the join payload

use qrcode::render::{svg, unicode};
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Serialize};

/// Pixel size of the SVG, matching the kiosk's QR panel
pub const SVG_SIZE: u32 = 220;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QrFormat {
    /// Unicode half blocks for a text console
    #[default]
    Terminal,
    Svg,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrImage {
    pub format: QrFormat,
    /// modules per side, quiet zone excluded
    pub width: usize,
    pub data: String,
}

#[derive(Debug, thiserror::Error)]
pub enum QrError {
    #[error("payload does not fit a QR code: {0}")]
    Encode(qrcode::types::QrError),
}

pub trait QrRenderer: Send + Sync {
    fn render(&self, payload: &str) -> Result<QrImage, QrError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QrCodeRenderer {
    format: QrFormat,
}

impl QrCodeRenderer {
    pub fn new(format: QrFormat) -> Self {
        Self { format }
    }
}

impl QrRenderer for QrCodeRenderer {
    fn render(&self, payload: &str) -> Result<QrImage, QrError> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
            .map_err(QrError::Encode)?;
        let data = match self.format {
            // light modules drawn as blocks so the code reads on dark consoles
            QrFormat::Terminal => code
                .render::<unicode::Dense1x2>()
                .dark_color(unicode::Dense1x2::Light)
                .light_color(unicode::Dense1x2::Dark)
                .build(),
            QrFormat::Svg => code
                .render::<svg::Color<'_>>()
                .min_dimensions(SVG_SIZE, SVG_SIZE)
                .dark_color(svg::Color("#000000"))
                .light_color(svg::Color("#ffffff"))
                .build(),
        };
        Ok(QrImage {
            format: self.format,
            width: code.width(),
            data,
        })
    }
}
