//! Screenshot downscaling and JPEG encoding

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::data::Screenshot;
use crate::error::CaptureError;

/// Output limits for captured frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub jpeg_quality: u8,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 60,
            max_width: 1920,
            max_height: 1080,
        }
    }
}

impl From<&crate::config::CaptureConfig> for EncodeOptions {
    fn from(config: &crate::config::CaptureConfig) -> Self {
        Self {
            jpeg_quality: config.jpeg_quality,
            max_width: config.max_width,
            max_height: config.max_height,
        }
    }
}

/// Fit `image` inside the configured bounds and encode it as a JPEG screenshot
pub fn encode_screenshot(
    image: &DynamicImage,
    options: EncodeOptions,
    taken_at: DateTime<Utc>,
) -> Result<Screenshot, CaptureError> {
    let fitted = if image.width() > options.max_width || image.height() > options.max_height {
        image.resize(options.max_width, options.max_height, FilterType::Triangle)
    } else {
        image.clone()
    };
    let rgb = DynamicImage::ImageRgb8(fitted.to_rgb8());

    let mut data = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut data, options.jpeg_quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .map_err(CaptureError::Encode)?;

    Ok(Screenshot::new(data, rgb.width(), rgb.height(), taken_at))
}
