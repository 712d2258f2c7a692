// THEORY:
// The photometric layer turns decoded pixels into the handful of brightness
// numbers the sky model was trained on. It mirrors the way sky quality meters
// report brightness: a darker sky produces a *larger* value, because every
// channel mean is passed through a negative base-10 logarithm.
//
// The luminance-derived intensity `Is` is computed from the weighted raw channel
// means (Rec. 601 luma weights), never from the already-logged `Rs`, `Gs`, `Bs`.
// The order matters: log(weighted mean) is not the weighted mean of logs.
//
// A pure black frame would make the logarithm undefined, so every mean is
// offset by `EPSILON` before taking the log. For black, every log feature is
// therefore `-log10(1e-10) = 10`.

use crate::core_modules::channel_means::channel_means::ChannelMeans;
use crate::error::AnalysisError;
use image::DynamicImage;

/// Guard added before every logarithm and every division.
pub const EPSILON: f64 = 1e-10;

const LUMA_RED: f64 = 0.299;
const LUMA_GREEN: f64 = 0.587;
const LUMA_BLUE: f64 = 0.114;

/// Brightness statistics of a whole image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotometricFeatures {
    /// `-log10(raw_r + ε)`
    pub rs: f64,
    /// `-log10(raw_g + ε)`
    pub gs: f64,
    /// `-log10(raw_b + ε)`
    pub bs: f64,
    /// `-log10(luminance + ε)`
    pub is: f64,
    pub raw_r: f64,
    pub raw_g: f64,
    pub raw_b: f64,
    pub luminance: f64,
}

impl PhotometricFeatures {
    /// Derives the log features from per-channel means.
    pub fn from_means(means: &ChannelMeans) -> Self {
        let luminance = LUMA_RED * means.red + LUMA_GREEN * means.green + LUMA_BLUE * means.blue;
        Self {
            rs: negative_log10(means.red),
            gs: negative_log10(means.green),
            bs: negative_log10(means.blue),
            is: negative_log10(luminance),
            raw_r: means.red,
            raw_g: means.green,
            raw_b: means.blue,
            luminance,
        }
    }
}

fn negative_log10(mean: f64) -> f64 {
    -(mean + EPSILON).log10()
}

/// Decodes image bytes and extracts the photometric features.
pub fn extract_photometry(image_bytes: &[u8]) -> Result<PhotometricFeatures, AnalysisError> {
    let image = image::load_from_memory(image_bytes)?;
    photometry_from_image(&image)
}

/// Extracts photometric features from an already decoded image.
///
/// Samples are normalized by the maximum value of their bit depth; alpha is
/// ignored and grayscale is expanded to three equal channels.
pub fn photometry_from_image(image: &DynamicImage) -> Result<PhotometricFeatures, AnalysisError> {
    let means = match image {
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => {
            let rgb = image.to_rgb16();
            ChannelMeans::from_interleaved(rgb.as_raw(), u16::MAX as f64, |v| v as f64)
        }
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            let rgb = image.to_rgb32f();
            ChannelMeans::from_interleaved(rgb.as_raw(), 1.0, |v| v as f64)
        }
        _ => {
            let rgb = image.to_rgb8();
            ChannelMeans::from_interleaved(rgb.as_raw(), u8::MAX as f64, |v| v as f64)
        }
    }
    .ok_or_else(|| AnalysisError::ImageDecode("image contains no pixels".to_string()))?;

    Ok(PhotometricFeatures::from_means(&means))
}
