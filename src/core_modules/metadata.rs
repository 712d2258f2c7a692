// THEORY:
// The metadata extractor is the most forgiving stage of the pipeline. Capture
// metadata is a hint, not a requirement: a phone screenshot, a re-encoded PNG or
// a JPEG stripped by a messaging app carries no EXIF at all, and the analysis
// must still run. Any problem here therefore collapses to the default
// `CaptureMetadata` instead of failing the request.
//
// The extraction is all-or-nothing. If a single tag is present but malformed
// (a zero denominator, a negative exposure) the whole record is discarded and
// the defaults are used, so a half-parsed record never leaks downstream.

use exif::{Exif, Field, In, Reader, Tag, Value};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// Exposure time assumed when the image carries none.
pub const DEFAULT_EXPOSURE_TIME: f64 = 0.16;

/// Capture settings read from the image container.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMetadata {
    /// Exposure time in seconds.
    pub exposure_time: f64,
    pub iso: Option<u32>,
    /// F-number of the lens.
    pub aperture: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

impl Default for CaptureMetadata {
    fn default() -> Self {
        Self {
            exposure_time: DEFAULT_EXPOSURE_TIME,
            iso: None,
            aperture: None,
            camera_make: None,
            camera_model: None,
        }
    }
}

/// Reasons the EXIF block was rejected. Never surfaced to callers.
#[derive(Debug, Error)]
pub enum MetadataExtractionError {
    #[error("No EXIF data: {0}")]
    Missing(#[from] exif::Error),

    #[error("Tag {tag} has an unexpected value type")]
    UnexpectedType { tag: Tag },

    #[error("Tag {tag} has a zero denominator")]
    ZeroDenominator { tag: Tag },

    #[error("Tag {tag} has an out of range value {value}")]
    OutOfRange { tag: Tag, value: f64 },
}

/// Reads capture metadata from raw image bytes, falling back to defaults.
pub fn extract_metadata(image_bytes: &[u8]) -> CaptureMetadata {
    match read_metadata(image_bytes) {
        Ok(metadata) => metadata,
        Err(err) => {
            debug!("Using default capture metadata: {}", err);
            CaptureMetadata::default()
        }
    }
}

/// Strict variant of [`extract_metadata`] that reports why EXIF was rejected.
pub fn read_metadata(image_bytes: &[u8]) -> Result<CaptureMetadata, MetadataExtractionError> {
    let mut cursor = Cursor::new(image_bytes);
    let exif = Reader::new().read_from_container(&mut cursor)?;
    metadata_from_exif(&exif)
}

/// Builds `CaptureMetadata` from an already parsed EXIF block.
pub fn metadata_from_exif(exif: &Exif) -> Result<CaptureMetadata, MetadataExtractionError> {
    let mut metadata = CaptureMetadata::default();

    if let Some(field) = exif.get_field(Tag::ExposureTime, In::PRIMARY) {
        let exposure = rational_value(field)?;
        if !exposure.is_finite() || exposure <= 0.0 {
            return Err(MetadataExtractionError::OutOfRange {
                tag: field.tag,
                value: exposure,
            });
        }
        metadata.exposure_time = exposure;
    }

    if let Some(field) = exif.get_field(Tag::PhotographicSensitivity, In::PRIMARY) {
        let iso = field
            .value
            .get_uint(0)
            .ok_or(MetadataExtractionError::UnexpectedType { tag: field.tag })?;
        metadata.iso = Some(iso);
    }

    if let Some(field) = exif.get_field(Tag::FNumber, In::PRIMARY) {
        metadata.aperture = Some(rational_value(field)?);
    }

    if let Some(field) = exif.get_field(Tag::Make, In::PRIMARY) {
        metadata.camera_make = ascii_value(field)?;
    }

    if let Some(field) = exif.get_field(Tag::Model, In::PRIMARY) {
        metadata.camera_model = ascii_value(field)?;
    }

    Ok(metadata)
}

/// Converts a `(num, den)` rational tag to `num / den`.
fn rational_value(field: &Field) -> Result<f64, MetadataExtractionError> {
    let (num, denom) = match &field.value {
        Value::Rational(values) => values
            .first()
            .map(|r| (r.num as f64, r.denom as f64)),
        Value::SRational(values) => values
            .first()
            .map(|r| (r.num as f64, r.denom as f64)),
        _ => None,
    }
    .ok_or(MetadataExtractionError::UnexpectedType { tag: field.tag })?;

    if denom == 0.0 {
        return Err(MetadataExtractionError::ZeroDenominator { tag: field.tag });
    }
    Ok(num / denom)
}

fn ascii_value(field: &Field) -> Result<Option<String>, MetadataExtractionError> {
    match &field.value {
        Value::Ascii(parts) => Ok(parts.first().and_then(|bytes| {
            let text = String::from_utf8_lossy(bytes);
            let trimmed = text.trim_end_matches('\0').trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })),
        _ => Err(MetadataExtractionError::UnexpectedType { tag: field.tag }),
    }
}
