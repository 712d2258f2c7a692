// THEORY:
// The `pipeline` module is the top-level API of the sky-brightness engine. It
// strings the core modules together into the single operation callers need,
// `analyze(image_bytes, exposure_override, altitude)`, and owns the one piece of
// shared state in the system: the loaded model.
//
// The model is never an ambient global. `NsbPipeline` either holds an
// `Arc<LoadedModel>` or remembers why loading failed. In the second case the
// pipeline is still constructible, reports itself as degraded, and refuses every
// request with `ModelUnavailable` instead of crashing. Cloning a pipeline is
// cheap and every clone shares the same immutable model.

use crate::core_modules::classifier::classify;
use crate::core_modules::feature_engineer::{FeatureSchema, engineer_features};
use crate::core_modules::metadata::{CaptureMetadata, extract_metadata};
use crate::core_modules::photometry::{PhotometricFeatures, extract_photometry};
use crate::core_modules::predictor::{LoadedModel, ModelInfo};
use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tunable behavior of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Altitude in meters used when a request does not provide one.
    pub default_altitude: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { default_altitude: 0.0 }
    }
}

/// One image to analyze, with its optional overrides.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub image_bytes: Vec<u8>,
    /// Replaces the exposure time found in the image metadata.
    pub exposure_override: Option<f64>,
    pub altitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDetails {
    pub exposure_time: f64,
    pub altitude: f64,
    pub intensity: f64,
    pub red_intensity: f64,
    pub green_intensity: f64,
    pub blue_intensity: f64,
    pub luminance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub iso: Option<u32>,
    pub aperture: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

/// The outcome of a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub nsb_score: f64,
    pub pollution_level: String,
    pub pollution_level_en: String,
    pub description: String,
    pub recommendation: String,
    pub color_code: String,
    pub bortle_class: u8,
    pub details: AnalysisDetails,
    pub camera_info: CameraInfo,
}

/// Health view of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub model_loaded: bool,
    pub scaler_loaded: bool,
    pub features_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
enum ModelState {
    Ready(Arc<LoadedModel>),
    Unavailable(String),
}

/// The main, top-level struct for the analysis engine.
#[derive(Debug, Clone)]
pub struct NsbPipeline {
    model: ModelState,
    config: PipelineConfig,
}

impl NsbPipeline {
    pub fn new(model: Arc<LoadedModel>, config: PipelineConfig) -> Self {
        Self {
            model: ModelState::Ready(model),
            config,
        }
    }

    /// A pipeline that refuses every request, reporting `reason`.
    pub fn unavailable(reason: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            model: ModelState::Unavailable(reason.into()),
            config,
        }
    }

    /// Loads the model artifact, degrading instead of failing when it cannot be used.
    pub fn from_artifact(path: &Path, config: PipelineConfig) -> Self {
        match LoadedModel::load(path) {
            Ok(model) => Self::new(Arc::new(model), config),
            Err(err) => {
                warn!("Model could not be loaded, analysis is disabled: {}", err);
                Self::unavailable(err.to_string(), config)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.model, ModelState::Ready(_))
    }

    pub fn analyze_request(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        self.analyze(&request.image_bytes, request.exposure_override, request.altitude)
    }

    /// Runs the full pipeline on one image.
    pub fn analyze(
        &self,
        image_bytes: &[u8],
        exposure_override: Option<f64>,
        altitude: Option<f64>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let model = match &self.model {
            ModelState::Ready(model) => model,
            ModelState::Unavailable(reason) => {
                return Err(AnalysisError::ModelUnavailable(reason.clone()));
            }
        };

        let altitude = altitude.unwrap_or(self.config.default_altitude);
        validate_overrides(exposure_override, altitude, model.schema())?;

        // Stage 1: Capture metadata, with the manual override taking precedence
        let metadata = extract_metadata(image_bytes);
        let exposure_time = exposure_override.unwrap_or(metadata.exposure_time);

        // Stage 2: Photometry
        let photometry = extract_photometry(image_bytes)?;
        debug!(
            "Photometry: Rs={:.4} Gs={:.4} Bs={:.4} Is={:.4}",
            photometry.rs, photometry.gs, photometry.bs, photometry.is
        );

        // Stage 3: Feature engineering against the model's schema
        let vector = engineer_features(&photometry, exposure_time, altitude, model.schema());

        // Stage 4: Prediction
        let nsb = model.predict(&vector)?;

        // Stage 5: Classification
        Ok(build_result(nsb, exposure_time, altitude, &photometry, metadata))
    }

    pub fn status(&self) -> ServiceStatus {
        match &self.model {
            ModelState::Ready(model) => ServiceStatus {
                status: "healthy".to_string(),
                model_loaded: true,
                scaler_loaded: true,
                features_count: model.schema().len(),
                reason: None,
            },
            ModelState::Unavailable(reason) => ServiceStatus {
                status: "degraded".to_string(),
                model_loaded: false,
                scaler_loaded: false,
                features_count: 0,
                reason: Some(reason.clone()),
            },
        }
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        match &self.model {
            ModelState::Ready(model) => Some(model.info()),
            ModelState::Unavailable(_) => None,
        }
    }
}

fn validate_overrides(
    exposure_override: Option<f64>,
    altitude: f64,
    schema: &FeatureSchema,
) -> Result<(), AnalysisError> {
    if let Some(exposure) = exposure_override {
        if !exposure.is_finite() || exposure <= 0.0 {
            return Err(AnalysisError::InvalidParameter {
                name: "exposure_time",
                reason: format!("must be a positive number of seconds, got {exposure}"),
            });
        }
    }
    if !altitude.is_finite() {
        return Err(AnalysisError::InvalidParameter {
            name: "altitude",
            reason: format!("must be a finite number of meters, got {altitude}"),
        });
    }
    // log1p is undefined at and below -1, which only matters when the model reads it.
    if altitude <= -1.0 && schema.position("log_Altitude").is_some() {
        return Err(AnalysisError::InvalidParameter {
            name: "altitude",
            reason: format!("must be above -1 m for a model using log_Altitude, got {altitude}"),
        });
    }
    Ok(())
}

fn build_result(
    nsb: f64,
    exposure_time: f64,
    altitude: f64,
    photometry: &PhotometricFeatures,
    metadata: CaptureMetadata,
) -> AnalysisResult {
    let tier = classify(nsb);
    AnalysisResult {
        nsb_score: round_to(nsb, 2),
        pollution_level: tier.level.to_string(),
        pollution_level_en: tier.level_en.to_string(),
        description: tier.description.to_string(),
        recommendation: tier.recommendation.to_string(),
        color_code: tier.color_code.to_string(),
        bortle_class: tier.bortle_class,
        details: AnalysisDetails {
            exposure_time: round_to(exposure_time, 4),
            altitude,
            intensity: round_to(photometry.is, 4),
            red_intensity: round_to(photometry.rs, 4),
            green_intensity: round_to(photometry.gs, 4),
            blue_intensity: round_to(photometry.bs, 4),
            luminance: round_to(photometry.luminance, 4),
        },
        camera_info: CameraInfo {
            iso: metadata.iso,
            aperture: metadata.aperture,
            camera_make: metadata.camera_make,
            camera_model: metadata.camera_model,
        },
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::predictor::{FeatureScaler, LinearModel, Regressor};
    use crate::core_modules::utils::image_helper::{solid_jpeg_with_exif, solid_rgb8};
    use exif::experimental::Writer;
    use exif::{Field, In, Rational, Tag, Value};
    use std::io::Cursor;

    #[derive(Debug)]
    struct Constant(f64);

    impl Regressor for Constant {
        fn validate(&self, _input_len: usize) -> Result<(), String> {
            Ok(())
        }

        fn predict(&self, _scaled: &[f64]) -> f64 {
            self.0
        }
    }

    fn pipeline_with(regressor: Box<dyn Regressor>, schema: &[&str]) -> NsbPipeline {
        let model = LoadedModel::new(
            FeatureSchema::new(schema.iter().copied()),
            FeatureScaler::Identity,
            regressor,
        )
        .unwrap();
        NsbPipeline::new(Arc::new(model), PipelineConfig::default())
    }

    #[test]
    fn white_image_resolves_to_one_tier() {
        let pipeline = pipeline_with(Box::new(Constant(19.456)), &["Is", "Rs", "Gs", "Bs"]);
        let bytes = solid_rgb8(2, 2, [255, 255, 255]).expect("Error encoding image.");
        let result = pipeline.analyze(&bytes, None, None).unwrap();

        assert_eq!(result.nsb_score, 19.46);
        assert_eq!(result.bortle_class, 3);
        assert_eq!(result.pollution_level_en, "Medium-Low");
        assert_eq!(result.details.exposure_time, 0.16);
        assert_eq!(result.details.altitude, 0.0);
        assert_eq!(result.details.luminance, 1.0);
        assert_eq!(result.details.intensity, 0.0);
        assert_eq!(result.camera_info.iso, None);
    }

    #[test]
    fn exposure_override_wins() {
        // Prediction exposes the exposure feature directly.
        let model = LinearModel {
            coefficients: vec![1.0],
            intercept: 0.0,
        };
        let pipeline = pipeline_with(Box::new(model), &["Exposure time"]);
        let bytes = solid_rgb8(2, 2, [10, 10, 10]).expect("Error encoding image.");

        let result = pipeline.analyze(&bytes, Some(20.0), Some(150.0)).unwrap();
        assert_eq!(result.details.exposure_time, 20.0);
        assert_eq!(result.nsb_score, 20.0);
        assert_eq!(result.details.altitude, 150.0);
    }

    fn camera_tiff() -> Vec<u8> {
        let fields = [
            (Tag::Make, Value::Ascii(vec![b"Canon".to_vec()])),
            (Tag::Model, Value::Ascii(vec![b"EOS R6".to_vec()])),
            (Tag::ExposureTime, Value::Rational(vec![Rational { num: 25, denom: 1 }])),
            (Tag::FNumber, Value::Rational(vec![Rational { num: 18, denom: 10 }])),
            (Tag::PhotographicSensitivity, Value::Short(vec![6400])),
        ]
        .map(|(tag, value)| Field {
            tag,
            ifd_num: In::PRIMARY,
            value,
        });

        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        let mut buffer = Cursor::new(Vec::new());
        writer.write(&mut buffer, false).expect("Error writing EXIF.");
        buffer.into_inner()
    }

    #[test]
    fn exif_fills_camera_info_and_override_beats_it() {
        let model = LinearModel {
            coefficients: vec![1.0],
            intercept: 0.0,
        };
        let pipeline = pipeline_with(Box::new(model), &["Exposure time"]);
        let bytes = solid_jpeg_with_exif(8, 8, [20, 20, 20], &camera_tiff()).expect("Error encoding image.");

        let extracted = pipeline.analyze(&bytes, None, None).unwrap();
        assert_eq!(extracted.details.exposure_time, 25.0);
        assert_eq!(extracted.nsb_score, 25.0);
        assert_eq!(extracted.camera_info.iso, Some(6400));
        assert_eq!(extracted.camera_info.aperture, Some(1.8));
        assert_eq!(extracted.camera_info.camera_make.as_deref(), Some("Canon"));
        assert_eq!(extracted.camera_info.camera_model.as_deref(), Some("EOS R6"));

        let overridden = pipeline.analyze(&bytes, Some(4.0), None).unwrap();
        assert_eq!(overridden.details.exposure_time, 4.0);
        assert_eq!(overridden.nsb_score, 4.0);
        assert_eq!(overridden.camera_info, extracted.camera_info);
    }

    #[test]
    fn analysis_is_deterministic() {
        let model = LinearModel {
            coefficients: vec![0.7, -0.3, 1.1, 0.01],
            intercept: 17.2,
        };
        let pipeline = pipeline_with(Box::new(model), &["Is", "R_G_ratio", "RGB_std", "Altitude_x_Is"]);
        let bytes = solid_rgb8(8, 8, [12, 20, 40]).expect("Error encoding image.");

        let first = pipeline.analyze(&bytes, Some(8.0), Some(1200.0)).unwrap();
        for _ in 0..5 {
            assert_eq!(pipeline.analyze(&bytes, Some(8.0), Some(1200.0)).unwrap(), first);
        }
    }

    #[test]
    fn corrupt_bytes_are_a_decode_error() {
        let pipeline = pipeline_with(Box::new(Constant(20.0)), &["Is"]);
        let err = pipeline.analyze(b"GIF89a garbage", None, None).unwrap_err();
        assert!(matches!(err, AnalysisError::ImageDecode(_)));
    }

    #[test]
    fn unavailable_model_refuses_requests() {
        let pipeline = NsbPipeline::unavailable("artifact missing", PipelineConfig::default());
        let bytes = solid_rgb8(1, 1, [0, 0, 0]).expect("Error encoding image.");

        let err = pipeline.analyze(&bytes, None, None).unwrap_err();
        assert_eq!(err.kind(), "model_unavailable_error");
        assert!(!pipeline.is_ready());
        assert_eq!(pipeline.status().status, "degraded");
        assert_eq!(pipeline.status().reason.as_deref(), Some("artifact missing"));
        assert!(pipeline.model_info().is_none());
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let pipeline = pipeline_with(Box::new(Constant(20.0)), &["Is"]);
        let bytes = solid_rgb8(1, 1, [1, 2, 3]).expect("Error encoding image.");

        for (exposure, altitude) in [
            (Some(0.0), None),
            (Some(-1.0), None),
            (Some(f64::NAN), None),
            (None, Some(f64::INFINITY)),
            (None, Some(f64::NAN)),
        ] {
            let err = pipeline.analyze(&bytes, exposure, altitude).unwrap_err();
            assert_eq!(err.kind(), "invalid_parameter_error");
        }
    }

    #[test]
    fn below_sea_level_altitude_is_accepted() {
        let model = LinearModel {
            coefficients: vec![0.0, 0.001],
            intercept: 20.0,
        };
        let pipeline = pipeline_with(Box::new(model), &["Is", "Altitude_x_Exposure"]);
        let bytes = solid_rgb8(2, 2, [255, 255, 255]).expect("Error encoding image.");

        let result = pipeline.analyze(&bytes, Some(10.0), Some(-430.0)).unwrap();
        assert_eq!(result.details.altitude, -430.0);
        assert_eq!(result.nsb_score, 15.7);
    }

    #[test]
    fn log_altitude_models_reject_altitude_at_or_below_minus_one() {
        let pipeline = pipeline_with(Box::new(Constant(20.0)), &["Is", "log_Altitude"]);
        let bytes = solid_rgb8(1, 1, [1, 2, 3]).expect("Error encoding image.");

        for altitude in [-1.0, -430.0] {
            let err = pipeline.analyze(&bytes, None, Some(altitude)).unwrap_err();
            assert!(matches!(err, AnalysisError::InvalidParameter { name: "altitude", .. }));
        }
        assert!(pipeline.analyze(&bytes, None, Some(-0.5)).is_ok());
    }

    #[test]
    fn default_altitude_comes_from_config() {
        let model = LoadedModel::new(
            FeatureSchema::new(["Altitude"]),
            FeatureScaler::Identity,
            Box::new(LinearModel {
                coefficients: vec![0.01],
                intercept: 16.0,
            }),
        )
        .unwrap();
        let pipeline = NsbPipeline::new(Arc::new(model), PipelineConfig { default_altitude: 250.0 });
        let bytes = solid_rgb8(1, 1, [1, 2, 3]).expect("Error encoding image.");

        let result = pipeline.analyze(&bytes, None, None).unwrap();
        assert_eq!(result.details.altitude, 250.0);
        assert_eq!(result.nsb_score, 18.5);
    }

    #[test]
    fn rounding_matches_reported_precision() {
        assert_eq!(round_to(19.456, 2), 19.46);
        assert_eq!(round_to(0.123_456, 4), 0.1235);
    }
}
