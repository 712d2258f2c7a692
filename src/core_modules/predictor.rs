// THEORY:
// The predictor adapter wraps the one statistical asset this system cannot
// derive on its own: a regression model fit offline, plus the scaler fit on the
// same training table. The pipeline treats that pair as an opaque capability,
// `vector -> NSB`, behind the `Regressor` trait.
//
// Key architectural principles:
// 1.  **Load once, share forever**: a `LoadedModel` is built at process start
//     and handed out as `Arc<LoadedModel>`. Nothing in it is mutable, so any
//     number of requests can read it concurrently without locking.
// 2.  **Schema travels with the weights**: the feature schema is part of the
//     artifact. Load-time validation guarantees the scaler, the regressor and
//     the schema agree on the input width, so a mismatch at prediction time can
//     only mean the caller built the vector against a different schema.
// 3.  **Refuse, never pad**: a vector of the wrong width is an internal
//     inconsistency and is reported as `SchemaMismatch`.
//
// The on-disk artifact is JSON. Two regressor families are supported: linear
// models and additive tree ensembles (random forests with `weight = 1/n`,
// gradient boosting with `weight = learning_rate`).

use crate::core_modules::feature_engineer::{FeatureSchema, FeatureVector};
use crate::error::{AnalysisError, ModelLoadError};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// An opaque regression function over scaled feature vectors.
pub trait Regressor: Debug + Send + Sync {
    /// Checks that `predict` is safe to call on vectors of `input_len` values.
    fn validate(&self, input_len: usize) -> Result<(), String>;

    fn predict(&self, scaled: &[f64]) -> f64;
}

/// Feature scaler fit at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureScaler {
    /// `(x - mean) / scale`
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    /// `x * scale + min`
    MinMax { min: Vec<f64>, scale: Vec<f64> },
    Identity,
}

impl FeatureScaler {
    pub fn input_len(&self) -> Option<usize> {
        match self {
            FeatureScaler::Standard { mean, .. } => Some(mean.len()),
            FeatureScaler::MinMax { min, .. } => Some(min.len()),
            FeatureScaler::Identity => None,
        }
    }

    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        match self {
            FeatureScaler::Standard { mean, scale } => values
                .iter()
                .zip(mean.iter().zip(scale))
                .map(|(x, (m, s))| {
                    // A constant training column has scale 0; it is left unscaled.
                    let s = if *s == 0.0 { 1.0 } else { *s };
                    (x - m) / s
                })
                .collect(),
            FeatureScaler::MinMax { min, scale } => values
                .iter()
                .zip(min.iter().zip(scale))
                .map(|(x, (m, s))| x * s + m)
                .collect(),
            FeatureScaler::Identity => values.to_vec(),
        }
    }

    fn validate(&self) -> Result<(), ModelLoadError> {
        let (a, b) = match self {
            FeatureScaler::Standard { mean, scale } => (mean.len(), scale.len()),
            FeatureScaler::MinMax { min, scale } => (min.len(), scale.len()),
            FeatureScaler::Identity => return Ok(()),
        };
        if a != b {
            return Err(ModelLoadError::Invalid(format!(
                "scaler parameter lengths differ ({a} vs {b})"
            )));
        }
        Ok(())
    }
}

/// `intercept + Σ coefficient·x`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl Regressor for LinearModel {
    fn validate(&self, input_len: usize) -> Result<(), String> {
        if self.coefficients.len() != input_len {
            return Err(format!(
                "regressor expects {} features but the schema lists {input_len}",
                self.coefficients.len()
            ));
        }
        Ok(())
    }

    fn predict(&self, scaled: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(scaled)
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// A binary regression tree stored as a flat node array, root at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    fn evaluate(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Children must point strictly forward, which also rules out cycles.
    fn validate(&self, input_len: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature, left, right, ..
            } = node
            {
                if *feature >= input_len {
                    return Err(format!("node {index} splits on feature {feature} of {input_len}"));
                }
                for child in [*left, *right] {
                    if child <= index || child >= self.nodes.len() {
                        return Err(format!("node {index} has invalid child {child}"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// `base_score + weight · Σ tree(x)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    #[serde(default)]
    pub base_score: f64,
    #[serde(default = "unit_weight")]
    pub weight: f64,
    pub trees: Vec<RegressionTree>,
}

fn unit_weight() -> f64 {
    1.0
}

impl Regressor for TreeEnsemble {
    fn validate(&self, input_len: usize) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("tree ensemble has no trees".to_string());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(input_len).map_err(|reason| format!("tree {i}: {reason}"))?;
        }
        Ok(())
    }

    fn predict(&self, scaled: &[f64]) -> f64 {
        self.base_score + self.weight * self.trees.iter().map(|t| t.evaluate(scaled)).sum::<f64>()
    }
}

/// The regressor families an artifact can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Linear(LinearModel),
    TreeEnsemble(TreeEnsemble),
}

impl ModelSpec {
    fn into_regressor(self) -> Box<dyn Regressor> {
        match self {
            ModelSpec::Linear(model) => Box::new(model),
            ModelSpec::TreeEnsemble(ensemble) => Box::new(ensemble),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelMetadata {
    pub model_name: String,
    pub training_date: String,
    pub training_samples: Option<u64>,
    pub test_samples: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPerformance {
    pub test_r2: Option<f64>,
    pub test_rmse: Option<f64>,
    pub test_mae: Option<f64>,
}

/// The serialized model package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    #[serde(default)]
    pub metadata: ModelMetadata,
    #[serde(default)]
    pub performance: ModelPerformance,
    pub selected_features: FeatureSchema,
    pub scaler: FeatureScaler,
    pub model: ModelSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureList {
    pub count: usize,
    pub names: Vec<String>,
}

/// Descriptive view of the loaded model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub training_date: String,
    pub training_samples: Option<u64>,
    pub test_samples: Option<u64>,
    pub performance: ModelPerformance,
    pub features: FeatureList,
}

/// Predictor, scaler and schema, validated against each other.
#[derive(Debug)]
pub struct LoadedModel {
    schema: Arc<FeatureSchema>,
    scaler: FeatureScaler,
    regressor: Box<dyn Regressor>,
    metadata: ModelMetadata,
    performance: ModelPerformance,
}

impl LoadedModel {
    /// Assembles a model from parts, checking that every part agrees on the input width.
    /// Every regressor is validated here, so `predict` cannot index out of bounds.
    pub fn new(
        schema: FeatureSchema,
        scaler: FeatureScaler,
        regressor: Box<dyn Regressor>,
    ) -> Result<Self, ModelLoadError> {
        if schema.is_empty() {
            return Err(ModelLoadError::Invalid("feature schema is empty".to_string()));
        }
        scaler.validate()?;
        let expected = schema.len();
        if let Some(len) = scaler.input_len() {
            if len != expected {
                return Err(ModelLoadError::Invalid(format!(
                    "scaler expects {len} features but the schema lists {expected}"
                )));
            }
        }
        regressor.validate(expected).map_err(ModelLoadError::Invalid)?;

        Ok(Self {
            schema: Arc::new(schema),
            scaler,
            regressor,
            metadata: ModelMetadata::default(),
            performance: ModelPerformance::default(),
        })
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelLoadError> {
        let regressor = artifact.model.into_regressor();
        let mut model = Self::new(artifact.selected_features, artifact.scaler, regressor)?;
        model.metadata = artifact.metadata;
        model.performance = artifact.performance;
        Ok(model)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ModelLoadError> {
        Self::from_artifact(serde_json::from_str(json)?)
    }

    /// Reads and validates a JSON artifact from disk.
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::from_json_str(&content)?;

        info!("Model loaded from {:?}", path);
        info!("  name: {}", model.metadata.model_name);
        info!("  training date: {}", model.metadata.training_date);
        if let Some(r2) = model.performance.test_r2 {
            info!("  test R²: {:.4}", r2);
        }
        if let Some(rmse) = model.performance.test_rmse {
            info!("  test RMSE: {:.4}", rmse);
        }
        info!("  selected features: {}", model.schema.len());

        Ok(model)
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    /// Scales the vector and runs the regressor.
    pub fn predict(&self, vector: &FeatureVector) -> Result<f64, AnalysisError> {
        let expected = self.schema.len();
        if vector.len() != expected {
            error!(
                "Schema mismatch: feature vector has {} entries, model expects {}",
                vector.len(),
                expected
            );
            return Err(AnalysisError::SchemaMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let scaled = self.scaler.transform(vector.values());
        Ok(self.regressor.predict(&scaled))
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            model_name: self.metadata.model_name.clone(),
            training_date: self.metadata.training_date.clone(),
            training_samples: self.metadata.training_samples,
            test_samples: self.metadata.test_samples,
            performance: self.performance.clone(),
            features: FeatureList {
                count: self.schema.len(),
                names: self.schema.names().to_vec(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::channel_means::channel_means::ChannelMeans;
    use crate::core_modules::feature_engineer::engineer_features;
    use crate::core_modules::photometry::PhotometricFeatures;

    const LINEAR_ARTIFACT: &str = r#"{
        "metadata": { "model_name": "Ridge", "training_date": "2025-01-10" },
        "performance": { "test_r2": 0.91, "test_rmse": 0.42 },
        "selected_features": ["Is", "Altitude"],
        "scaler": { "kind": "standard", "mean": [1.0, 100.0], "scale": [2.0, 0.0] },
        "model": { "kind": "linear", "coefficients": [1.5, 0.01], "intercept": 18.0 }
    }"#;

    const TREE_ARTIFACT: &str = r#"{
        "selected_features": ["Is", "Rs"],
        "scaler": { "kind": "identity" },
        "model": {
            "kind": "tree_ensemble",
            "weight": 0.5,
            "trees": [
                { "nodes": [
                    { "split": { "feature": 0, "threshold": 1.0, "left": 1, "right": 2 } },
                    { "leaf": { "value": 16.0 } },
                    { "leaf": { "value": 21.0 } }
                ] },
                { "nodes": [ { "leaf": { "value": 20.0 } } ] }
            ]
        }
    }"#;

    fn photometry(value: f64) -> PhotometricFeatures {
        PhotometricFeatures::from_means(&ChannelMeans {
            red: value,
            green: value,
            blue: value,
            pixel_count: 1,
        })
    }

    #[test]
    fn linear_artifact_scales_then_predicts() {
        let model = LoadedModel::from_json_str(LINEAR_ARTIFACT).unwrap();
        // Is = 1.0 for a mean of 0.1.
        let vector = engineer_features(&photometry(0.1), 0.16, 300.0, model.schema());
        let prediction = model.predict(&vector).unwrap();

        // ((1 - 1) / 2) * 1.5 + ((300 - 100) / 1) * 0.01 + 18
        assert!((prediction - 20.0).abs() < 1e-6);
        assert_eq!(model.info().model_name, "Ridge");
        assert_eq!(model.info().features.names, vec!["Is", "Altitude"]);
    }

    #[test]
    fn tree_ensemble_follows_thresholds() {
        let model = LoadedModel::from_json_str(TREE_ARTIFACT).unwrap();

        let bright = engineer_features(&photometry(0.5), 0.16, 0.0, model.schema());
        assert!((model.predict(&bright).unwrap() - 18.0).abs() < 1e-9);

        let dark = engineer_features(&photometry(0.001), 0.16, 0.0, model.schema());
        assert!((model.predict(&dark).unwrap() - 20.5).abs() < 1e-9);
    }

    #[test]
    fn vector_from_other_schema_is_a_mismatch() {
        let model = LoadedModel::from_json_str(LINEAR_ARTIFACT).unwrap();
        let other = Arc::new(FeatureSchema::new(["Is", "Rs", "Gs"]));
        let vector = engineer_features(&photometry(0.1), 0.16, 0.0, &other);

        match model.predict(&vector) {
            Err(AnalysisError::SchemaMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (2, 3));
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn scaler_width_must_match_schema() {
        let json = LINEAR_ARTIFACT.replace(r#""mean": [1.0, 100.0], "scale": [2.0, 0.0]"#, r#""mean": [1.0], "scale": [2.0]"#);
        assert!(matches!(LoadedModel::from_json_str(&json), Err(ModelLoadError::Invalid(_))));
    }

    #[test]
    fn backward_tree_edges_are_rejected() {
        let json = TREE_ARTIFACT.replace(r#""left": 1, "right": 2"#, r#""left": 0, "right": 2"#);
        assert!(matches!(LoadedModel::from_json_str(&json), Err(ModelLoadError::Invalid(_))));
    }

    #[test]
    fn hand_built_ensemble_is_validated() {
        let out_of_range = TreeEnsemble {
            base_score: 0.0,
            weight: 1.0,
            trees: vec![RegressionTree {
                nodes: vec![
                    TreeNode::Split {
                        feature: 5,
                        threshold: 1.0,
                        left: 1,
                        right: 2,
                    },
                    TreeNode::Leaf { value: 16.0 },
                    TreeNode::Leaf { value: 21.0 },
                ],
            }],
        };
        let err = LoadedModel::new(FeatureSchema::new(["Is"]), FeatureScaler::Identity, Box::new(out_of_range))
            .unwrap_err();
        assert!(matches!(err, ModelLoadError::Invalid(reason) if reason.contains("feature 5")));

        let cyclic = TreeEnsemble {
            base_score: 0.0,
            weight: 1.0,
            trees: vec![RegressionTree {
                nodes: vec![
                    TreeNode::Split {
                        feature: 0,
                        threshold: 1.0,
                        left: 0,
                        right: 1,
                    },
                    TreeNode::Leaf { value: 16.0 },
                ],
            }],
        };
        assert!(LoadedModel::new(FeatureSchema::new(["Is"]), FeatureScaler::Identity, Box::new(cyclic)).is_err());

        let empty = TreeEnsemble {
            base_score: 18.0,
            weight: 1.0,
            trees: Vec::new(),
        };
        assert!(LoadedModel::new(FeatureSchema::new(["Is"]), FeatureScaler::Identity, Box::new(empty)).is_err());
    }

    #[test]
    fn linear_width_must_match_schema() {
        let model = LinearModel {
            coefficients: vec![1.0, 2.0],
            intercept: 0.0,
        };
        let err = LoadedModel::new(FeatureSchema::new(["Is"]), FeatureScaler::Identity, Box::new(model)).unwrap_err();
        assert!(matches!(err, ModelLoadError::Invalid(_)));
    }

    #[test]
    fn garbage_artifact_is_a_parse_error() {
        assert!(matches!(LoadedModel::from_json_str("{ nope"), Err(ModelLoadError::Parse(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = LoadedModel::load(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(matches!(err, ModelLoadError::Io { .. }));
    }

    #[test]
    fn min_max_scaler_is_affine() {
        let scaler = FeatureScaler::MinMax {
            min: vec![-1.0, 0.0],
            scale: vec![0.5, 2.0],
        };
        assert_eq!(scaler.transform(&[4.0, 3.0]), vec![1.0, 6.0]);
    }
}
