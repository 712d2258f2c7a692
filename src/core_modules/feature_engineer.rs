// THEORY:
// The feature engineer is the contract between the deterministic photometry and
// the trained model. The model was fit on a table whose columns had names like
// `R_G_ratio` or `Altitude_x_Is`, in a specific order, and only a subset of them
// survived feature selection. That ordered subset, the `FeatureSchema`, ships
// with the model artifact and is the only authority on what the vector looks
// like.
//
// Key principles:
// 1.  **Compute everything, select later**: all derived quantities are computed
//     on every request, regardless of what the schema asks for. Selection is a
//     pure lookup by name afterwards, so changing the schema never changes the
//     arithmetic.
// 2.  **Schema order wins**: the vector is built by walking the schema, never by
//     walking the computed values.
// 3.  **Unknown means zero**: a schema name with no computed counterpart yields
//     `0.0`. This is the *only* padding rule in the system; the predictor adapter
//     refuses vectors of the wrong length instead of padding them.

use crate::core_modules::photometry::{EPSILON, PhotometricFeatures};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Every feature name the engineer knows how to produce.
pub const KNOWN_FEATURES: [&str; 23] = [
    "Altitude",
    "Exposure time",
    "Is",
    "Rs",
    "Gs",
    "Bs",
    "R_G_ratio",
    "R_B_ratio",
    "G_B_ratio",
    "Total_Spectral_Energy",
    "Rs_norm",
    "Gs_norm",
    "Bs_norm",
    "Altitude_x_Exposure",
    "Altitude_x_Is",
    "log_Exposure",
    "log_Altitude",
    "Rs_squared",
    "Gs_squared",
    "Rs_Gs_interaction",
    "RGB_mean",
    "RGB_std",
    "RGB_range",
];

/// The ordered list of input names a trained predictor expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// A model input: one value per schema name, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema: Arc<FeatureSchema>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Value placed at the position of `name`, if the schema contains it.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.position(name).map(|i| self.values[i])
    }
}

/// All engineered quantities for one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedFeatures {
    pub altitude: f64,
    pub exposure_time: f64,
    pub is: f64,
    pub rs: f64,
    pub gs: f64,
    pub bs: f64,
    pub r_g_ratio: f64,
    pub r_b_ratio: f64,
    pub g_b_ratio: f64,
    pub total_spectral_energy: f64,
    pub rs_norm: f64,
    pub gs_norm: f64,
    pub bs_norm: f64,
    pub altitude_x_exposure: f64,
    pub altitude_x_is: f64,
    pub log_exposure: f64,
    pub log_altitude: f64,
    pub rs_squared: f64,
    pub gs_squared: f64,
    pub rs_gs_interaction: f64,
    pub rgb_mean: f64,
    pub rgb_std: f64,
    pub rgb_range: f64,
}

impl DerivedFeatures {
    pub fn compute(photometry: &PhotometricFeatures, exposure_time: f64, altitude: f64) -> Self {
        let PhotometricFeatures { rs, gs, bs, is, .. } = *photometry;
        let total = rs + gs + bs;
        let channels = [rs, gs, bs];

        Self {
            altitude,
            exposure_time,
            is,
            rs,
            gs,
            bs,
            // Spectral ratios
            r_g_ratio: rs / (gs + EPSILON),
            r_b_ratio: rs / (bs + EPSILON),
            g_b_ratio: gs / (bs + EPSILON),
            total_spectral_energy: total,
            rs_norm: rs / (total + EPSILON),
            gs_norm: gs / (total + EPSILON),
            bs_norm: bs / (total + EPSILON),
            // Altitude interactions
            altitude_x_exposure: altitude * exposure_time,
            altitude_x_is: altitude * is,
            log_exposure: exposure_time.ln_1p(),
            log_altitude: altitude.ln_1p(),
            // Polynomial terms
            rs_squared: rs * rs,
            gs_squared: gs * gs,
            rs_gs_interaction: rs * gs,
            // Cross-channel statistics
            rgb_mean: total / 3.0,
            rgb_std: sample_std(&channels),
            rgb_range: channels.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                - channels.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }

    /// Looks a feature up by its schema name.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        let value = match name {
            "Altitude" => self.altitude,
            "Exposure time" => self.exposure_time,
            "Is" => self.is,
            "Rs" => self.rs,
            "Gs" => self.gs,
            "Bs" => self.bs,
            "R_G_ratio" => self.r_g_ratio,
            "R_B_ratio" => self.r_b_ratio,
            "G_B_ratio" => self.g_b_ratio,
            "Total_Spectral_Energy" => self.total_spectral_energy,
            "Rs_norm" => self.rs_norm,
            "Gs_norm" => self.gs_norm,
            "Bs_norm" => self.bs_norm,
            "Altitude_x_Exposure" => self.altitude_x_exposure,
            "Altitude_x_Is" => self.altitude_x_is,
            "log_Exposure" => self.log_exposure,
            "log_Altitude" => self.log_altitude,
            "Rs_squared" => self.rs_squared,
            "Gs_squared" => self.gs_squared,
            "Rs_Gs_interaction" => self.rs_gs_interaction,
            "RGB_mean" => self.rgb_mean,
            "RGB_std" => self.rgb_std,
            "RGB_range" => self.rgb_range,
            _ => return None,
        };
        Some(value)
    }

    /// Lays the features out in schema order, `0.0` for unknown names.
    pub fn to_vector(&self, schema: &Arc<FeatureSchema>) -> FeatureVector {
        let values = schema
            .names()
            .iter()
            .map(|name| {
                self.value_of(name).unwrap_or_else(|| {
                    debug!("Feature {:?} is not computed, using 0.0", name);
                    0.0
                })
            })
            .collect();

        FeatureVector {
            schema: Arc::clone(schema),
            values,
        }
    }
}

/// Builds the model input for one image.
pub fn engineer_features(
    photometry: &PhotometricFeatures,
    exposure_time: f64,
    altitude: f64,
    schema: &Arc<FeatureSchema>,
) -> FeatureVector {
    DerivedFeatures::compute(photometry, exposure_time, altitude).to_vector(schema)
}

/// Sample standard deviation (n - 1 denominator).
fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}
