// THEORY:
// This file is the entry point for the `nsb_vision` library crate. It estimates
// night-sky brightness (NSB) from a single photograph and maps the estimate to a
// light-pollution tier on a Bortle-like scale.
//
// The public surface is deliberately small: `NsbPipeline::analyze` for one
// image, `BatchAnalyzer` for many, and the status/model-info views. The
// `core_modules` hold each stage on its own (metadata, photometry, feature
// engineering, prediction, classification) so they can be tested in isolation.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod input;
pub mod parallel_pipeline;
pub mod pipeline;

pub use crate::core_modules::classifier::{PollutionTier, classify};
pub use crate::core_modules::predictor::{LoadedModel, ModelInfo};
pub use crate::error::{AnalysisError, FailureReport, ModelLoadError};
pub use crate::parallel_pipeline::BatchAnalyzer;
pub use crate::pipeline::{AnalysisRequest, AnalysisResult, NsbPipeline, PipelineConfig, ServiceStatus};
