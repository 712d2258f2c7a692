//! Runtime configuration: TOML file values override command-line values.

use crate::input::InputPolicy;
use crate::pipeline::PipelineConfig;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL_PATH: &str = "light_pollution_model.json";

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub model_path: Option<String>,
    pub workers: Option<usize>,
    pub default_altitude: Option<f64>,
    pub max_file_bytes: Option<u64>,
    pub allowed_extensions: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

/// Command-line values that can be overridden by the config file.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub model_path: Option<PathBuf>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model_path: PathBuf,
    /// `None` means one worker per CPU.
    pub workers: Option<usize>,
    pub pipeline: PipelineConfig,
    pub input: InputPolicy,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let model_path = file
            .model_path
            .map(PathBuf::from)
            .or_else(|| cli.model_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));

        let workers = file.workers.or(cli.workers);
        if workers == Some(0) {
            bail!("workers must be at least 1");
        }

        let default_altitude = file.default_altitude.unwrap_or(0.0);
        if !default_altitude.is_finite() {
            bail!("default_altitude must be a finite number of meters, got {}", default_altitude);
        }

        let defaults = InputPolicy::default();
        let input = InputPolicy {
            allowed_extensions: file
                .allowed_extensions
                .map(|exts| exts.into_iter().map(|e| e.trim_start_matches('.').to_ascii_lowercase()).collect())
                .unwrap_or(defaults.allowed_extensions),
            max_file_bytes: file.max_file_bytes.unwrap_or(defaults.max_file_bytes),
        };
        if input.allowed_extensions.is_empty() {
            bail!("allowed_extensions must not be empty");
        }

        Ok(Self {
            model_path,
            workers,
            pipeline: PipelineConfig { default_altitude },
            input,
        })
    }
}
