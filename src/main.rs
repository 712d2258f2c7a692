use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use nsb_vision::config::{self, AppConfig, FileConfig};
use nsb_vision::{AnalysisRequest, AnalysisResult, BatchAnalyzer, FailureReport, NsbPipeline, classify};

#[derive(Parser, Debug)]
#[clap(version, about = "Night-sky brightness and light-pollution estimation from photographs")]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the JSON model artifact.
    #[clap(long, global = true)]
    model: Option<PathBuf>,

    /// Number of concurrent analysis workers (default: one per CPU).
    #[clap(long, global = true)]
    workers: Option<usize>,

    /// Pretty-print JSON output.
    #[clap(long, global = true)]
    pretty: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one or more photographs.
    Analyze {
        /// Image files (png, jpg, jpeg).
        #[clap(required = true)]
        images: Vec<PathBuf>,

        /// Exposure time in seconds, overriding the EXIF value.
        #[clap(long)]
        exposure_time: Option<f64>,

        /// Capture altitude in meters.
        #[clap(long)]
        altitude: Option<f64>,
    },
    /// Report whether the model is loaded.
    Status,
    /// Describe the loaded model.
    ModelInfo,
    /// Print the pollution tier for an NSB score.
    Classify {
        #[clap(allow_negative_numbers = true)]
        nsb: f64,
    },
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            model_path: args.model.clone(),
            workers: args.workers,
        }
    }
}

#[derive(Serialize)]
struct SuccessEnvelope<'a> {
    success: bool,
    timestamp: String,
    #[serde(flatten)]
    result: &'a AnalysisResult,
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Classification needs no model.
    if let Command::Classify { nsb } = &cli_args.command {
        return print_json(classify(*nsb), cli_args.pretty);
    }

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    let pipeline = NsbPipeline::from_artifact(&app_config.model_path, app_config.pipeline.clone());

    match cli_args.command {
        Command::Status => print_json(&pipeline.status(), cli_args.pretty),
        Command::ModelInfo => match pipeline.model_info() {
            Some(model_info) => print_json(&model_info, cli_args.pretty),
            None => {
                let reason = pipeline.status().reason.unwrap_or_default();
                print_json(&FailureReport::new("model_unavailable_error", reason), cli_args.pretty)?;
                std::process::exit(1);
            }
        },
        Command::Analyze {
            images,
            exposure_time,
            altitude,
        } => {
            let failed = analyze_files(&pipeline, &app_config, images, exposure_time, altitude, cli_args.pretty).await?;
            if failed > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Classify { .. } => Ok(()),
    }
}

/// Prints one JSON document per image, returning how many failed.
async fn analyze_files(
    pipeline: &NsbPipeline,
    app_config: &AppConfig,
    images: Vec<PathBuf>,
    exposure_override: Option<f64>,
    altitude: Option<f64>,
    pretty: bool,
) -> Result<usize> {
    let mut reports: Vec<Option<FailureReport>> = Vec::with_capacity(images.len());
    let mut requests = Vec::new();

    for path in &images {
        match app_config.input.read(path).await {
            Ok(image_bytes) => {
                reports.push(None);
                requests.push(AnalysisRequest {
                    image_bytes,
                    exposure_override,
                    altitude,
                });
            }
            Err(err) => {
                reports.push(Some(FailureReport::new(err.kind(), format!("{}: {}", path.display(), err))));
            }
        }
    }

    let analyzer = BatchAnalyzer::new(pipeline.clone(), app_config.workers);
    info!("Analyzing {} image(s) with {} worker(s)", requests.len(), analyzer.worker_count());
    let mut outcomes = analyzer.analyze_all(requests).await.into_iter();

    let mut failed = 0;
    for report in reports {
        let report = match report {
            Some(report) => Err(report),
            None => match outcomes.next() {
                Some(Ok(result)) => Ok(result),
                Some(Err(err)) => Err(FailureReport::from(&err)),
                None => Err(FailureReport::new("internal_error", "missing analysis outcome")),
            },
        };

        match report {
            Ok(result) => print_json(
                &SuccessEnvelope {
                    success: true,
                    timestamp: Utc::now().to_rfc3339(),
                    result: &result,
                },
                pretty,
            )?,
            Err(report) => {
                failed += 1;
                print_json(&report, pretty)?;
            }
        }
    }

    Ok(failed)
}
