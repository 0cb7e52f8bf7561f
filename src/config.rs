//! Configuration management for the classification pipeline

use crate::feature_extractor::IRIS_FEATURES;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "IRIS_PIPELINE_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
const ENV_PREFIX: &str = "IRIS_PIPELINE";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub model: ModelConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection and topology configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject carrying raw iris records
    pub input_subject: String,
    /// Subject receiving classified records
    pub output_subject: String,
    /// Queue group shared by all pipeline instances
    pub queue_group: String,
}

/// Classifier model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Path to the ONNX model artifact
    pub path: String,
    /// Class labels, indexed by the model's class ids
    pub classes: Vec<String>,
    /// Input feature names in model order
    #[serde(default = "default_feature_names")]
    pub feature_names: Vec<String>,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_onnx_threads() -> usize {
    1
}

fn default_feature_names() -> Vec<String> {
    IRIS_FEATURES.iter().map(|name| name.to_string()).collect()
}

fn default_classes() -> Vec<String> {
    ["Iris-setosa", "Iris-versicolor", "Iris-virginica"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

/// Pipeline runtime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of records processed concurrently
    pub workers: usize,
    /// Upper bound on graceful shutdown, in milliseconds
    pub shutdown_timeout_ms: u64,
    /// Interval between metrics summaries, in seconds
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

fn default_report_interval() -> u64 {
    30
}

impl PipelineConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from the default file, or the one named by `IRIS_PIPELINE_CONFIG`
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path, with `IRIS_PIPELINE__*` overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be at least 1");
        }
        if self.model.classes.is_empty() {
            bail!("model.classes must name at least one class");
        }
        if self.model.feature_names != default_feature_names() {
            bail!(
                "model.feature_names must be {:?}, got {:?}",
                IRIS_FEATURES,
                self.model.feature_names
            );
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                input_subject: "iris".to_string(),
                output_subject: "iris-classified".to_string(),
                queue_group: "iris-classifier".to_string(),
            },
            model: ModelConfig {
                path: "models/iris.onnx".to_string(),
                classes: default_classes(),
                feature_names: default_feature_names(),
                onnx_threads: 1,
            },
            pipeline: PipelineConfig {
                workers: 4,
                shutdown_timeout_ms: 5000,
                report_interval_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}
