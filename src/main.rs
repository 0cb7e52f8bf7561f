//! Iris Classification Pipeline - Main Entry Point
//!
//! Consumes iris records from NATS, classifies them with an ONNX model, and
//! publishes the labelled records.

use anyhow::{Context, Result};
use iris_classification_pipeline::{
    config::{AppConfig, LoggingConfig},
    models::Classifier,
    pipeline::{Pipeline, PipelineSettings, Topology},
    transformer::RecordTransformer,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    init_logging(&config.logging)?;
    info!("Starting Iris Classification Pipeline");
    info!(
        input = %config.nats.input_subject,
        output = %config.nats.output_subject,
        queue_group = %config.nats.queue_group,
        model = %config.model.path,
        "Configuration loaded"
    );

    // Everything below must succeed before a single record is consumed
    let classifier =
        Arc::new(Classifier::load(&config.model).context("Failed to load classifier model")?);
    let transformer = Arc::new(RecordTransformer::new(classifier));
    let topology = Topology::from_config(&config.nats)?;

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let mut pipeline = Pipeline::from_nats(
        client,
        &topology,
        transformer,
        PipelineSettings::from(&config.pipeline),
    )
    .await?;

    pipeline.run(wait_for_shutdown_signal()).await?;

    info!("Iris Classification Pipeline exited cleanly");
    Ok(())
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("iris_classification_pipeline={}", config.level))
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler, using SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl-C");
}
