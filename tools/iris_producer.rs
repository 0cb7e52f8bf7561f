//! Iris Record Producer
//!
//! Generates and publishes iris measurement records to NATS for pipeline
//! testing, with an optional share of malformed records to exercise the
//! pass-through path.

use anyhow::Context;
use iris_classification_pipeline::types::record::{encode, FeatureRecord};
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Per-species measurement means, from the classic Fisher data set
const SPECIES_MEANS: [(&str, [f64; 4]); 3] = [
    ("Iris-setosa", [5.01, 3.43, 1.46, 0.25]),
    ("Iris-versicolor", [5.94, 2.77, 4.26, 1.33]),
    ("Iris-virginica", [6.59, 2.97, 5.55, 2.03]),
];

/// Record generator for testing
struct RecordGenerator {
    rng: rand::rngs::ThreadRng,
}

impl RecordGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    /// Generate a plausible record near one species' means
    fn generate_valid(&mut self) -> (&'static str, Vec<u8>) {
        let (species, means) = SPECIES_MEANS[self.rng.gen_range(0..SPECIES_MEANS.len())];
        let mut jitter = |mean: f64| (mean + self.rng.gen_range(-0.2..0.2)).max(0.1);
        let record = FeatureRecord::new(
            round(jitter(means[0])),
            round(jitter(means[1])),
            round(jitter(means[2])),
            round(jitter(means[3])),
        );
        (species, encode(&record))
    }

    /// Generate a record the pipeline must pass through unchanged
    fn generate_malformed(&mut self) -> Vec<u8> {
        let samples: [&[u8]; 3] = [
            br#"{"sepal_length":"bad","sepal_width":3.5,"petal_length":1.4,"petal_width":0.2}"#,
            br#"{"sepal_length":5.1,"sepal_width":3.5,"petal_length":1.4}"#,
            b"not json at all",
        ];
        samples[self.rng.gen_range(0..samples.len())].to_vec()
    }
}

fn round(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("iris_producer=info".parse()?),
        )
        .init();

    info!("Starting Iris Record Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("iris");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let malformed_rate: f64 = args
        .get(4)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.05_f64)
        .clamp(0.0, 1.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        malformed_rate = malformed_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, malformed_rate, delay_ms).await;
        }
    };

    let mut generator = RecordGenerator::new();
    let mut rng = rand::thread_rng();
    let mut valid_count = 0;
    let mut malformed_count = 0;

    info!("Starting to publish {} records...", count);

    for i in 0..count {
        let payload = if rng.gen_bool(malformed_rate) {
            malformed_count += 1;
            generator.generate_malformed()
        } else {
            valid_count += 1;
            generator.generate_valid().1
        };

        client
            .publish(subject.to_string(), payload.into())
            .await
            .context("Failed to publish record")?;

        if (i + 1) % 10 == 0 {
            info!(
                "Published {}/{} records ({} valid, {} malformed)",
                i + 1,
                count,
                valid_count,
                malformed_count
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    client.flush().await.context("Failed to flush NATS client")?;

    info!(
        "Completed! Published {} records ({} valid, {} malformed)",
        count, valid_count, malformed_count
    );

    Ok(())
}

async fn run_dry_mode(count: u64, malformed_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = RecordGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let (species, payload) = if rng.gen_bool(malformed_rate) {
            ("malformed", generator.generate_malformed())
        } else {
            generator.generate_valid()
        };

        if (i + 1) % 10 == 0 || i == 0 {
            info!(
                "Sample record {} ({}): {}",
                i + 1,
                species,
                String::from_utf8_lossy(&payload)
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
