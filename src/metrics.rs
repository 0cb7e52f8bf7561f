//! Throughput and outcome statistics for the classification pipeline.

use crate::error::RecordError;
use crate::transformer::Outcome;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Records pulled from the input subject
    pub records_received: AtomicU64,
    /// Records enriched with a label
    pub records_classified: AtomicU64,
    /// Records forwarded unchanged because they did not decode
    pub decode_failures: AtomicU64,
    /// Records forwarded unchanged because classification failed
    pub prediction_failures: AtomicU64,
    /// Records written to the output subject
    pub records_published: AtomicU64,
    /// Records that could not be written to the output subject
    pub publish_failures: AtomicU64,
    /// Classified records per label
    labels: RwLock<HashMap<String, u64>>,
    /// Transform times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            records_received: AtomicU64::new(0),
            records_classified: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            prediction_failures: AtomicU64::new(0),
            records_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            labels: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a transform ended and how long it took
    pub fn record_outcome(&self, outcome: &Outcome, processing_time: Duration) {
        match outcome {
            Outcome::Classified(enriched) => {
                self.records_classified.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut labels) = self.labels.write() {
                    *labels.entry(enriched.label.clone()).or_insert(0) += 1;
                }
            }
            Outcome::PassedThrough {
                error: RecordError::Decode(_),
                ..
            } => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::PassedThrough {
                error: RecordError::Prediction { .. },
                ..
            } => {
                self.prediction_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }
    }

    pub fn record_published(&self) {
        self.records_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records forwarded without a label, for any reason
    pub fn passed_through(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
            + self.prediction_failures.load(Ordering::Relaxed)
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let times = self
            .processing_times
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: sorted[count - 1],
        }
    }

    /// Get current throughput (records per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.records_received.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get classified records per label
    pub fn get_label_counts(&self) -> HashMap<String, u64> {
        self.labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let received = self.records_received.load(Ordering::Relaxed);
        let classified = self.records_classified.load(Ordering::Relaxed);
        let classified_rate = if received > 0 {
            (classified as f64 / received as f64) * 100.0
        } else {
            0.0
        };
        let processing = self.get_processing_stats();

        info!(
            received,
            classified,
            classified_pct = format!("{:.1}", classified_rate),
            decode_failures = self.decode_failures.load(Ordering::Relaxed),
            prediction_failures = self.prediction_failures.load(Ordering::Relaxed),
            published = self.records_published.load(Ordering::Relaxed),
            publish_failures = self.publish_failures.load(Ordering::Relaxed),
            throughput = format!("{:.1} rec/s", self.get_throughput()),
            "Pipeline summary"
        );
        info!(
            mean_us = processing.mean_us,
            p50_us = processing.p50_us,
            p95_us = processing.p95_us,
            p99_us = processing.p99_us,
            max_us = processing.max_us,
            "Transform latency"
        );

        let mut labels: Vec<(String, u64)> = self.get_label_counts().into_iter().collect();
        labels.sort();
        for (label, count) in labels {
            info!(label = %label, count, "Species predicted");
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Periodic metrics summary logger
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
