//! One-hop streaming topology: input subject → transformer → output subject.
//!
//! A [`Pipeline`] moves through `Configured → Running → Stopped` exactly once.
//! Records are processed on spawned tasks bounded by a semaphore; on shutdown
//! the input stream is dropped at once, in-flight records get until the
//! shutdown deadline to finish, and the sink is flushed within the same
//! deadline.

use crate::config::{NatsConfig, PipelineConfig};
use crate::consumer::RecordConsumer;
use crate::error::PipelineError;
use crate::metrics::{MetricsReporter, PipelineMetrics};
use crate::producer::RecordProducer;
use crate::transformer::RecordTransformer;
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Destination for processed records
#[async_trait]
pub trait RecordSink: Send + Sync + 'static {
    async fn publish(&self, payload: Bytes) -> Result<(), PipelineError>;

    /// Wait until everything published so far has left the process.
    async fn flush(&self) -> Result<(), PipelineError>;
}

/// Validated subject wiring for one pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub input_subject: String,
    pub output_subject: String,
    pub queue_group: String,
}

impl Topology {
    pub fn new(
        input_subject: &str,
        output_subject: &str,
        queue_group: &str,
    ) -> Result<Self, PipelineError> {
        for (name, value) in [
            ("input subject", input_subject),
            ("output subject", output_subject),
            ("queue group", queue_group),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::InvalidTopology(format!("{name} is empty")));
            }
        }
        if input_subject == output_subject {
            return Err(PipelineError::InvalidTopology(format!(
                "input and output subject are both {input_subject:?}"
            )));
        }

        Ok(Self {
            input_subject: input_subject.to_string(),
            output_subject: output_subject.to_string(),
            queue_group: queue_group.to_string(),
        })
    }

    pub fn from_config(config: &NatsConfig) -> Result<Self, PipelineError> {
        Self::new(
            &config.input_subject,
            &config.output_subject,
            &config.queue_group,
        )
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{}]-> {}",
            self.input_subject, self.queue_group, self.output_subject
        )
    }
}

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Configured,
    Running,
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Configured => "configured",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }
}

/// Runtime knobs for a pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Maximum number of records in flight
    pub workers: usize,
    /// Upper bound on draining and flushing after a stop
    pub shutdown_timeout: Duration,
    /// Period of the metrics summary, if any
    pub report_interval_secs: Option<u64>,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers,
            shutdown_timeout: config.shutdown_timeout(),
            report_interval_secs: Some(config.report_interval_secs),
        }
    }
}

/// A single-stage streaming job
pub struct Pipeline<S, K> {
    state: PipelineState,
    source: Option<S>,
    sink: Arc<K>,
    transformer: Arc<RecordTransformer>,
    metrics: Arc<PipelineMetrics>,
    settings: PipelineSettings,
}

impl Pipeline<BoxStream<'static, Bytes>, RecordProducer> {
    /// Subscribe to the topology's input subject and wire it to its output subject.
    pub async fn from_nats(
        client: Client,
        topology: &Topology,
        transformer: Arc<RecordTransformer>,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        let consumer =
            RecordConsumer::new(client.clone(), &topology.input_subject, &topology.queue_group);
        let producer = RecordProducer::new(client, &topology.output_subject);
        let source = consumer.subscribe().await?;

        info!(topology = %topology, "Topology built");
        Ok(Self::new(transformer, source, producer, settings))
    }
}

impl<S, K> Pipeline<S, K>
where
    S: Stream<Item = Bytes> + Unpin + Send,
    K: RecordSink,
{
    pub fn new(
        transformer: Arc<RecordTransformer>,
        source: S,
        sink: K,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            state: PipelineState::Configured,
            source: Some(source),
            sink: Arc::new(sink),
            transformer,
            metrics: Arc::new(PipelineMetrics::new()),
            settings,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Process records until `shutdown` resolves, the sink fails, or the
    /// input stream ends, then stop.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()>,
    {
        if self.state != PipelineState::Configured {
            return Err(PipelineError::InvalidState(self.state.as_str()));
        }
        let Some(mut source) = self.source.take() else {
            return Err(PipelineError::InvalidState(self.state.as_str()));
        };

        self.state = PipelineState::Running;
        info!(
            workers = self.settings.workers,
            shutdown_timeout_ms = self.settings.shutdown_timeout.as_millis() as u64,
            "Pipeline running"
        );

        let reporter = self.settings.report_interval_secs.map(|secs| {
            tokio::spawn(MetricsReporter::new(self.metrics.clone(), secs).start())
        });

        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks: JoinSet<Result<(), PipelineError>> = JoinSet::new();
        let mut result = Ok(());
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received, no longer consuming records");
                    break;
                }

                Some(joined) = tasks.join_next() => {
                    if let Err(e) = task_result(joined) {
                        error!(error = %e, "Record processing failed, stopping pipeline");
                        result = Err(e);
                        break;
                    }
                }

                next = async {
                    let permit = semaphore.clone().acquire_owned().await.ok();
                    (permit, source.next().await)
                } => {
                    match next {
                        (Some(permit), Some(payload)) => {
                            self.metrics.record_received();
                            let transformer = self.transformer.clone();
                            let sink = self.sink.clone();
                            let metrics = self.metrics.clone();

                            tasks.spawn(async move {
                                let _permit = permit;
                                process_record(&transformer, sink.as_ref(), &metrics, payload).await
                            });
                        }
                        (_, None) => {
                            warn!("Input subscription closed");
                            result = Err(PipelineError::SubscriptionClosed);
                            break;
                        }
                        (None, Some(_)) => {
                            result = Err(PipelineError::Task("worker semaphore closed".to_string()));
                            break;
                        }
                    }
                }
            }
        }

        // Unsubscribe before draining so nothing new arrives
        drop(source);
        let stopped = self.stop(tasks).await;
        if let Some(reporter) = reporter {
            reporter.abort();
        }
        self.metrics.print_summary();
        self.state = PipelineState::Stopped;
        info!("Pipeline stopped");

        result.and(stopped)
    }

    /// Drain in-flight records and flush the sink, bounded by the shutdown timeout.
    async fn stop(
        &self,
        mut tasks: JoinSet<Result<(), PipelineError>>,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.shutdown_timeout;
        let mut result = Ok(());

        info!(in_flight = tasks.len(), "Draining in-flight records");
        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = task_result(joined) {
                    error!(error = %e, "Record failed while draining");
                    result = Err(e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                aborted = tasks.len(),
                "Shutdown timeout elapsed, aborting in-flight records"
            );
            tasks.abort_all();
        }
        drop(tasks);

        match tokio::time::timeout_at(deadline, self.sink.flush()).await {
            Ok(Ok(())) => debug!("Output flushed"),
            Ok(Err(e)) => {
                error!(error = %e, "Failed to flush output");
                result = result.and(Err(e));
            }
            Err(_) => warn!("Shutdown timeout elapsed before output was flushed"),
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline resources released"
        );
        result
    }
}

/// Transform one record and publish the result. Only sink failures are errors.
async fn process_record<K: RecordSink>(
    transformer: &RecordTransformer,
    sink: &K,
    metrics: &PipelineMetrics,
    payload: Bytes,
) -> Result<(), PipelineError> {
    let start = Instant::now();
    let outcome = transformer.process(&payload);
    metrics.record_outcome(&outcome, start.elapsed());

    match sink.publish(Bytes::from(outcome.into_payload())).await {
        Ok(()) => {
            metrics.record_published();
            Ok(())
        }
        Err(e) => {
            metrics.record_publish_failure();
            Err(e)
        }
    }
}

fn task_result(joined: Result<Result<(), PipelineError>, JoinError>) -> Result<(), PipelineError> {
    joined.map_err(|e| PipelineError::Task(e.to_string()))?
}
