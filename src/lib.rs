//! Iris Classification Pipeline Library
//!
//! Consumes iris measurement records from NATS, labels each one with the
//! species predicted by an ONNX classifier, and republishes it.

pub mod config;
pub mod consumer;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod transformer;
pub mod types;

pub use config::AppConfig;
pub use consumer::RecordConsumer;
pub use error::{DecodeError, ModelLoadError, PipelineError, PredictionError, RecordError};
pub use feature_extractor::{FeatureExtractor, FeatureMap};
pub use models::{Classifier, Prediction, Predictor};
pub use pipeline::{Pipeline, PipelineSettings, PipelineState, RecordSink, Topology};
pub use producer::RecordProducer;
pub use transformer::{Outcome, RecordTransformer};
pub use types::record::FeatureRecord;
