//! Error types for each failure domain of the pipeline.

use crate::feature_extractor::FeatureMap;
use std::path::PathBuf;
use thiserror::Error;

/// A payload that could not be turned into a [`FeatureRecord`](crate::FeatureRecord).
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed record: {source}")]
    Malformed {
        payload: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field} must be a positive finite number, got {value}")]
    InvalidMeasurement {
        payload: String,
        field: &'static str,
        value: f64,
    },
}

impl DecodeError {
    /// The raw payload that failed to decode, lossily converted to UTF-8.
    pub fn payload(&self) -> &str {
        match self {
            DecodeError::Malformed { payload, .. } => payload,
            DecodeError::InvalidMeasurement { payload, .. } => payload,
        }
    }
}

/// Failures while loading the model artifact. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model artifact not found at {0}")]
    NotFound(PathBuf),
    #[error("model artifact {location} could not be loaded: {reason}")]
    Corrupt { location: String, reason: String },
    #[error("model is incompatible with the feature schema: {0}")]
    SchemaMismatch(String),
    #[error("failed to initialize the inference runtime: {0}")]
    Runtime(String),
}

/// Failures while classifying a single record. Never fatal.
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("expected {expected} features, got {actual}")]
    FeatureCount { expected: usize, actual: usize },
    #[error("missing feature {0}")]
    MissingFeature(String),
    #[error("feature {name} is not finite: {value}")]
    NonFinite { name: String, value: f64 },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model produced a {0} prediction, expected a categorical label")]
    UnexpectedPrediction(&'static str),
}

/// Any per-record failure. Recovered by passing the original payload through.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{source}")]
    Prediction {
        #[source]
        source: PredictionError,
        features: FeatureMap,
    },
}

impl RecordError {
    /// Short name of the failure kind, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::Decode(_) => "decode",
            RecordError::Prediction { .. } => "prediction",
        }
    }
}

/// Infrastructure failures of the running pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("pipeline is {0}, expected configured")]
    InvalidState(&'static str),
    #[error("failed to subscribe to {subject}: {reason}")]
    Subscribe { subject: String, reason: String },
    #[error("failed to publish to {subject}: {reason}")]
    Publish { subject: String, reason: String },
    #[error("failed to flush output: {0}")]
    Flush(String),
    #[error("input subscription closed unexpectedly")]
    SubscriptionClosed,
    #[error("record task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_keeps_payload() {
        let source = serde_json::from_str::<f64>("\"bad\"").unwrap_err();
        let err = DecodeError::Malformed {
            payload: "{\"sepal_length\":\"bad\"}".to_string(),
            source,
        };
        assert_eq!(err.payload(), "{\"sepal_length\":\"bad\"}");
        assert!(err.to_string().starts_with("malformed record"));
    }

    #[test]
    fn test_record_error_kind() {
        let err = RecordError::Prediction {
            source: PredictionError::MissingFeature("petal_width".into()),
            features: FeatureMap::new(),
        };
        assert_eq!(err.kind(), "prediction");
        assert_eq!(err.to_string(), "missing feature petal_width");
    }
}
