//! Per-record enrichment: decode, classify, attach the label, encode.
//!
//! Failures never escape [`RecordTransformer::transform`]: a record that cannot
//! be decoded or classified is forwarded byte-for-byte so that every input
//! message still reaches the output subject.

use crate::error::RecordError;
use crate::feature_extractor::FeatureExtractor;
use crate::models::Classifier;
use crate::types::record;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A successfully classified record
#[derive(Debug, Clone, PartialEq)]
pub struct Enriched {
    pub payload: Vec<u8>,
    pub label: String,
}

/// What happened to one record
#[derive(Debug)]
pub enum Outcome {
    Classified(Enriched),
    PassedThrough {
        payload: Vec<u8>,
        error: RecordError,
    },
}

impl Outcome {
    /// The bytes to publish
    pub fn payload(&self) -> &[u8] {
        match self {
            Outcome::Classified(enriched) => &enriched.payload,
            Outcome::PassedThrough { payload, .. } => payload,
        }
    }

    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Outcome::Classified(enriched) => enriched.payload,
            Outcome::PassedThrough { payload, .. } => payload,
        }
    }
}

/// Stateless record transformer around a shared classifier handle
pub struct RecordTransformer {
    classifier: Arc<Classifier>,
    extractor: FeatureExtractor,
}

impl RecordTransformer {
    pub fn new(classifier: Arc<Classifier>) -> Self {
        Self {
            classifier,
            extractor: FeatureExtractor::new(),
        }
    }

    /// Enrich a raw payload, or report why it could not be enriched.
    pub fn enrich(&self, raw: &[u8]) -> Result<Enriched, RecordError> {
        let mut record = record::decode(raw)?;
        let features = self.extractor.extract(&record);

        let label = match self.classifier.predict(&features) {
            Ok(label) => label,
            Err(source) => return Err(RecordError::Prediction { source, features }),
        };

        if let Some(previous) = record.predicted_species.as_deref() {
            debug!(previous = %previous, label = %label, "Replacing label present on input");
        }
        record.predicted_species = Some(label.clone());

        Ok(Enriched {
            payload: record::encode(&record),
            label,
        })
    }

    /// Enrich a payload, falling back to the original bytes on failure.
    pub fn process(&self, raw: &[u8]) -> Outcome {
        match self.enrich(raw) {
            Ok(enriched) => {
                info!(label = %enriched.label, "Record classified");
                Outcome::Classified(enriched)
            }
            Err(error) => {
                match &error {
                    RecordError::Decode(e) => warn!(
                        kind = error.kind(),
                        error = %e,
                        payload = %e.payload(),
                        "Failed to decode record, passing it through"
                    ),
                    RecordError::Prediction { source, features } => error!(
                        kind = error.kind(),
                        error = %source,
                        features = ?features,
                        "Failed to classify record, passing it through"
                    ),
                }
                Outcome::PassedThrough {
                    payload: raw.to_vec(),
                    error,
                }
            }
        }
    }

    /// Bytes in, bytes out: the enriched record, or the input unchanged.
    pub fn transform(&self, raw: &[u8]) -> Vec<u8> {
        self.process(raw).into_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, PredictionError};
    use crate::feature_extractor::IRIS_FEATURES;
    use crate::models::{Prediction, Predictor};
    use crate::types::record::FeatureRecord;

    struct PetalStump;

    impl Predictor for PetalStump {
        fn predict(&self, row: &[f32]) -> Result<Prediction, PredictionError> {
            let label = if row[2] < 2.5 {
                "Iris-setosa"
            } else if row[2] < 4.9 {
                "Iris-versicolor"
            } else {
                "Iris-virginica"
            };
            Ok(Prediction::Categorical {
                label: label.to_string(),
                confidence: Some(1.0),
            })
        }
    }

    struct Broken;

    impl Predictor for Broken {
        fn predict(&self, _row: &[f32]) -> Result<Prediction, PredictionError> {
            Err(PredictionError::Inference("session unavailable".to_string()))
        }
    }

    fn transformer(predictor: impl Predictor + 'static) -> RecordTransformer {
        let classifier = Classifier::new(
            predictor,
            IRIS_FEATURES.iter().map(|n| n.to_string()).collect(),
            vec![
                "Iris-setosa".to_string(),
                "Iris-versicolor".to_string(),
                "Iris-virginica".to_string(),
            ],
        );
        RecordTransformer::new(Arc::new(classifier))
    }

    const SETOSA: &[u8] =
        br#"{"sepal_length":5.1,"sepal_width":3.5,"petal_length":1.4,"petal_width":0.2}"#;

    #[test]
    fn test_valid_record_is_labelled() {
        let output = transformer(PetalStump).transform(SETOSA);
        let record = record::decode(&output).unwrap();

        assert_eq!(record.predicted_species.as_deref(), Some("Iris-setosa"));
        assert_eq!(
            record,
            FeatureRecord::new(5.1, 3.5, 1.4, 0.2).with_label("Iris-setosa")
        );
    }

    #[test]
    fn test_transform_is_repeatable() {
        let transformer = transformer(PetalStump);
        assert_eq!(transformer.transform(SETOSA), transformer.transform(SETOSA));
    }

    #[test]
    fn test_non_numeric_field_passes_through() {
        let input =
            br#"{"sepal_length":"bad","sepal_width":3.5,"petal_length":1.4,"petal_width":0.2}"#;
        let transformer = transformer(PetalStump);

        assert_eq!(transformer.transform(input), input.to_vec());
        assert!(matches!(
            transformer.process(input),
            Outcome::PassedThrough {
                error: RecordError::Decode(DecodeError::Malformed { .. }),
                ..
            }
        ));
    }

    #[test]
    fn test_missing_field_passes_through() {
        let input = br#"{"sepal_length":5.1,"sepal_width":3.5,"petal_length":1.4}"#;
        assert_eq!(transformer(PetalStump).transform(input), input.to_vec());
    }

    #[test]
    fn test_garbage_passes_through() {
        let input = b"\xff\xfe not even utf-8";
        assert_eq!(transformer(PetalStump).transform(input), input.to_vec());
    }

    #[test]
    fn test_prediction_failure_passes_through() {
        let transformer = transformer(Broken);
        assert_eq!(transformer.transform(SETOSA), SETOSA.to_vec());

        match transformer.enrich(SETOSA) {
            Err(err @ RecordError::Prediction { .. }) => assert_eq!(err.kind(), "prediction"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_existing_label_is_replaced() {
        let input = br#"{"sepal_length":6.7,"sepal_width":3.0,"petal_length":5.2,"petal_width":2.3,"predicted_species":"Iris-setosa"}"#;
        let enriched = transformer(PetalStump).enrich(input).unwrap();
        assert_eq!(enriched.label, "Iris-virginica");

        let record = record::decode(&enriched.payload).unwrap();
        assert_eq!(record.predicted_species.as_deref(), Some("Iris-virginica"));
    }

    #[test]
    fn test_outcome_payload() {
        let transformer = transformer(PetalStump);
        let outcome = transformer.process(SETOSA);
        assert!(matches!(&outcome, Outcome::Classified(e) if e.label == "Iris-setosa"));
        assert_eq!(outcome.payload(), transformer.transform(SETOSA).as_slice());
    }
}
