//! Classifier handle shared by every record transform.

use crate::config::ModelConfig;
use crate::error::{ModelLoadError, PredictionError};
use crate::feature_extractor::FeatureMap;
use crate::models::inference::{OnnxModel, Prediction, Predictor};
use crate::models::loader::{ModelLoader, ModelSource};
use std::path::PathBuf;
use tracing::info;

/// An immutable, loaded-once classification model.
///
/// Checks incoming features against the model's schema, runs the underlying
/// [`Predictor`] and narrows its output to a class label.
pub struct Classifier {
    predictor: Box<dyn Predictor>,
    feature_names: Vec<String>,
    classes: Vec<String>,
}

impl Classifier {
    /// Wrap an already-loaded predictor.
    pub fn new(
        predictor: impl Predictor + 'static,
        feature_names: Vec<String>,
        classes: Vec<String>,
    ) -> Self {
        Self {
            predictor: Box::new(predictor),
            feature_names,
            classes,
        }
    }

    /// Load the ONNX model named by the configuration.
    pub fn load(config: &ModelConfig) -> Result<Self, ModelLoadError> {
        Self::load_from(&ModelSource::Path(PathBuf::from(&config.path)), config)
    }

    /// Load an ONNX model from an explicit source, validating it against the
    /// configured feature schema with a probe prediction.
    pub fn load_from(source: &ModelSource, config: &ModelConfig) -> Result<Self, ModelLoadError> {
        if config.classes.is_empty() {
            return Err(ModelLoadError::SchemaMismatch(
                "no class labels configured".to_string(),
            ));
        }

        let loaded = ModelLoader::with_threads(config.onnx_threads).load(source)?;
        let classifier = Self::new(
            OnnxModel::new(loaded, config.classes.clone()),
            config.feature_names.clone(),
            config.classes.clone(),
        );
        classifier.probe()?;

        info!(
            source = %source,
            features = ?classifier.feature_names,
            classes = ?classifier.classes,
            "Classifier ready"
        );
        Ok(classifier)
    }

    /// Run one prediction on a unit row to prove the model accepts our schema.
    fn probe(&self) -> Result<(), ModelLoadError> {
        let row = vec![1.0_f32; self.feature_names.len()];
        match self.predictor.predict(&row) {
            Ok(Prediction::Categorical { .. }) => Ok(()),
            Ok(other) => Err(ModelLoadError::SchemaMismatch(format!(
                "model produces {} predictions, expected categorical",
                other.kind()
            ))),
            Err(e) => Err(ModelLoadError::SchemaMismatch(format!(
                "probe prediction with {} features failed: {}",
                self.feature_names.len(),
                e
            ))),
        }
    }

    /// Predict the class label for a set of named features.
    pub fn predict(&self, features: &FeatureMap) -> Result<String, PredictionError> {
        if features.len() != self.feature_names.len() {
            return Err(PredictionError::FeatureCount {
                expected: self.feature_names.len(),
                actual: features.len(),
            });
        }

        let mut row = Vec::with_capacity(self.feature_names.len());
        for name in &self.feature_names {
            let value = *features
                .get(name)
                .ok_or_else(|| PredictionError::MissingFeature(name.clone()))?;
            let input = value as f32;
            if !input.is_finite() {
                return Err(PredictionError::NonFinite {
                    name: name.clone(),
                    value,
                });
            }
            row.push(input);
        }

        match self.predictor.predict(&row)? {
            Prediction::Categorical { label, .. } if self.classes.contains(&label) => Ok(label),
            Prediction::Categorical { label, .. } => Err(PredictionError::Inference(format!(
                "model returned unknown class {label:?}"
            ))),
            other => Err(PredictionError::UnexpectedPrediction(other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::IRIS_FEATURES;
    use std::sync::Arc;

    /// Labels a row by its petal length, like the classic decision stump.
    struct PetalStump;

    impl Predictor for PetalStump {
        fn predict(&self, row: &[f32]) -> Result<Prediction, PredictionError> {
            let label = match row[2] {
                l if l < 2.5 => "Iris-setosa",
                l if l < 4.9 => "Iris-versicolor",
                _ => "Iris-virginica",
            };
            Ok(Prediction::Categorical {
                label: label.to_string(),
                confidence: None,
            })
        }
    }

    struct Fixed(Prediction);

    impl Predictor for Fixed {
        fn predict(&self, _row: &[f32]) -> Result<Prediction, PredictionError> {
            Ok(self.0.clone())
        }
    }

    fn names() -> Vec<String> {
        IRIS_FEATURES.iter().map(|n| n.to_string()).collect()
    }

    fn classes() -> Vec<String> {
        vec![
            "Iris-setosa".to_string(),
            "Iris-versicolor".to_string(),
            "Iris-virginica".to_string(),
        ]
    }

    fn features(values: [f64; 4]) -> FeatureMap {
        IRIS_FEATURES
            .iter()
            .zip(values)
            .map(|(n, v)| (n.to_string(), v))
            .collect()
    }

    #[test]
    fn test_predict_returns_label() {
        let classifier = Classifier::new(PetalStump, names(), classes());
        assert_eq!(
            classifier.predict(&features([5.1, 3.5, 1.4, 0.2])).unwrap(),
            "Iris-setosa"
        );
        assert_eq!(
            classifier.predict(&features([6.7, 3.0, 5.2, 2.3])).unwrap(),
            "Iris-virginica"
        );
    }

    #[test]
    fn test_wrong_feature_count() {
        let classifier = Classifier::new(PetalStump, names(), classes());
        let mut partial = features([5.1, 3.5, 1.4, 0.2]);
        partial.remove("petal_width");

        match classifier.predict(&partial) {
            Err(PredictionError::FeatureCount { expected, actual }) => {
                assert_eq!((expected, actual), (4, 3))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_wrong_feature_name() {
        let classifier = Classifier::new(PetalStump, names(), classes());
        let mut renamed = features([5.1, 3.5, 1.4, 0.2]);
        let value = renamed.remove("sepal_width").unwrap();
        renamed.insert("sepal_breadth".to_string(), value);

        assert!(matches!(
            classifier.predict(&renamed),
            Err(PredictionError::MissingFeature(name)) if name == "sepal_width"
        ));
    }

    #[test]
    fn test_non_finite_feature() {
        let classifier = Classifier::new(PetalStump, names(), classes());
        assert!(matches!(
            classifier.predict(&features([5.1, f64::NAN, 1.4, 0.2])),
            Err(PredictionError::NonFinite { .. })
        ));
        // Finite as f64 but overflows the model's f32 inputs
        assert!(matches!(
            classifier.predict(&features([5.1, 3.5, 1e300, 0.2])),
            Err(PredictionError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_numeric_prediction_rejected() {
        let classifier = Classifier::new(Fixed(Prediction::Numeric { score: 0.3 }), names(), classes());
        assert!(matches!(
            classifier.predict(&features([5.1, 3.5, 1.4, 0.2])),
            Err(PredictionError::UnexpectedPrediction("numeric"))
        ));
    }

    #[test]
    fn test_unknown_label_rejected() {
        let classifier = Classifier::new(
            Fixed(Prediction::Categorical {
                label: "Iris-unknown".to_string(),
                confidence: Some(0.5),
            }),
            names(),
            classes(),
        );
        assert!(classifier.predict(&features([5.1, 3.5, 1.4, 0.2])).is_err());
    }

    #[test]
    fn test_probe_rejects_numeric_model() {
        let classifier = Classifier::new(Fixed(Prediction::Numeric { score: 1.0 }), names(), classes());
        assert!(matches!(
            classifier.probe(),
            Err(ModelLoadError::SchemaMismatch(_))
        ));
        assert!(Classifier::new(PetalStump, names(), classes()).probe().is_ok());
    }

    #[test]
    fn test_load_missing_model_fails() {
        let config = ModelConfig {
            path: "/nonexistent/iris.onnx".to_string(),
            classes: classes(),
            feature_names: names(),
            onnx_threads: 1,
        };
        assert!(matches!(
            Classifier::load(&config),
            Err(ModelLoadError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_embedded_garbage_fails() {
        let config = ModelConfig {
            path: String::new(),
            classes: classes(),
            feature_names: names(),
            onnx_threads: 1,
        };
        let source = ModelSource::Embedded(b"\x08\x07 not an onnx graph");
        assert!(Classifier::load_from(&source, &config).is_err());
    }

    #[test]
    fn test_load_without_classes_fails() {
        let config = ModelConfig {
            path: "/nonexistent/iris.onnx".to_string(),
            classes: Vec::new(),
            feature_names: names(),
            onnx_threads: 1,
        };
        assert!(matches!(
            Classifier::load(&config),
            Err(ModelLoadError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_concurrent_predictions() {
        let classifier = Arc::new(Classifier::new(PetalStump, names(), classes()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let classifier = classifier.clone();
                std::thread::spawn(move || {
                    let petal_length = 1.0 + i as f64;
                    classifier
                        .predict(&features([5.0, 3.0, petal_length, 1.0]))
                        .unwrap()
                })
            })
            .collect();

        let labels: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(labels[0], "Iris-setosa");
        assert_eq!(labels[7], "Iris-virginica");
    }
}
