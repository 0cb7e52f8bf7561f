//! Model predictions and the ONNX Runtime predictor

use crate::error::PredictionError;
use crate::models::loader::LoadedModel;
use ort::memory::Allocator;
use ort::session::SessionOutputs;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

/// Result of a single model invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// A class label, with the winning probability when the model reports one
    Categorical {
        label: String,
        confidence: Option<f32>,
    },
    /// A single numeric score (regressors, single-output models)
    Numeric { score: f64 },
}

impl Prediction {
    /// Short name of the prediction kind
    pub fn kind(&self) -> &'static str {
        match self {
            Prediction::Categorical { .. } => "categorical",
            Prediction::Numeric { .. } => "numeric",
        }
    }
}

/// A loaded model that maps an ordered feature row to a prediction.
///
/// Implementations must be safe to call from many tasks at once.
pub trait Predictor: Send + Sync {
    fn predict(&self, row: &[f32]) -> Result<Prediction, PredictionError>;
}

/// Predictor backed by an ONNX Runtime session
pub struct OnnxModel {
    /// Session runs need exclusive access
    model: Mutex<LoadedModel>,
    /// Class labels indexed by class id
    classes: Vec<String>,
}

impl OnnxModel {
    pub fn new(model: LoadedModel, classes: Vec<String>) -> Self {
        Self {
            model: Mutex::new(model),
            classes,
        }
    }

    /// Turn session outputs into a prediction, preferring an explicit label
    fn interpret(
        &self,
        outputs: &SessionOutputs,
        label_output: Option<&str>,
        probability_output: Option<&str>,
    ) -> Result<Prediction, PredictionError> {
        let scores = probability_output
            .and_then(|name| outputs.get(name))
            .map(extract_scores);

        if let Some(key) = label_output
            .and_then(|name| outputs.get(name))
            .and_then(extract_label)
        {
            let scores = scores
                .as_ref()
                .and_then(|s| s.as_ref().ok())
                .map(Vec::as_slice);
            return from_label(key, scores, &self.classes);
        }

        match scores.transpose()? {
            Some(scores) => from_scores(scores, &self.classes),
            None => Err(PredictionError::Inference(
                "model produced no usable label or probability output".into(),
            )),
        }
    }
}

/// Class named by a model output: an index into the configured classes, or
/// the label itself for models trained on string targets
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ClassKey {
    Id(i64),
    Name(String),
}

impl ClassKey {
    fn resolve(self, classes: &[String]) -> Result<String, PredictionError> {
        match self {
            ClassKey::Id(class_id) => class_label(classes, class_id),
            ClassKey::Name(name) => Ok(name),
        }
    }
}

fn class_label(classes: &[String], class_id: i64) -> Result<String, PredictionError> {
    usize::try_from(class_id)
        .ok()
        .and_then(|idx| classes.get(idx))
        .cloned()
        .ok_or_else(|| {
            PredictionError::Inference(format!(
                "class id {} outside the {} configured classes",
                class_id,
                classes.len()
            ))
        })
}

/// Highest score wins; on a tie the earlier entry is kept
fn argmax<K>(scores: impl IntoIterator<Item = (K, f32)>) -> Option<(K, f32)> {
    scores
        .into_iter()
        .fold(None, |best: Option<(K, f32)>, (key, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((key, score)),
        })
}

fn from_label(
    key: ClassKey,
    scores: Option<&[(ClassKey, f32)]>,
    classes: &[String],
) -> Result<Prediction, PredictionError> {
    let confidence = scores
        .and_then(|scores| scores.iter().find(|(k, _)| *k == key))
        .map(|(_, score)| *score);
    Ok(Prediction::Categorical {
        label: key.resolve(classes)?,
        confidence,
    })
}

/// A single column is a score, anything wider is a class distribution
fn from_scores(
    scores: Vec<(ClassKey, f32)>,
    classes: &[String],
) -> Result<Prediction, PredictionError> {
    if let [(_, score)] = scores.as_slice() {
        return Ok(Prediction::Numeric {
            score: *score as f64,
        });
    }

    let (key, confidence) = argmax(scores)
        .ok_or_else(|| PredictionError::Inference("empty probability output".into()))?;
    Ok(Prediction::Categorical {
        label: key.resolve(classes)?,
        confidence: Some(confidence),
    })
}

/// First entry of an int64 or string label tensor
fn extract_label(output: &DynValue) -> Option<ClassKey> {
    if let Ok((_, ids)) = output.try_extract_tensor::<i64>() {
        return ids.first().copied().map(ClassKey::Id);
    }
    if let Ok((_, names)) = output.try_extract_strings() {
        return names.into_iter().next().map(ClassKey::Name);
    }
    None
}

/// Per-class scores from either a tensor or a seq(map) output
fn extract_scores(output: &DynValue) -> Result<Vec<(ClassKey, f32)>, PredictionError> {
    if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
        return Ok(data
            .iter()
            .enumerate()
            .map(|(id, &prob)| (ClassKey::Id(id as i64), prob))
            .collect());
    }

    let dtype = output.dtype();
    if DynSequenceValueType::can_downcast(&dtype) {
        return extract_from_sequence_map(output);
    }

    Err(PredictionError::Inference(format!(
        "unsupported probability output type {dtype:?}"
    )))
}

/// Extract probabilities from seq(map(int64, float)) or seq(map(string, float)),
/// as exported by scikit-learn classifiers
fn extract_from_sequence_map(output: &DynValue) -> Result<Vec<(ClassKey, f32)>, PredictionError> {
    let allocator = Allocator::default();
    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| PredictionError::Inference(format!("not a sequence: {e}")))?;

    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .map_err(inference_error)?;

    // Batch size is always 1
    let map_value = maps
        .first()
        .ok_or_else(|| PredictionError::Inference("empty probability sequence".into()))?;

    let mut scores: Vec<(ClassKey, f32)> = match map_value.try_extract_key_values::<i64, f32>() {
        Ok(pairs) => pairs
            .into_iter()
            .map(|(id, prob)| (ClassKey::Id(id), prob))
            .collect(),
        Err(_) => map_value
            .try_extract_key_values::<String, f32>()
            .map_err(inference_error)?
            .into_iter()
            .map(|(name, prob)| (ClassKey::Name(name), prob))
            .collect(),
    };
    scores.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(scores)
}

fn inference_error(e: impl fmt::Display) -> PredictionError {
    PredictionError::Inference(e.to_string())
}

impl Predictor for OnnxModel {
    fn predict(&self, row: &[f32]) -> Result<Prediction, PredictionError> {
        let shape = vec![1_i64, row.len() as i64];
        let input_tensor = Tensor::from_array((shape, row.to_vec()))
            .map_err(|e| PredictionError::Inference(format!("failed to create input tensor: {e}")))?;

        let mut model = self
            .model
            .lock()
            .map_err(|e| PredictionError::Inference(format!("lock error: {e}")))?;
        let model = &mut *model;

        let outputs = model
            .session
            .run(ort::inputs![&model.input_name => input_tensor])
            .map_err(inference_error)?;

        let prediction = self.interpret(
            &outputs,
            model.label_output.as_deref(),
            model.probability_output.as_deref(),
        )?;
        debug!(prediction = ?prediction, "Model inference complete");
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_kind() {
        let categorical = Prediction::Categorical {
            label: "Iris-setosa".to_string(),
            confidence: Some(0.97),
        };
        assert_eq!(categorical.kind(), "categorical");
        assert_eq!(Prediction::Numeric { score: 0.4 }.kind(), "numeric");
    }

    fn classes() -> Vec<String> {
        vec![
            "Iris-setosa".to_string(),
            "Iris-versicolor".to_string(),
            "Iris-virginica".to_string(),
        ]
    }

    fn ids(probs: &[f32]) -> Vec<(ClassKey, f32)> {
        probs
            .iter()
            .enumerate()
            .map(|(id, &p)| (ClassKey::Id(id as i64), p))
            .collect()
    }

    #[test]
    fn test_class_label_indexes_classes() {
        assert_eq!(class_label(&classes(), 0).unwrap(), "Iris-setosa");
        assert_eq!(class_label(&classes(), 2).unwrap(), "Iris-virginica");
        assert!(matches!(
            class_label(&classes(), 3),
            Err(PredictionError::Inference(_))
        ));
        assert!(matches!(
            class_label(&classes(), -1),
            Err(PredictionError::Inference(_))
        ));
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(vec![(0, 0.1), (1, 0.7), (2, 0.2)]), Some((1, 0.7)));
        // Ties keep the lowest class
        assert_eq!(argmax(vec![(0, 0.4), (1, 0.4), (2, 0.2)]), Some((0, 0.4)));
        assert_eq!(argmax(Vec::<(i64, f32)>::new()), None);
    }

    #[test]
    fn test_label_id_resolves_with_confidence() {
        let scores = ids(&[0.05, 0.9, 0.05]);
        let prediction = from_label(ClassKey::Id(1), Some(&scores), &classes()).unwrap();
        assert_eq!(
            prediction,
            Prediction::Categorical {
                label: "Iris-versicolor".to_string(),
                confidence: Some(0.9),
            }
        );

        let prediction = from_label(ClassKey::Id(2), None, &classes()).unwrap();
        assert_eq!(
            prediction,
            Prediction::Categorical {
                label: "Iris-virginica".to_string(),
                confidence: None,
            }
        );
    }

    #[test]
    fn test_label_id_outside_classes_fails() {
        assert!(from_label(ClassKey::Id(7), None, &classes()).is_err());
        assert!(from_label(ClassKey::Id(-2), None, &classes()).is_err());
    }

    #[test]
    fn test_string_label_used_directly() {
        let scores = vec![
            (ClassKey::Name("Iris-setosa".to_string()), 0.8),
            (ClassKey::Name("Iris-versicolor".to_string()), 0.15),
            (ClassKey::Name("Iris-virginica".to_string()), 0.05),
        ];
        let prediction = from_label(
            ClassKey::Name("Iris-setosa".to_string()),
            Some(&scores),
            &classes(),
        )
        .unwrap();
        assert_eq!(
            prediction,
            Prediction::Categorical {
                label: "Iris-setosa".to_string(),
                confidence: Some(0.8),
            }
        );
    }

    #[test]
    fn test_probability_tensor_argmax() {
        let prediction = from_scores(ids(&[0.1, 0.2, 0.7]), &classes()).unwrap();
        assert_eq!(
            prediction,
            Prediction::Categorical {
                label: "Iris-virginica".to_string(),
                confidence: Some(0.7),
            }
        );
    }

    #[test]
    fn test_string_keyed_probabilities_argmax() {
        let scores = vec![
            (ClassKey::Name("Iris-setosa".to_string()), 0.1),
            (ClassKey::Name("Iris-versicolor".to_string()), 0.6),
            (ClassKey::Name("Iris-virginica".to_string()), 0.3),
        ];
        match from_scores(scores, &classes()).unwrap() {
            Prediction::Categorical { label, .. } => assert_eq!(label, "Iris-versicolor"),
            other => panic!("unexpected prediction: {other:?}"),
        }
    }

    #[test]
    fn test_single_column_is_numeric() {
        assert_eq!(
            from_scores(ids(&[0.42]), &classes()).unwrap(),
            Prediction::Numeric {
                score: 0.42_f32 as f64
            }
        );
    }

    #[test]
    fn test_empty_or_oversized_probabilities_fail() {
        assert!(matches!(
            from_scores(Vec::new(), &classes()),
            Err(PredictionError::Inference(_))
        ));
        // Four classes scored against three configured labels
        assert!(from_scores(ids(&[0.1, 0.1, 0.1, 0.7]), &classes()).is_err());
    }
}
