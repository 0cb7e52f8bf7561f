//! Feature extraction for iris species classification.
//!
//! Turns a decoded record into the named feature mapping the classifier
//! consumes. Names match the columns the model was trained on.

use crate::types::record::FeatureRecord;
use std::collections::BTreeMap;

/// Named numeric model inputs.
pub type FeatureMap = BTreeMap<String, f64>;

/// Feature names in the order the model expects them.
pub const IRIS_FEATURES: [&str; 4] = ["sepal_length", "sepal_width", "petal_length", "petal_width"];

/// Feature extractor that maps records onto model input features.
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Create a new feature extractor.
    pub fn new() -> Self {
        Self
    }

    /// Extract the named features from a record.
    pub fn extract(&self, record: &FeatureRecord) -> FeatureMap {
        record
            .measurements()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        IRIS_FEATURES.len()
    }

    /// Get feature names in model order.
    pub fn feature_names(&self) -> Vec<&'static str> {
        IRIS_FEATURES.to_vec()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}
