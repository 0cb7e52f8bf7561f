//! Iris measurement records and their JSON wire encoding

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One iris measurement record as it flows through the pipeline.
///
/// Keys other than the four measurements and the label are carried along
/// untouched so that enrichment never loses upstream data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Sepal length in centimetres
    pub sepal_length: f64,

    /// Sepal width in centimetres
    pub sepal_width: f64,

    /// Petal length in centimetres
    pub petal_length: f64,

    /// Petal width in centimetres
    pub petal_width: f64,

    /// Species label attached by the classifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_species: Option<String>,

    /// Unrecognised keys, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeatureRecord {
    /// Create an unlabelled record from its four measurements.
    pub fn new(sepal_length: f64, sepal_width: f64, petal_length: f64, petal_width: f64) -> Self {
        Self {
            sepal_length,
            sepal_width,
            petal_length,
            petal_width,
            predicted_species: None,
            extra: Map::new(),
        }
    }

    /// Attach the predicted species.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.predicted_species = Some(label.into());
        self
    }

    /// Measurements paired with their wire names, in schema order.
    pub fn measurements(&self) -> [(&'static str, f64); 4] {
        [
            ("sepal_length", self.sepal_length),
            ("sepal_width", self.sepal_width),
            ("petal_length", self.petal_length),
            ("petal_width", self.petal_width),
        ]
    }
}

/// Parse a JSON payload into a [`FeatureRecord`].
///
/// All four measurements must be present and positive.
pub fn decode(bytes: &[u8]) -> Result<FeatureRecord, DecodeError> {
    let record: FeatureRecord =
        serde_json::from_slice(bytes).map_err(|source| DecodeError::Malformed {
            payload: String::from_utf8_lossy(bytes).into_owned(),
            source,
        })?;

    for (field, value) in record.measurements() {
        if !value.is_finite() || value <= 0.0 {
            return Err(DecodeError::InvalidMeasurement {
                payload: String::from_utf8_lossy(bytes).into_owned(),
                field,
                value,
            });
        }
    }

    Ok(record)
}

/// Serialize a record to compact JSON, including the label when set.
pub fn encode(record: &FeatureRecord) -> Vec<u8> {
    // Every field is a plain number, string or JSON value; serialization cannot fail.
    serde_json::to_vec(record).unwrap_or_default()
}
