//! ONNX model loader

use crate::error::ModelLoadError;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::fmt;
use std::path::PathBuf;
use tracing::info;

/// Where a model artifact comes from
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// A file on the local filesystem
    Path(PathBuf),
    /// An artifact embedded in the binary, e.g. via `include_bytes!`
    Embedded(&'static [u8]),
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Path(path) => write!(f, "{}", path.display()),
            ModelSource::Embedded(bytes) => write!(f, "<embedded, {} bytes>", bytes.len()),
        }
    }
}

/// Loaded ONNX session with the names of its relevant inputs and outputs
pub struct LoadedModel {
    /// ONNX Runtime session
    pub session: Session,
    /// Name of the single feature tensor input
    pub input_name: String,
    /// Output carrying class ids, if the model exports one
    pub label_output: Option<String>,
    /// Output carrying class probabilities, if the model exports one
    pub probability_output: Option<String>,
}

/// Loader for ONNX models
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Self {
        Self {
            onnx_threads: onnx_threads.max(1),
        }
    }

    /// Load a model and locate its feature input and prediction outputs
    pub fn load(&self, source: &ModelSource) -> Result<LoadedModel, ModelLoadError> {
        if let ModelSource::Path(path) = source {
            if !path.is_file() {
                return Err(ModelLoadError::NotFound(path.clone()));
            }
        }

        info!(source = %source, threads = self.onnx_threads, "Loading ONNX model");

        let corrupt = |reason: String| ModelLoadError::Corrupt {
            location: source.to_string(),
            reason,
        };

        let builder = Session::builder()
            .map_err(runtime_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(runtime_error)?
            .with_intra_threads(self.onnx_threads)
            .map_err(runtime_error)?;

        let session = match source {
            ModelSource::Path(path) => builder.commit_from_file(path),
            ModelSource::Embedded(bytes) => builder.commit_from_memory(bytes),
        }
        .map_err(|e| corrupt(e.to_string()))?;

        if session.inputs.len() != 1 {
            return Err(ModelLoadError::SchemaMismatch(format!(
                "expected a single feature tensor input, model has {}",
                session.inputs.len()
            )));
        }
        let input_name = session.inputs[0].name.clone();

        let label_output = session
            .outputs
            .iter()
            .find(|o| o.name.contains("label"))
            .map(|o| o.name.clone());

        let probability_output = session
            .outputs
            .iter()
            .filter(|o| Some(&o.name) != label_output.as_ref())
            .find(|o| o.name.contains("prob") || o.name.contains("output"))
            .map(|o| o.name.clone());

        if label_output.is_none() && probability_output.is_none() {
            return Err(ModelLoadError::SchemaMismatch(
                "model exports neither a label nor a probability output".to_string(),
            ));
        }

        info!(
            input = %input_name,
            label_output = ?label_output,
            probability_output = ?probability_output,
            "Model loaded successfully"
        );

        Ok(LoadedModel {
            session,
            input_name,
            label_output,
            probability_output,
        })
    }
}

fn runtime_error(e: impl fmt::Display) -> ModelLoadError {
    ModelLoadError::Runtime(e.to_string())
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::with_threads(1)
    }
}
