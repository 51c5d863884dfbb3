//! ONNX Runtime session setup shared by the face detector and the generator.

use std::path::Path;

use lipsync_models::DevicePreference;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// Load a model, honouring the device hint where the build allows it.
///
/// A CUDA request falls back to CPU when the provider is unavailable; the
/// result does not depend on which device runs the graph.
pub fn create_session(model_path: &Path, device: DevicePreference, label: &str) -> MediaResult<Session> {
    if !model_path.is_file() {
        return Err(MediaError::model_not_found(model_path));
    }

    let model_bytes = std::fs::read(model_path)?;

    let builder = Session::builder()
        .map_err(|e| MediaError::inference(format!("Failed to create session builder: {e}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::inference(format!("Failed to set optimization level: {e}")))?;

    #[cfg(feature = "cuda")]
    if device != DevicePreference::Cpu {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!(model = label, "Using CUDA execution provider");
                return Ok(session);
            }
        }
        debug!(model = label, "CUDA execution provider not available, using CPU");
    }

    #[cfg(not(feature = "cuda"))]
    if device == DevicePreference::Cuda {
        debug!(model = label, "Built without CUDA support, using CPU");
    }

    info!(model = label, path = %model_path.display(), "Using CPU execution provider");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::inference(format!("Failed to load {label} model: {e}")))
}

/// Wrap a flat `f32` buffer as a tensor of `shape`.
pub fn tensor_from_vec(shape: Vec<usize>, data: Vec<f32>) -> MediaResult<Value> {
    Tensor::from_array((shape, data.into_boxed_slice()))
        .map(Value::from)
        .map_err(|e| MediaError::inference(format!("Failed to create tensor: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_resource_error() {
        let err = create_session(Path::new("/nonexistent/model.onnx"), DevicePreference::Auto, "test")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Resource);
    }
}
