//! The lip-sync generator behind a narrow tensor-in/tensor-out interface.

use std::path::Path;
use std::sync::Mutex;

use lipsync_models::{DevicePreference, Precision};
use ndarray::Array4;
use ort::session::Session;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::onnx::{create_session, tensor_from_vec};

/// Batched patch generator.
///
/// `faces` is `[B, 6, S, S]`, `mels` is `[B, 1, n_mels, step]`; the result is
/// `[B, 3, S, S]` in `[0, 1]`, same item count and order as the input.
pub trait InferenceAdapter: Send + Sync {
    fn infer(&self, faces: &Array4<f32>, mels: &Array4<f32>) -> MediaResult<Array4<f32>>;
}

/// Generator checkpoint executed with ONNX Runtime.
///
/// Inputs are positional: mel batch first, face batch second.
pub struct OrtLipSyncModel {
    session: Mutex<Session>,
    output_name: String,
}

impl OrtLipSyncModel {
    /// Load a checkpoint. The precision hint is logged only.
    pub fn load(path: &Path, device: DevicePreference, precision: Precision) -> MediaResult<Self> {
        let session = create_session(path, device, "lip-sync generator")?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| MediaError::inference("generator model declares no outputs"))?;

        if precision == Precision::Half {
            warn!("Half precision requested; the generator runs the graph as exported");
        }
        info!(
            checkpoint = %path.display(),
            device = %device,
            output = %output_name,
            "Lip-sync generator loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }
}

impl InferenceAdapter for OrtLipSyncModel {
    fn infer(&self, faces: &Array4<f32>, mels: &Array4<f32>) -> MediaResult<Array4<f32>> {
        let (batch, _, size, _) = faces.dim();
        if mels.dim().0 != batch {
            return Err(MediaError::inference(format!(
                "face batch has {batch} items but mel batch has {}",
                mels.dim().0
            )));
        }

        let face_tensor = tensor_from_vec(faces.shape().to_vec(), faces.iter().copied().collect())?;
        let mel_tensor = tensor_from_vec(mels.shape().to_vec(), mels.iter().copied().collect())?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![mel_tensor, face_tensor])
            .map_err(|e| MediaError::inference(format!("Generator inference failed: {e}")))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| MediaError::inference(format!("Missing {} tensor", self.output_name)))?;
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::inference(format!("Failed to extract patches: {e}")))?;

        debug!(batch, "Generator batch completed");

        Array4::from_shape_vec((batch, 3, size, size), data.to_vec()).map_err(|e| {
            MediaError::inference(format!("Unexpected generator output size {}: {e}", data.len()))
        })
    }
}
