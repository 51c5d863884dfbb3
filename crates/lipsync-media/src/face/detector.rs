//! Face detection backends.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::imageops::{self, FilterType};
use image::RgbImage;
use lipsync_models::DevicePreference;
use ort::session::Session;
use tracing::{debug, info};

use super::models::FaceDetection;
use crate::error::{MediaError, MediaResult};
use crate::onnx::{create_session, tensor_from_vec};

/// Batched single-face detector.
///
/// Returns one entry per input frame, in order: the highest-confidence face
/// above the detector's threshold, or `None`.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frames: &[&RgbImage]) -> MediaResult<Vec<Option<FaceDetection>>>;
}

/// Configuration for the ONNX face detector.
#[derive(Debug, Clone)]
pub struct FaceDetectorConfig {
    /// Path to ONNX model file
    pub model_path: PathBuf,
    /// Confidence threshold for detections
    pub confidence_threshold: f32,
    /// Model input width
    pub input_width: u32,
    /// Model input height
    pub input_height: u32,
    pub device: DevicePreference,
}

impl Default for FaceDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/face_detection/version-RFB-320.onnx"),
            confidence_threshold: 0.5,
            input_width: 320,
            input_height: 240,
            device: DevicePreference::Auto,
        }
    }
}

/// UltraFace-style detector (`scores [B,N,2]`, `boxes [B,N,4]` normalised corners).
///
/// The model must accept a dynamic batch axis.
pub struct OnnxFaceDetector {
    session: Mutex<Session>,
    config: FaceDetectorConfig,
}

impl OnnxFaceDetector {
    pub fn new(config: FaceDetectorConfig) -> MediaResult<Self> {
        let session = Mutex::new(create_session(&config.model_path, config.device, "face detector")?);
        info!(
            model_path = %config.model_path.display(),
            input_width = config.input_width,
            input_height = config.input_height,
            threshold = config.confidence_threshold,
            "Face detector initialized"
        );
        Ok(Self { session, config })
    }

    pub fn config(&self) -> &FaceDetectorConfig {
        &self.config
    }

    /// Resize every frame to the model input and pack as `[B,3,H,W]`, `(px-127)/128`.
    fn preprocess(&self, frames: &[&RgbImage]) -> Vec<f32> {
        let (w, h) = (self.config.input_width, self.config.input_height);
        let plane = (w * h) as usize;
        let mut data = vec![0.0f32; frames.len() * 3 * plane];

        for (b, frame) in frames.iter().enumerate() {
            let resized = imageops::resize(*frame, w, h, FilterType::Triangle);
            let base = b * 3 * plane;
            for (i, pixel) in resized.pixels().enumerate() {
                for c in 0..3 {
                    data[base + c * plane + i] = (pixel[c] as f32 - 127.0) / 128.0;
                }
            }
        }
        data
    }

    fn run(&self, input: Vec<f32>, batch: usize) -> MediaResult<(Vec<f32>, Vec<f32>)> {
        let shape = vec![
            batch,
            3,
            self.config.input_height as usize,
            self.config.input_width as usize,
        ];
        let tensor = tensor_from_vec(shape, input)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| MediaError::inference(format!("Face detection failed: {e}")))?;

        let extract = |name: &str| -> MediaResult<Vec<f32>> {
            let value = outputs
                .get(name)
                .ok_or_else(|| MediaError::inference(format!("Missing {name} tensor")))?;
            let tensor = value
                .try_extract_tensor::<f32>()
                .map_err(|e| MediaError::inference(format!("Failed to extract {name}: {e}")))?;
            Ok(tensor.1.to_vec())
        };

        Ok((extract("scores")?, extract("boxes")?))
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, frames: &[&RgbImage]) -> MediaResult<Vec<Option<FaceDetection>>> {
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let input = self.preprocess(frames);
        let (scores, boxes) = self.run(input, frames.len())?;

        let results = select_best_faces(
            &scores,
            &boxes,
            frames,
            self.config.confidence_threshold,
        )?;

        debug!(
            batch = frames.len(),
            found = results.iter().filter(|r| r.is_some()).count(),
            "Face detection batch completed"
        );
        Ok(results)
    }
}

/// Pick the best candidate per frame from flattened model outputs.
fn select_best_faces(
    scores: &[f32],
    boxes: &[f32],
    frames: &[&RgbImage],
    threshold: f32,
) -> MediaResult<Vec<Option<FaceDetection>>> {
    let batch = frames.len();
    if batch == 0 || scores.len() % (batch * 2) != 0 {
        return Err(MediaError::inference(format!(
            "Unexpected scores size {} for batch {batch}",
            scores.len()
        )));
    }
    let candidates = scores.len() / (batch * 2);
    if boxes.len() != batch * candidates * 4 {
        return Err(MediaError::inference(format!(
            "Unexpected boxes size {}, expected {}",
            boxes.len(),
            batch * candidates * 4
        )));
    }

    let mut results = Vec::with_capacity(batch);
    for (b, frame) in frames.iter().enumerate() {
        let (w, h) = (frame.width() as f32, frame.height() as f32);
        let mut best: Option<(usize, f32)> = None;

        for n in 0..candidates {
            let face_score = scores[(b * candidates + n) * 2 + 1];
            if face_score >= threshold && best.map_or(true, |(_, s)| face_score > s) {
                best = Some((n, face_score));
            }
        }

        results.push(best.map(|(n, score)| {
            let o = (b * candidates + n) * 4;
            FaceDetection::new(
                (boxes[o] * w).clamp(0.0, w),
                (boxes[o + 1] * h).clamp(0.0, h),
                (boxes[o + 2] * w).clamp(0.0, w),
                (boxes[o + 3] * h).clamp(0.0, h),
                score,
            )
        }));
    }
    Ok(results)
}

/// Check if a detector model exists at `path`.
pub fn is_model_available_at(path: &Path) -> bool {
    path.is_file()
}
