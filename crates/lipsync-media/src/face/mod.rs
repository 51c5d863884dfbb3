//! Face localisation: detection, padding, temporal smoothing.

mod detector;
mod locator;
mod models;
mod smoothing;

pub use detector::{is_model_available_at, FaceDetector, FaceDetectorConfig, OnnxFaceDetector};
pub use locator::{FaceLocator, FaceTrack};
pub use models::{BoundingBox, BoxCoords, FaceDetection};
pub use smoothing::smooth_boxes;
