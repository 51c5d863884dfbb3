//! One smoothed face box per frame.

use std::sync::Arc;

use image::RgbImage;
use lipsync_models::PipelineConfig;
use tracing::{debug, info};

use super::detector::FaceDetector;
use super::models::{BoundingBox, BoxCoords};
use super::smoothing::smooth_boxes;
use crate::error::{MediaError, MediaResult};
use crate::frames::FrameSequence;

/// Smoothed boxes, one per decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceTrack {
    boxes: Vec<BoundingBox>,
}

impl FaceTrack {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn get(&self, frame_index: usize) -> Option<BoundingBox> {
        self.boxes.get(frame_index).copied()
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }
}

/// Finds the face in every frame, by detection or from a fixed box.
pub struct FaceLocator {
    detector: Option<Arc<dyn FaceDetector>>,
}

impl FaceLocator {
    /// Locator that runs `detector` unless the config carries a box override.
    pub fn new(detector: Option<Arc<dyn FaceDetector>>) -> Self {
        Self { detector }
    }

    /// Locate the face in every frame of `frames`.
    ///
    /// Still inputs hold a single frame, so the detector sees only that one.
    pub fn locate(&self, frames: &FrameSequence, config: &PipelineConfig) -> MediaResult<FaceTrack> {
        let Some(first) = frames.frames().first() else {
            return Ok(FaceTrack::new(Vec::new()));
        };

        if !config.face_box.uses_detector() {
            let rect = config.face_box.resolve(first.width(), first.height())?;
            info!(
                top = rect.top(),
                bottom = rect.bottom(),
                left = rect.left(),
                right = rect.right(),
                "Using fixed face box, detector skipped"
            );
            return Ok(FaceTrack::new(vec![BoundingBox(rect); frames.len()]));
        }

        let detector = self
            .detector
            .as_ref()
            .ok_or_else(|| MediaError::internal("face detection requested but no detector loaded"))?;

        let raw = self.detect_all(detector.as_ref(), frames, config)?;
        let smoothed = smooth_boxes(&raw, config.smoothing_window);

        let mut boxes = Vec::with_capacity(smoothed.len());
        for (index, (coords, frame)) in smoothed.iter().zip(frames.frames()).enumerate() {
            let bbox = coords
                .and_then(|c| c.to_pixels(frame.width(), frame.height()))
                .ok_or_else(|| {
                    MediaError::detection_failed(
                        index,
                        format!(
                            "no face detected within {} frames of it",
                            config.smoothing_window
                        ),
                    )
                })?;
            boxes.push(bbox);
        }

        info!(
            frames = boxes.len(),
            detected = raw.iter().filter(|r| r.is_some()).count(),
            window = config.smoothing_window,
            "Face track ready"
        );
        Ok(FaceTrack::new(boxes))
    }

    /// Raw padded boxes in frame order, batched for throughput only.
    fn detect_all(
        &self,
        detector: &dyn FaceDetector,
        frames: &FrameSequence,
        config: &PipelineConfig,
    ) -> MediaResult<Vec<Option<BoxCoords>>> {
        let all = frames.frames();
        let mut raw = Vec::with_capacity(all.len());

        for (batch_index, batch) in all.chunks(config.face_det_batch_size).enumerate() {
            let images: Vec<&RgbImage> = batch.iter().map(|f| f.image.as_ref()).collect();
            let detections = detector.detect(&images)?;

            if detections.len() != batch.len() {
                return Err(MediaError::inference(format!(
                    "face detector returned {} results for {} frames",
                    detections.len(),
                    batch.len()
                )));
            }

            raw.extend(detections.iter().zip(batch).map(|(det, frame)| {
                det.map(|d| d.padded(&config.pads, frame.width(), frame.height()))
            }));

            debug!(
                batch = batch_index,
                frames = batch.len(),
                "Detected faces"
            );
        }

        Ok(raw)
    }
}
