//! Face box types.

use lipsync_models::{Pads, PixelRect};
use serde::{Deserialize, Serialize};

/// Detector output for one frame, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    /// Detection confidence [0, 1]
    pub score: f32,
}

impl FaceDetection {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32, score: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
            score,
        }
    }

    /// Grow by `pads` and clamp into a `width` x `height` frame.
    pub fn padded(&self, pads: &Pads, width: u32, height: u32) -> BoxCoords {
        BoxCoords {
            top: (self.top as f64 - pads.top as f64).max(0.0),
            bottom: (self.bottom as f64 + pads.bottom as f64).min(height as f64),
            left: (self.left as f64 - pads.left as f64).max(0.0),
            right: (self.right as f64 + pads.right as f64).min(width as f64),
        }
    }
}

/// Face box edges before truncation to pixels. Smoothing averages these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxCoords {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl BoxCoords {
    pub fn new(top: f64, bottom: f64, left: f64, right: f64) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    /// Truncate to whole pixels inside a `width` x `height` frame.
    ///
    /// `None` when nothing of the box is left.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let clamp = |v: f64, extent: u32| v.max(0.0).min(extent as f64) as u32;
        let rect = PixelRect::from_edges(
            clamp(self.top, height),
            clamp(self.bottom, height),
            clamp(self.left, width),
            clamp(self.right, width),
        )?;
        Some(BoundingBox(rect))
    }
}

impl From<PixelRect> for BoxCoords {
    fn from(rect: PixelRect) -> Self {
        Self::new(
            rect.top() as f64,
            rect.bottom() as f64,
            rect.left() as f64,
            rect.right() as f64,
        )
    }
}

/// Smoothed face box of one frame, in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox(pub PixelRect);

impl BoundingBox {
    pub fn rect(&self) -> PixelRect {
        self.0
    }

    /// `(top, bottom, left, right)`
    pub fn edges(&self) -> (u32, u32, u32, u32) {
        (self.0.top(), self.0.bottom(), self.0.left(), self.0.right())
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }
}
