//! Run configuration for the lip-sync pipeline.
//!
//! A single `PipelineConfig` value is built once per run and handed by
//! reference to every stage. Nothing in the pipeline mutates it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::device::{DevicePreference, ModelVariant, Precision};
use crate::encoding::EncodingConfig;
use crate::geometry::{BoxOverride, CropRect, Pads};
use crate::ConfigError;

/// Mel frames per second of audio at the fixed 16 kHz rate and 200-sample hop.
pub const MEL_FRAMES_PER_SECOND: f64 = 80.0;

/// Configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === Input ===
    /// Frame rate used for a static image input (ignored for video)
    pub fps: f64,

    /// Treat the input as a single still frame even if it is a video
    pub static_input: bool,

    /// Output frame height before `resize_factor` (None keeps the source height)
    pub out_height: Option<u32>,

    /// Integer downscale applied after `out_height`
    pub resize_factor: u32,

    /// Rotate each frame 90 degrees clockwise after resizing
    pub rotate: bool,

    /// Crop applied after resize and rotation
    pub crop: CropRect,

    // === Face localisation ===
    /// Padding added around each detected face
    pub pads: Pads,

    /// Explicit face rectangle; the sentinel runs the detector
    pub face_box: BoxOverride,

    /// Frames per detector call
    pub face_det_batch_size: usize,

    /// Minimum detector confidence for a face to count
    pub detection_threshold: f32,

    /// Temporal smoothing window length in frames
    pub smoothing_window: usize,

    // === Generator ===
    /// Items per inference call
    pub batch_size: usize,

    /// Square face crop edge fed to the generator
    pub img_size: u32,

    /// Mel columns per chunk
    pub mel_step_size: usize,

    pub model: ModelVariant,
    pub device: DevicePreference,
    pub precision: Precision,

    // === Output ===
    pub encoding: EncodingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fps: 25.0,
            static_input: false,
            out_height: Some(480),
            resize_factor: 1,
            rotate: false,
            crop: CropRect::FULL,
            pads: Pads::default(),
            face_box: BoxOverride::DETECT,
            face_det_batch_size: 16,
            detection_threshold: 0.5,
            smoothing_window: 5,
            batch_size: 128,
            img_size: 96,
            mel_step_size: 16,
            model: ModelVariant::Standard,
            device: DevicePreference::Auto,
            precision: Precision::Full,
            encoding: EncodingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Check every field for values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(ConfigError::invalid("fps", format!("must be positive, got {}", self.fps)));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.face_det_batch_size == 0 {
            return Err(ConfigError::invalid("face_det_batch_size", "must be at least 1"));
        }
        if self.resize_factor == 0 {
            return Err(ConfigError::invalid("resize_factor", "must be at least 1"));
        }
        if self.out_height == Some(0) {
            return Err(ConfigError::invalid("out_height", "must be positive"));
        }
        if self.smoothing_window == 0 {
            return Err(ConfigError::invalid("smoothing_window", "must be at least 1"));
        }
        if self.img_size < 2 || self.img_size % 2 != 0 {
            return Err(ConfigError::invalid(
                "img_size",
                format!("must be a positive even number, got {}", self.img_size),
            ));
        }
        if self.mel_step_size == 0 {
            return Err(ConfigError::invalid("mel_step_size", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(ConfigError::invalid(
                "detection_threshold",
                format!("must be within [0, 1], got {}", self.detection_threshold),
            ));
        }
        Ok(())
    }

    /// Mel column at which chunk `index` starts for a given frame rate.
    pub fn mel_start_for(index: usize, fps: f64) -> usize {
        (index as f64 * MEL_FRAMES_PER_SECOND / fps).floor() as usize
    }

    /// Apply a quality preset on top of this configuration.
    pub fn with_preset(mut self, preset: QualityPreset) -> Self {
        let (batch, det_batch, height, fps) = preset.values();
        self.batch_size = batch;
        self.face_det_batch_size = det_batch;
        self.out_height = Some(height);
        self.fps = fps;
        self
    }
}

/// Speed/quality trade-off presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    #[default]
    Fast,
    Balanced,
    Quality,
}

impl QualityPreset {
    /// `(batch_size, face_det_batch_size, out_height, fps)`
    fn values(&self) -> (usize, usize, u32, f64) {
        match self {
            QualityPreset::Fast => (128, 256, 360, 24.0),
            QualityPreset::Balanced => (96, 128, 540, 25.0),
            QualityPreset::Quality => (64, 64, 720, 30.0),
        }
    }
}

impl FromStr for QualityPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "quality" => Ok(Self::Quality),
            other => Err(ConfigError::invalid("preset", format!("unknown preset '{other}'"))),
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityPreset::Fast => "fast",
            QualityPreset::Balanced => "balanced",
            QualityPreset::Quality => "quality",
        };
        f.write_str(s)
    }
}
