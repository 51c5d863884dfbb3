//! Shared data models for the lip-sync pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Pipeline run configuration and quality presets
//! - Crop, padding and face-box geometry
//! - Model checkpoint and device selection
//! - Encoding configuration
//! - Job requests, outcomes and progress updates

pub mod device;
pub mod encoding;
pub mod geometry;
pub mod job;
pub mod pipeline;
pub mod progress;

// Re-export common types
pub use device::{DeviceKind, DevicePreference, DeviceSettings, ModelVariant, Precision};
pub use encoding::EncodingConfig;
pub use geometry::{BoxOverride, CropRect, Pads, PixelRect};
pub use job::{JobId, JobOutcome, JobState, LipSyncJob};
pub use pipeline::{PipelineConfig, QualityPreset, MEL_FRAMES_PER_SECOND};
pub use progress::ProgressUpdate;

use thiserror::Error;

/// Invalid configuration value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}
