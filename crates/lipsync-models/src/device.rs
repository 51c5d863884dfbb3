//! Model checkpoint selection and execution-device hints.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geometry::Pads;
use crate::ConfigError;

/// Which trained checkpoint drives the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Plain lip-sync checkpoint
    #[default]
    Standard,
    /// Higher visual quality checkpoint trained with a discriminator
    Gan,
}

impl ModelVariant {
    /// File name of the exported checkpoint inside the checkpoint directory.
    pub fn checkpoint_file_name(&self) -> &'static str {
        match self {
            ModelVariant::Standard => "wav2lip.onnx",
            ModelVariant::Gan => "wav2lip_gan.onnx",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelVariant::Standard => "Standard Model",
            ModelVariant::Gan => "GAN Model",
        }
    }
}

/// Requested execution device. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for DevicePreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(ConfigError::invalid("device", format!("unknown device '{other}'"))),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DevicePreference::Auto => "auto",
            DevicePreference::Cpu => "cpu",
            DevicePreference::Cuda => "cuda",
        };
        f.write_str(s)
    }
}

/// Requested numeric precision. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Full,
    Half,
}

/// Device a run actually resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Cpu,
    Cuda,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => f.write_str("cpu"),
            DeviceKind::Cuda => f.write_str("cuda"),
        }
    }
}

/// Processing settings tuned for the device a job runs on.
///
/// GPU runs afford larger batches and a higher output resolution; CPU runs
/// trade resolution for wall-clock time and get a longer time budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub batch_size: usize,
    pub out_height: u32,
    pub fps: f64,
    /// Scale filter argument for input pre-optimisation (`W:H`)
    pub video_scale: String,
    pub video_preset: String,
    pub video_crf: u8,
    pub pads: Pads,
    pub estimated_time: String,
    pub timeout: Duration,
}

impl DeviceSettings {
    pub fn for_device(device: DeviceKind) -> Self {
        match device {
            DeviceKind::Cuda => Self {
                batch_size: 128,
                out_height: 720,
                fps: 30.0,
                video_scale: "1280:720".to_string(),
                video_preset: "fast".to_string(),
                video_crf: 23,
                pads: Pads::new(0, 10, 0, 10),
                estimated_time: "5-15 minutes".to_string(),
                timeout: Duration::from_secs(1800),
            },
            DeviceKind::Cpu => Self {
                batch_size: 16,
                out_height: 540,
                fps: 25.0,
                video_scale: "960:540".to_string(),
                video_preset: "medium".to_string(),
                video_crf: 25,
                pads: Pads::new(0, 20, 0, 20),
                estimated_time: "15-30 minutes".to_string(),
                timeout: Duration::from_secs(3600),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_names() {
        assert_eq!(ModelVariant::Standard.checkpoint_file_name(), "wav2lip.onnx");
        assert_eq!(ModelVariant::Gan.checkpoint_file_name(), "wav2lip_gan.onnx");
    }

    #[test]
    fn test_device_preference_parse() {
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_gets_longer_budget() {
        let cpu = DeviceSettings::for_device(DeviceKind::Cpu);
        let gpu = DeviceSettings::for_device(DeviceKind::Cuda);
        assert!(cpu.timeout > gpu.timeout);
        assert!(cpu.batch_size < gpu.batch_size);
        assert_eq!(cpu.pads, Pads::new(0, 20, 0, 20));
    }
}
