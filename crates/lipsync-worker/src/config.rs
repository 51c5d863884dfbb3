//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use lipsync_models::DevicePreference;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Parent directory for per-job scratch areas
    pub work_dir: PathBuf,
    /// Directory holding `wav2lip.onnx` / `wav2lip_gan.onnx`
    pub checkpoint_dir: PathBuf,
    /// ONNX face detector model
    pub detector_model: PathBuf,
    /// Job timeout; `None` uses the device-tuned budget
    pub job_timeout: Option<Duration>,
    /// Default device when a job does not ask for one
    pub device: DevicePreference,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("lipsync"),
            checkpoint_dir: PathBuf::from("checkpoints"),
            detector_model: PathBuf::from("models/face_detection/version-RFB-320.onnx"),
            job_timeout: None,
            device: DevicePreference::Auto,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            work_dir: lookup("LIPSYNC_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            checkpoint_dir: lookup("LIPSYNC_CHECKPOINT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint_dir),
            detector_model: lookup("LIPSYNC_DETECTOR_MODEL")
                .map(PathBuf::from)
                .unwrap_or(defaults.detector_model),
            job_timeout: lookup("LIPSYNC_JOB_TIMEOUT")
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            device: lookup("LIPSYNC_DEVICE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = WorkerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.checkpoint_dir, PathBuf::from("checkpoints"));
        assert!(config.job_timeout.is_none());
        assert_eq!(config.device, DevicePreference::Auto);
    }

    #[test]
    fn test_reads_every_variable() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("LIPSYNC_WORK_DIR", "/data/work"),
            ("LIPSYNC_CHECKPOINT_DIR", "/models/ckpt"),
            ("LIPSYNC_DETECTOR_MODEL", "/models/face.onnx"),
            ("LIPSYNC_JOB_TIMEOUT", "900"),
            ("LIPSYNC_DEVICE", "cuda"),
        ]));
        assert_eq!(config.work_dir, PathBuf::from("/data/work"));
        assert_eq!(config.checkpoint_dir, PathBuf::from("/models/ckpt"));
        assert_eq!(config.detector_model, PathBuf::from("/models/face.onnx"));
        assert_eq!(config.job_timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.device, DevicePreference::Cuda);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("LIPSYNC_JOB_TIMEOUT", "soon"),
            ("LIPSYNC_DEVICE", "tpu"),
        ]));
        assert!(config.job_timeout.is_none());
        assert_eq!(config.device, DevicePreference::Auto);
    }
}
