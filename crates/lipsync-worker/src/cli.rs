//! Command-line surface of the worker binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use lipsync_models::{
    BoxOverride, CropRect, DevicePreference, LipSyncJob, ModelVariant, Pads, PipelineConfig,
    Precision, QualityPreset,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Lip-sync a face video or still image to a speech track.
#[derive(Debug, Parser)]
#[command(name = "lipsync-worker", version, about)]
pub struct Cli {
    /// Video (mp4/avi/mov/mkv/webm) or image (jpg/png) containing the face
    pub face: PathBuf,

    /// Speech track (wav/mp3/m4a/aac/flac/ogg/opus) or a video to take the audio from
    pub audio: PathBuf,

    /// Where to write the result
    #[arg(short, long, default_value = "results/result_voice.mp4")]
    pub outfile: PathBuf,

    /// Directory holding the generator checkpoints
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Use the GAN-trained checkpoint
    #[arg(long)]
    pub gan: bool,

    /// Speed/quality preset applied before the explicit options below
    #[arg(long, value_parser = parse_preset)]
    pub preset: Option<QualityPreset>,

    /// Frame rate for a still image input
    #[arg(long)]
    pub fps: Option<f64>,

    /// Padding around the detected face: top bottom left right
    #[arg(long, num_args = 4, value_names = ["TOP", "BOTTOM", "LEFT", "RIGHT"])]
    pub pads: Option<Vec<i64>>,

    /// Items per generator call
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Frames per face detector call
    #[arg(long)]
    pub face_det_batch_size: Option<usize>,

    /// Integer downscale applied after --out-height
    #[arg(long)]
    pub resize_factor: Option<u32>,

    /// Output frame height; 0 keeps the source height
    #[arg(long)]
    pub out_height: Option<u32>,

    /// Crop rectangle: top bottom left right, -1 for the full extent
    #[arg(long, num_args = 4, allow_negative_numbers = true, value_names = ["TOP", "BOTTOM", "LEFT", "RIGHT"])]
    pub crop: Option<Vec<i64>>,

    /// Fixed face box: top bottom left right; -1 on all runs the detector
    #[arg(long = "box", num_args = 4, allow_negative_numbers = true, value_names = ["TOP", "BOTTOM", "LEFT", "RIGHT"])]
    pub face_box: Option<Vec<i64>>,

    /// Rotate frames 90 degrees clockwise
    #[arg(long)]
    pub rotate: bool,

    /// Use only the first frame of the face input
    #[arg(long = "static")]
    pub static_input: bool,

    /// Execution device hint: auto, cpu or cuda
    #[arg(long)]
    pub device: Option<DevicePreference>,

    /// Run at half precision where the model allows it
    #[arg(long)]
    pub half_precision: bool,

    /// Re-encode the face video with device-tuned settings first
    #[arg(long)]
    pub optimize_input: bool,

    /// Abort the job after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

fn parse_preset(s: &str) -> Result<QualityPreset, String> {
    s.parse().map_err(|e: lipsync_models::ConfigError| e.to_string())
}

impl Cli {
    /// Pipeline configuration: defaults, then the preset, then explicit options.
    pub fn pipeline_config(&self, default_device: DevicePreference) -> WorkerResult<PipelineConfig> {
        let mut config = PipelineConfig {
            device: default_device,
            ..Default::default()
        };
        if let Some(preset) = self.preset {
            config = config.with_preset(preset);
        }

        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(values) = &self.pads {
            config.pads = Pads::from_slice(values)?;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(batch_size) = self.face_det_batch_size {
            config.face_det_batch_size = batch_size;
        }
        if let Some(factor) = self.resize_factor {
            config.resize_factor = factor;
        }
        if let Some(height) = self.out_height {
            config.out_height = (height > 0).then_some(height);
        }
        if let Some(values) = &self.crop {
            config.crop = CropRect::from_slice(values)?;
        }
        if let Some(values) = &self.face_box {
            config.face_box = BoxOverride::from_slice(values)?;
        }
        if let Some(device) = self.device {
            config.device = device;
        }

        config.rotate = self.rotate;
        config.static_input = self.static_input;
        config.model = if self.gan {
            ModelVariant::Gan
        } else {
            ModelVariant::Standard
        };
        config.precision = if self.half_precision {
            Precision::Half
        } else {
            Precision::Full
        };

        config.validate()?;
        Ok(config)
    }

    /// Build the job request described by these arguments.
    pub fn to_job(&self, worker: &WorkerConfig) -> WorkerResult<LipSyncJob> {
        let config = self.pipeline_config(worker.device)?;
        let mut job = LipSyncJob::new(&self.face, &self.audio, &self.outfile).with_config(config);
        job.optimize_input = self.optimize_input;
        Ok(job)
    }

    /// Worker configuration with command-line overrides applied.
    pub fn apply_overrides(&self, mut worker: WorkerConfig) -> WorkerResult<WorkerConfig> {
        if let Some(dir) = &self.checkpoint_dir {
            worker.checkpoint_dir = dir.clone();
        }
        if let Some(secs) = self.timeout_secs {
            if secs == 0 {
                return Err(WorkerError::config_error("--timeout-secs must be positive"));
            }
            worker.job_timeout = Some(Duration::from_secs(secs));
        }
        Ok(worker)
    }
}
