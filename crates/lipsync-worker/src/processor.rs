//! Lip-sync job orchestration.
//!
//! Resolves the device, checks the checkpoint, optionally re-encodes the
//! face video, loads the models and hands the job to the pipeline. Every
//! failure ends up in a `JobOutcome`; nothing here panics on bad input.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lipsync_media::{
    probe_video, Deadline, FaceDetector, FaceDetectorConfig, FaceInputKind, FfmpegCommand,
    LipSyncPipeline, MediaError, OnnxFaceDetector, OrtLipSyncModel, PipelineReport,
    ProgressReporter, ScratchDir,
};
use lipsync_models::{
    DeviceKind, DevicePreference, DeviceSettings, JobOutcome, LipSyncJob, ModelVariant,
    ProgressUpdate,
};
use tracing::{debug, info, Instrument};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// Worker-side progress checkpoints, before the pipeline takes over at 35.
pub mod stage {
    pub const INITIALIZING: u8 = 0;
    pub const DEVICE: u8 = 5;
    pub const CHECKING_MODEL: u8 = 10;
    pub const MODEL_LOCATED: u8 = 15;
    pub const OPTIMIZING: u8 = 20;
    pub const OPTIMIZED: u8 = 30;
}

/// Pick the device a job runs on.
///
/// CUDA is only chosen when the binary was built with the `cuda` feature
/// and an NVIDIA driver is visible.
pub fn resolve_device(preference: DevicePreference) -> DeviceKind {
    let cuda_available = cfg!(feature = "cuda") && which::which("nvidia-smi").is_ok();
    match preference {
        DevicePreference::Cpu => DeviceKind::Cpu,
        DevicePreference::Cuda | DevicePreference::Auto if cuda_available => DeviceKind::Cuda,
        _ => DeviceKind::Cpu,
    }
}

/// Path of the checkpoint for `variant`, or a resource error when it is absent.
pub fn locate_checkpoint(dir: &Path, variant: ModelVariant) -> WorkerResult<PathBuf> {
    let path = dir.join(variant.checkpoint_file_name());
    if path.is_file() {
        Ok(path)
    } else {
        Err(WorkerError::CheckpointMissing(format!(
            "{} ({}) not found at {}",
            variant.display_name(),
            variant.checkpoint_file_name(),
            path.display()
        )))
    }
}

/// Runs lip-sync jobs against one worker configuration.
#[derive(Debug, Clone)]
pub struct LipSyncProcessor {
    config: WorkerConfig,
}

impl LipSyncProcessor {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run `job` to completion and report how it ended.
    pub async fn process(&self, job: &LipSyncJob, progress: ProgressReporter) -> JobOutcome {
        let logger = JobLogger::new(&job.id, "lipsync");
        let span = logger.create_span();
        let started = Instant::now();

        logger.log_start(&format!(
            "{} + {} -> {}",
            job.face_path.display(),
            job.audio_path.display(),
            job.output_path.display()
        ));

        let result = self.run(job, &logger, &progress).instrument(span).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(report) => {
                logger.log_completion(&format!("{} frames written", report.frames_written), elapsed);
                JobOutcome::completed(job.id.clone(), report.output_path, elapsed)
            }
            Err(e) => {
                let kind = e.kind();
                let message = e.to_string();
                logger.log_error(kind.as_str(), &message);
                progress.report(stage::INITIALIZING, format!("Error: {message}"));
                JobOutcome::failed(job.id.clone(), kind.as_str(), message, elapsed)
            }
        }
    }

    async fn run(
        &self,
        job: &LipSyncJob,
        logger: &JobLogger,
        progress: &ProgressReporter,
    ) -> WorkerResult<PipelineReport> {
        progress.report(stage::INITIALIZING, "Initializing");

        let mut config = job.config.clone();
        let device = resolve_device(config.device);
        let settings = DeviceSettings::for_device(device);
        config.device = match device {
            DeviceKind::Cuda => DevicePreference::Cuda,
            DeviceKind::Cpu => DevicePreference::Cpu,
        };
        progress.report(stage::DEVICE, format!("Using device: {device}"));
        info!(
            device = %device,
            batch_size = config.batch_size,
            estimated_time = %settings.estimated_time,
            "Device resolved"
        );

        let budget = job_budget(&self.config, device);
        let deadline = Deadline::new(Some(budget));

        progress.report(stage::CHECKING_MODEL, "Checking model");
        let checkpoint = locate_checkpoint(&self.config.checkpoint_dir, config.model)?;
        progress.report(
            stage::MODEL_LOCATED,
            format!("Using {}", config.model.display_name()),
        );

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let scratch = ScratchDir::create(Some(self.config.work_dir.as_path()))?;

        let mut face = job.face_path.clone();
        if job.optimize_input && FaceInputKind::classify(&face)? == FaceInputKind::Video {
            progress.report(stage::OPTIMIZING, "Optimizing input video");
            let optimized = scratch.optimized_input();
            optimize_input(&face, &optimized, &settings, &deadline, progress).await?;
            progress.report(stage::OPTIMIZED, "Input video optimized");
            face = optimized;
        } else if job.optimize_input {
            logger.log_warning("Input optimisation skipped for a still image");
        }

        let model = OrtLipSyncModel::load(&checkpoint, config.device, config.precision)?;
        let mut pipeline = LipSyncPipeline::new(config.clone(), Arc::new(model))?
            .with_progress(progress.clone())
            .with_scratch_dir(scratch.path());

        if config.face_box.uses_detector() {
            let detector = OnnxFaceDetector::new(FaceDetectorConfig {
                model_path: self.config.detector_model.clone(),
                confidence_threshold: config.detection_threshold,
                device: config.device,
                ..Default::default()
            })?;
            let detector: Arc<dyn FaceDetector> = Arc::new(detector);
            pipeline = pipeline.with_detector(detector);
        }

        let remaining = deadline.remaining()?.unwrap_or(budget);
        pipeline = pipeline.with_timeout(remaining);

        let report = pipeline
            .run(&face, &job.audio_path, &job.output_path)
            .await?;
        Ok(report)
    }
}

/// Re-encode the face video with the device-tuned scale, preset and CRF.
async fn optimize_input(
    input: &Path,
    output: &Path,
    settings: &DeviceSettings,
    deadline: &Deadline,
    progress: &ProgressReporter,
) -> WorkerResult<()> {
    let duration_ms = probe_video(input)
        .await
        .map(|info| (info.duration * 1000.0) as i64)
        .unwrap_or(0);

    let cmd = optimize_command(input, output, settings);
    let reporter = progress.clone();
    deadline
        .runner()?
        .run_with_progress(&cmd, move |p| {
            let update = ProgressUpdate::within(
                stage::OPTIMIZING,
                stage::OPTIMIZED,
                p.percentage(duration_ms).round() as usize,
                100,
                "Optimizing input video",
            );
            reporter.report(update.percent, update.message);
        })
        .await
        .map_err(|e| match e {
            MediaError::Timeout(_) => WorkerError::Media(e),
            other => WorkerError::OptimizationFailed(other.to_string()),
        })?;

    debug!(output = %output.display(), "Optimised face video");
    Ok(())
}

fn optimize_command(input: &Path, output: &Path, settings: &DeviceSettings) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .video_filter(format!("scale={}", settings.video_scale))
        .video_codec("libx264")
        .preset(&settings.video_preset)
        .crf(settings.video_crf)
        .output_arg("-an")
}

/// Elapsed-time budget the processor would grant a job on `device`.
pub fn job_budget(config: &WorkerConfig, device: DeviceKind) -> Duration {
    config
        .job_timeout
        .unwrap_or_else(|| DeviceSettings::for_device(device).timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lipsync_media::ErrorKind;
    use lipsync_models::JobState;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_cpu_is_honoured() {
        assert_eq!(resolve_device(DevicePreference::Cpu), DeviceKind::Cpu);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_falls_back_without_feature() {
        assert_eq!(resolve_device(DevicePreference::Cuda), DeviceKind::Cpu);
        assert_eq!(resolve_device(DevicePreference::Auto), DeviceKind::Cpu);
    }

    #[test]
    fn test_locate_checkpoint() {
        let dir = TempDir::new().unwrap();
        let err = locate_checkpoint(dir.path(), ModelVariant::Gan).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);

        std::fs::write(dir.path().join("wav2lip_gan.onnx"), b"onnx").unwrap();
        let path = locate_checkpoint(dir.path(), ModelVariant::Gan).unwrap();
        assert!(path.ends_with("wav2lip_gan.onnx"));
    }

    #[test]
    fn test_optimize_command_uses_device_settings() {
        let settings = DeviceSettings::for_device(DeviceKind::Cpu);
        let args = optimize_command(Path::new("in.mp4"), Path::new("opt.mp4"), &settings).build_args();

        assert!(args.windows(2).any(|w| w[0] == "-vf" && w[1] == "scale=960:540"));
        assert!(args.windows(2).any(|w| w[0] == "-preset" && w[1] == "medium"));
        assert!(args.windows(2).any(|w| w[0] == "-crf" && w[1] == "25"));
        assert_eq!(args.last().unwrap(), "opt.mp4");
    }

    #[test]
    fn test_budget_prefers_configured_timeout() {
        let mut config = WorkerConfig::default();
        assert_eq!(job_budget(&config, DeviceKind::Cpu), Duration::from_secs(3600));
        assert_eq!(job_budget(&config, DeviceKind::Cuda), Duration::from_secs(1800));

        config.job_timeout = Some(Duration::from_secs(60));
        assert_eq!(job_budget(&config, DeviceKind::Cuda), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_missing_checkpoint_fails_before_any_work() {
        let dir = TempDir::new().unwrap();
        let processor = LipSyncProcessor::new(WorkerConfig {
            work_dir: dir.path().join("work"),
            checkpoint_dir: dir.path().join("checkpoints"),
            ..Default::default()
        });
        let job = LipSyncJob::new(
            dir.path().join("face.mp4"),
            dir.path().join("speech.wav"),
            dir.path().join("out.mp4"),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress = ProgressReporter::new(move |u| sink.lock().unwrap().push(u));

        let outcome = processor.process(&job, progress).await;

        assert_eq!(outcome.state, JobState::Failed);
        assert_eq!(outcome.error_kind.as_deref(), Some("resource"));
        assert!(outcome.output_path.is_none());
        assert!(!dir.path().join("out.mp4").exists());
        assert!(!dir.path().join("work").exists());

        let updates = seen.lock().unwrap();
        let percents: Vec<u8> = updates.iter().map(|u| u.percent).collect();
        assert_eq!(&percents[..3], &[0, 5, 10]);
        assert!(updates.last().unwrap().message.starts_with("Error:"));
    }
}
