//! End-to-end lip-sync run.
//!
//! Stages run strictly in sequence: audio to mel chunks, frame decode,
//! face track, then one batch at a time through the generator and the
//! compositor into the encoder, and finally the audio mux. Every
//! intermediate file lives in a per-run scratch directory that is removed
//! on every exit path. The target path is only written by the final move.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lipsync_models::PipelineConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::{prepare_audio, read_wav, AudioMelExtractor, MelChunks};
use crate::batch::BatchAssembler;
use crate::command::FfmpegRunner;
use crate::compositor::{FrameCompositor, FrameSink};
use crate::error::{MediaError, MediaResult};
use crate::face::{FaceDetector, FaceLocator, FaceTrack};
use crate::frames::{FrameSequence, VideoFrameSource};
use crate::fs_utils::{move_file, ScratchDir};
use crate::inference::InferenceAdapter;
use crate::mux::{mux_audio, VideoEncoder};
use crate::progress::ProgressReporter;

/// Progress checkpoints reported by a run.
pub mod stage {
    pub const AUDIO_START: u8 = 35;
    pub const AUDIO_DONE: u8 = 40;
    pub const INFERENCE_START: u8 = 45;
    pub const INFERENCE_END: u8 = 90;
    pub const MUXING: u8 = 95;
    pub const DONE: u8 = 100;
}

/// Wall-clock budget shared by every stage of a run.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Time left, or a timeout error once the budget is spent.
    pub fn remaining(&self) -> MediaResult<Option<Duration>> {
        let Some(budget) = self.budget else {
            return Ok(None);
        };
        budget
            .checked_sub(self.started.elapsed())
            .filter(|left| !left.is_zero())
            .map(Some)
            .ok_or(MediaError::Timeout(budget.as_secs()))
    }

    /// Fail if the budget is spent.
    pub fn check(&self) -> MediaResult<()> {
        self.remaining().map(|_| ())
    }

    /// FFmpeg runner bounded by the time left.
    pub fn runner(&self) -> MediaResult<FfmpegRunner> {
        Ok(match self.remaining()? {
            Some(left) => FfmpegRunner::new().with_timeout(left),
            None => FfmpegRunner::new(),
        })
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub output_path: PathBuf,
    pub frames_written: usize,
    pub mel_chunks: usize,
    pub input_frames: usize,
    pub fps: f64,
    pub elapsed_secs: f64,
}

/// The batched audio-visual pipeline with its loaded models.
pub struct LipSyncPipeline {
    config: PipelineConfig,
    model: Arc<dyn InferenceAdapter>,
    detector: Option<Arc<dyn FaceDetector>>,
    progress: ProgressReporter,
    scratch_parent: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl LipSyncPipeline {
    /// Build a pipeline around a loaded generator. The config is validated here.
    pub fn new(config: PipelineConfig, model: Arc<dyn InferenceAdapter>) -> MediaResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            model,
            detector: None,
            progress: ProgressReporter::silent(),
            scratch_parent: None,
            timeout: None,
        })
    }

    /// Face detector used when no box override is configured.
    pub fn with_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Create scratch directories under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = Some(dir.into());
        self
    }

    /// Abort the run once `timeout` has elapsed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Produce a lip-synced video at `output` from `face` and `audio`.
    ///
    /// All or nothing: on error nothing is written at `output`.
    pub async fn run(&self, face: &Path, audio: &Path, output: &Path) -> MediaResult<PipelineReport> {
        let deadline = Deadline::new(self.timeout);
        let work = self.run_inner(face, audio, output, deadline);

        match self.timeout {
            Some(budget) => tokio::time::timeout(budget, work)
                .await
                .map_err(|_| MediaError::Timeout(budget.as_secs()))?,
            None => work.await,
        }
    }

    async fn run_inner(
        &self,
        face: &Path,
        audio: &Path,
        output: &Path,
        deadline: Deadline,
    ) -> MediaResult<PipelineReport> {
        let started = Instant::now();
        let config = &self.config;
        let scratch = ScratchDir::create(self.scratch_parent.as_deref())?;

        let source = VideoFrameSource::open(face, config).await?;
        let fps = source.fps();
        let (width, height) = source.geometry().output_size();

        self.progress.report(stage::AUDIO_START, "Processing audio");
        let wav = scratch.audio_wav();
        prepare_audio(&deadline.runner()?, audio, &wav).await?;
        let samples = read_wav(&wav)?;

        let locator = FaceLocator::new(self.detector.clone());
        let PreparedInputs { frames, mels, track } = prepare_inputs(
            &samples,
            fps,
            move |limit| async move { source.read(&deadline.runner()?, limit).await },
            &locator,
            config,
            &self.progress,
            &deadline,
        )
        .await?;

        let video_path = scratch.intermediate_video();
        let mut encoder = VideoEncoder::start(
            &deadline.runner()?,
            &video_path,
            width,
            height,
            fps,
            &config.encoding,
        )?;

        self.progress.report(stage::INFERENCE_START, "Running lip-sync inference");
        let written = render(
            &frames,
            &track,
            &mels,
            config,
            self.model.as_ref(),
            &mut encoder,
            &self.progress,
            &deadline,
        )
        .await?;
        encoder.finish().await?;

        deadline.check()?;
        self.progress.report(stage::MUXING, "Merging audio and video");
        let muxed = scratch.muxed_output(output);
        mux_audio(
            &deadline.runner()?,
            &video_path,
            &wav,
            &muxed,
            &config.encoding,
        )
        .await?;

        deadline.check()?;
        move_file(&muxed, output).await?;
        self.progress.report(stage::DONE, "Processing completed");

        let report = PipelineReport {
            output_path: output.to_path_buf(),
            frames_written: written,
            mel_chunks: mels.len(),
            input_frames: frames.len(),
            fps,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            output = %output.display(),
            frames = report.frames_written,
            mel_chunks = report.mel_chunks,
            elapsed_secs = report.elapsed_secs,
            "Lip-sync run completed"
        );
        Ok(report)
    }
}

/// Decoded frames, mel chunks and face track of one run.
#[derive(Debug)]
pub struct PreparedInputs {
    pub frames: FrameSequence,
    pub mels: MelChunks,
    pub track: FaceTrack,
}

/// Mel chunks from `samples`, then the frames, then the face track.
///
/// `read_frames` receives the mel chunk count as its frame limit. It is not
/// called, and no detection runs, when the audio yields no usable
/// spectrogram.
pub async fn prepare_inputs<F, Fut>(
    samples: &[f32],
    fps: f64,
    read_frames: F,
    locator: &FaceLocator,
    config: &PipelineConfig,
    progress: &ProgressReporter,
    deadline: &Deadline,
) -> MediaResult<PreparedInputs>
where
    F: FnOnce(usize) -> Fut,
    Fut: Future<Output = MediaResult<FrameSequence>>,
{
    let mels = AudioMelExtractor::new(config.mel_step_size).chunks_from_samples(samples, fps)?;
    progress.report(stage::AUDIO_DONE, "Audio processed");

    deadline.check()?;
    let frames = read_frames(mels.len()).await?;

    deadline.check()?;
    let track = locator.locate(&frames, config)?;

    Ok(PreparedInputs {
        frames,
        mels,
        track,
    })
}

/// Drive every batch through the generator and compositor into `sink`.
///
/// Returns the number of frames written, `min(frames, mel chunks)` for
/// video input. Batch size changes throughput only, never the output.
#[allow(clippy::too_many_arguments)]
pub async fn render(
    frames: &FrameSequence,
    track: &FaceTrack,
    mels: &MelChunks,
    config: &PipelineConfig,
    model: &dyn InferenceAdapter,
    sink: &mut dyn FrameSink,
    progress: &ProgressReporter,
    deadline: &Deadline,
) -> MediaResult<usize> {
    let assembler = BatchAssembler::new(frames, track, mels, config.batch_size, config.img_size);
    let total = assembler.total();
    let batches = assembler.batch_count();

    if !frames.is_static() && frames.len() != mels.len() {
        warn!(
            frames = frames.len(),
            mel_chunks = mels.len(),
            output_frames = total,
            "Frame and audio lengths differ, truncating to the shorter"
        );
    }

    let mut compositor = FrameCompositor::new();
    for (batch_index, batch) in assembler.enumerate() {
        deadline.check()?;
        let batch = batch?;

        let patches = model.infer(&batch.faces, &batch.mels)?;
        for frame in compositor.composite(&batch, &patches)? {
            sink.push(frame).await?;
        }

        debug!(batch = batch_index + 1, batches, items = batch.len(), "Batch composited");
        progress.report_within(
            stage::INFERENCE_START,
            stage::INFERENCE_END,
            batch_index + 1,
            batches,
            format!("Processing batch {}/{}", batch_index + 1, batches),
        );
    }

    Ok(compositor.emitted())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_deadline_never_expires() {
        let deadline = Deadline::unlimited();
        assert!(deadline.check().is_ok());
        assert!(deadline.remaining().unwrap().is_none());
    }

    #[test]
    fn test_spent_deadline_is_timeout() {
        let deadline = Deadline::new(Some(Duration::ZERO));
        let err = deadline.check().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        struct Never;
        impl InferenceAdapter for Never {
            fn infer(
                &self,
                _: &ndarray::Array4<f32>,
                _: &ndarray::Array4<f32>,
            ) -> MediaResult<ndarray::Array4<f32>> {
                unreachable!()
            }
        }
        let config = PipelineConfig {
            batch_size: 0,
            ..Default::default()
        };
        let err = LipSyncPipeline::new(config, Arc::new(Never)).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Input);
    }

    #[tokio::test]
    async fn test_missing_face_input_fails_before_any_work() {
        struct Never;
        impl InferenceAdapter for Never {
            fn infer(
                &self,
                _: &ndarray::Array4<f32>,
                _: &ndarray::Array4<f32>,
            ) -> MediaResult<ndarray::Array4<f32>> {
                unreachable!()
            }
        }
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("out.mp4");
        let pipeline = LipSyncPipeline::new(PipelineConfig::default(), Arc::new(Never))
            .unwrap()
            .with_scratch_dir(dir.path().join("scratch"));

        let err = pipeline
            .run(&dir.path().join("missing.mp4"), &dir.path().join("a.wav"), &output)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::FileNotFound(_)));
        assert!(!output.exists());
        // scratch area cleaned up
        let leftovers = std::fs::read_dir(dir.path().join("scratch")).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
