#![deny(unreachable_patterns)]
//! Batched audio-visual lip-sync pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with typed tool results
//! - Frame ingestion and audio-to-mel alignment
//! - Face localisation with temporal smoothing
//! - Order-preserving batch assembly, generator inference and compositing
//! - Encoding and audio muxing into the final container

pub mod audio;
pub mod batch;
pub mod command;
pub mod compositor;
pub mod error;
pub mod face;
pub mod frames;
pub mod fs_utils;
pub mod inference;
pub mod mux;
pub mod onnx;
pub mod pipeline;
pub mod probe;
pub mod progress;

pub use audio::{AudioMelExtractor, MelChunk, MelChunks, MelSpectrogram};
pub use batch::{Batch, BatchAssembler, BatchItem};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner, ToolOutput};
pub use compositor::{CollectingSink, FrameCompositor, FrameSink, OutputFrame};
pub use error::{ErrorKind, MediaError, MediaResult};
pub use face::{
    BoundingBox, FaceDetection, FaceDetector, FaceDetectorConfig, FaceLocator, FaceTrack,
    OnnxFaceDetector,
};
pub use frames::{FaceInputKind, Frame, FrameGeometry, FrameSequence, VideoFrameSource};
pub use fs_utils::{move_file, ScratchDir};
pub use inference::{InferenceAdapter, OrtLipSyncModel};
pub use mux::{mux_audio, VideoEncoder};
pub use pipeline::{prepare_inputs, render, Deadline, LipSyncPipeline, PipelineReport, PreparedInputs};
pub use probe::{probe_video, VideoInfo};
pub use progress::{FfmpegProgress, ProgressCallback, ProgressReporter};
