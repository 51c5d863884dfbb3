//! Output encoding and audio muxing.
//!
//! Two separate FFmpeg invocations: raw frames to a silent video, then that
//! video plus the prepared audio into the final container.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lipsync_models::EncodingConfig;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegProcess, FfmpegRunner, ToolOutput};
use crate::compositor::{FrameSink, OutputFrame};
use crate::error::{MediaError, MediaResult};

/// Pads odd frame sizes up to even, as yuv420p requires.
const EVEN_PAD_FILTER: &str = "pad=ceil(iw/2)*2:ceil(ih/2)*2";

/// Streaming encoder: composited frames in, silent video file out.
pub struct VideoEncoder {
    process: FfmpegProcess,
    output: PathBuf,
    width: u32,
    height: u32,
    frames: usize,
}

impl VideoEncoder {
    /// Start an encoder for `width` x `height` RGB frames at `fps`.
    pub fn start(
        runner: &FfmpegRunner,
        output: &Path,
        width: u32,
        height: u32,
        fps: f64,
        encoding: &EncodingConfig,
    ) -> MediaResult<Self> {
        let cmd = FfmpegCommand::raw_rgb_input(width, height, fps, output)
            .video_filter(EVEN_PAD_FILTER)
            .output_args(encoding.to_video_args())
            .output_arg("-an");

        let process = runner.spawn(&cmd)?;
        debug!(width, height, fps, output = %output.display(), "Started video encoder");

        Ok(Self {
            process,
            output: output.to_path_buf(),
            width,
            height,
            frames: 0,
        })
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> usize {
        self.frames
    }

    /// Close the input and wait for the encoder to exit.
    pub async fn finish(self) -> MediaResult<PathBuf> {
        let frames = self.frames;
        self.process.finish().await?;
        info!(frames, output = %self.output.display(), "Encoded video stream");
        Ok(self.output)
    }
}

#[async_trait]
impl FrameSink for VideoEncoder {
    async fn push(&mut self, frame: OutputFrame) -> MediaResult<()> {
        if frame.image.dimensions() != (self.width, self.height) {
            return Err(MediaError::internal(format!(
                "frame {} is {:?}, encoder expects {}x{}",
                frame.index,
                frame.image.dimensions(),
                self.width,
                self.height
            )));
        }
        self.process.write(frame.image.as_raw()).await?;
        self.frames += 1;
        Ok(())
    }
}

/// Combine a silent video with an audio track into `output`.
///
/// Video is copied, audio re-encoded; the shorter stream sets the length.
pub async fn mux_audio(
    runner: &FfmpegRunner,
    video: &Path,
    audio: &Path,
    output: &Path,
    encoding: &EncodingConfig,
) -> MediaResult<ToolOutput> {
    let cmd = mux_command(video, audio, output, encoding);
    let result = runner.run(&cmd).await?;
    info!(output = %output.display(), "Muxed audio and video");
    Ok(result)
}

fn mux_command(video: &Path, audio: &Path, output: &Path, encoding: &EncodingConfig) -> FfmpegCommand {
    FfmpegCommand::new(video, output)
        .add_input(audio)
        .map("0:v:0")
        .map("1:a:0")
        .output_args(encoding.to_mux_args())
        .output_arg("-shortest")
}
