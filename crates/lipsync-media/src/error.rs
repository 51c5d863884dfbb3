//! Error types for media operations.

use std::fmt;
use std::path::PathBuf;

use lipsync_models::ConfigError;
use thiserror::Error;

use crate::command::ToolOutput;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Coarse error category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing file, unsupported container/codec, unreadable image, bad option
    Input,
    /// Non-finite spectrogram or audio too short
    Audio,
    /// No usable face for a frame
    Detection,
    /// External encoder/decoder or inference call failed
    ExternalTool,
    /// Run exceeded its time budget
    Timeout,
    /// Model or checkpoint artifact missing
    Resource,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Audio => "audio",
            ErrorKind::Detection => "detection",
            ErrorKind::ExternalTool => "external_tool",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Resource => "resource",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid input {path}: {message}")]
    InvalidInput { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("No usable face for frame {frame}: {message}")]
    Detection { frame: usize, message: String },

    #[error("{program} failed (exit code {exit_code:?}): {message}")]
    ToolFailed {
        program: String,
        message: String,
        exit_code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::FileNotFound(_)
            | MediaError::UnsupportedFormat(_)
            | MediaError::InvalidInput { .. }
            | MediaError::Config(_)
            | MediaError::Image(_)
            | MediaError::Wav(_) => ErrorKind::Input,
            MediaError::Audio(_) => ErrorKind::Audio,
            MediaError::Detection { .. } => ErrorKind::Detection,
            MediaError::FfmpegNotFound
            | MediaError::FfprobeNotFound
            | MediaError::ToolFailed { .. }
            | MediaError::Inference(_) => ErrorKind::ExternalTool,
            MediaError::Timeout(_) => ErrorKind::Timeout,
            MediaError::ModelNotFound(_) => ErrorKind::Resource,
            MediaError::Io(_) | MediaError::JsonParse(_) | MediaError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Captured stderr excerpt, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::ToolFailed { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }

    /// Create an external tool failure error.
    pub fn tool_failed(
        program: impl Into<String>,
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::ToolFailed {
            program: program.into(),
            message: message.into(),
            exit_code,
            stderr,
        }
    }

    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::tool_failed("ffmpeg", message, stderr, exit_code)
    }

    /// Build the failure error for a finished tool invocation.
    pub fn from_tool_output(output: ToolOutput, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            program: output.program,
            message: message.into(),
            exit_code: output.exit_code,
            stderr: Some(output.stderr_tail).filter(|s| !s.is_empty()),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an audio error.
    pub fn audio(message: impl Into<String>) -> Self {
        Self::Audio(message.into())
    }

    /// Create a detection failure error for a frame.
    pub fn detection_failed(frame: usize, message: impl Into<String>) -> Self {
        Self::Detection {
            frame,
            message: message.into(),
        }
    }

    /// Create an inference failure error.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_kinds() {
        assert_eq!(MediaError::FileNotFound("a.mp4".into()).kind(), ErrorKind::Input);
        assert_eq!(MediaError::audio("nan").kind(), ErrorKind::Audio);
        assert_eq!(MediaError::detection_failed(3, "none").kind(), ErrorKind::Detection);
        assert_eq!(MediaError::ffmpeg_failed("x", None, Some(1)).kind(), ErrorKind::ExternalTool);
        assert_eq!(MediaError::inference("boom").kind(), ErrorKind::ExternalTool);
        assert_eq!(MediaError::Timeout(5).kind(), ErrorKind::Timeout);
        assert_eq!(MediaError::model_not_found("m.onnx").kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_tool_output_carries_context() {
        let output = ToolOutput {
            program: "ffmpeg".to_string(),
            exit_code: Some(1),
            stderr_tail: "Invalid data found when processing input".to_string(),
        };
        let err = MediaError::from_tool_output(output, "mux failed");
        assert_eq!(err.stderr(), Some("Invalid data found when processing input"));
        let text = err.to_string();
        assert!(text.contains("ffmpeg"));
        assert!(text.contains("Some(1)"));
    }

    #[test]
    fn test_detection_message_names_frame() {
        let err = MediaError::detection_failed(42, "no face in smoothing window");
        assert!(err.to_string().contains("frame 42"));
    }
}
