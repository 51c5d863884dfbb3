//! Lip-sync job requests and outcomes.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::PipelineConfig;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job state as reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A lip-sync request: file paths in, one output path out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LipSyncJob {
    pub id: JobId,
    /// Video or still image containing the face
    pub face_path: PathBuf,
    /// Speech track driving the lips
    pub audio_path: PathBuf,
    /// Where the finished video is written
    pub output_path: PathBuf,
    /// Re-encode the face video with device-tuned settings first
    #[serde(default)]
    pub optimize_input: bool,
    #[serde(default)]
    pub config: PipelineConfig,
}

impl LipSyncJob {
    pub fn new(
        face_path: impl Into<PathBuf>,
        audio_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: JobId::new(),
            face_path: face_path.into(),
            audio_path: audio_path.into(),
            output_path: output_path.into(),
            optimize_input: false,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }
}

/// Final report of a job, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Error category (`input`, `audio`, `detection`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub message: String,
    pub elapsed_secs: f64,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn completed(job_id: JobId, output_path: PathBuf, elapsed_secs: f64) -> Self {
        Self {
            job_id,
            state: JobState::Completed,
            output_path: Some(output_path),
            error_kind: None,
            message: "Processing completed successfully!".to_string(),
            elapsed_secs,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        job_id: JobId,
        error_kind: impl Into<String>,
        message: impl Into<String>,
        elapsed_secs: f64,
    ) -> Self {
        Self {
            job_id,
            state: JobState::Failed,
            output_path: None,
            error_kind: Some(error_kind.into()),
            message: message.into(),
            elapsed_secs,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == JobState::Completed
    }
}
