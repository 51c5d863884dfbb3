//! Progress reporting for pipeline stages and FFmpeg runs.

use std::sync::Arc;

use lipsync_models::ProgressUpdate;
use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg's `-progress` stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Calculate progress percentage given total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }
}

/// Callback receiving `(percent, message)` updates.
///
/// Called inline from the pipeline; implementations must return quickly.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

/// Cloneable handle the pipeline reports progress through.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("attached", &self.callback.is_some())
            .finish()
    }
}

impl ProgressReporter {
    /// Reporter that drops every update.
    pub fn silent() -> Self {
        Self { callback: None }
    }

    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// Report a fixed percentage.
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        if let Some(callback) = &self.callback {
            callback(ProgressUpdate::new(percent, message));
        }
    }

    /// Report `done` of `total` inside the `[start, end]` band.
    pub fn report_within(
        &self,
        start: u8,
        end: u8,
        done: usize,
        total: usize,
        message: impl Into<String>,
    ) {
        if let Some(callback) = &self.callback {
            callback(ProgressUpdate::within(start, end, done, total, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_percentage() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert!((progress.percentage(10000) - 50.0).abs() < 0.01);
        assert!((progress.percentage(5000) - 100.0).abs() < 0.01);
        assert_eq!(progress.percentage(0), 0.0);
    }

    #[test]
    fn test_reporter_forwards_updates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(move |u| sink.lock().unwrap().push(u.percent));

        reporter.report(5, "Preparing");
        reporter.report_within(45, 90, 1, 2, "Batch 1/2");

        assert_eq!(*seen.lock().unwrap(), vec![5, 68]);
    }

    #[test]
    fn test_silent_reporter_is_noop() {
        ProgressReporter::silent().report(50, "ignored");
    }
}
