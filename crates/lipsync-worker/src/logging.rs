//! Structured job logging.

use lipsync_models::{JobId, ProgressUpdate};
use tracing::{error, info, warn, Span};

/// Emits job lifecycle events tagged with the job ID and operation.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// Log a pipeline progress checkpoint.
    pub fn log_progress(&self, update: &ProgressUpdate) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            percent = update.percent,
            "Job progress: {}", update.message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, kind: &str, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            error_kind = kind,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str, elapsed_secs: f64) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            elapsed_secs,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span that tags every event of the job, including those from the pipeline.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "lipsync");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.operation(), "lipsync");
    }

    #[test]
    fn test_span_without_subscriber() {
        let logger = JobLogger::new(&JobId::from_string("job-7"), "lipsync");
        let _entered = logger.create_span().entered();
        logger.log_progress(&ProgressUpdate::new(45, "Running lip-sync inference"));
    }
}
