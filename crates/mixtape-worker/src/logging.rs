//! Structured job logging.

use std::time::Duration;

use tracing::{error, info, warn, Span};

use mixtape_models::{JobId, JobStatus};

/// Logs job lifecycle events with the job id attached to every line.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.to_string(),
        }
    }

    pub fn log_start(&self, tracks: usize) {
        info!(job_id = %self.job_id, tracks, "Job started");
    }

    pub fn log_stage(&self, stage: JobStatus) {
        info!(job_id = %self.job_id, stage = %stage, "Entering stage");
    }

    /// A stage finished; `elapsed` is the time spent in it.
    pub fn log_stage_done(&self, stage: JobStatus, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            stage = %stage,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage finished"
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, "{}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "{}", message);
    }

    pub fn log_error(&self, stage: JobStatus, message: &str) {
        error!(job_id = %self.job_id, stage = %stage, "Job failed: {}", message);
    }

    pub fn log_completion(&self, duration_ms: u64, artifacts: usize) {
        info!(
            job_id = %self.job_id,
            duration_ms,
            artifacts,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Span to instrument the whole run of this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::from_string("job-42");
        let logger = JobLogger::new(&job_id);
        assert_eq!(logger.job_id(), "job-42");
    }
}
