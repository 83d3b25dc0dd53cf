//! Worker error types.

use thiserror::Error;

use mixtape_media::MediaError;
use mixtape_models::{ErrorKind, JobError, ModelError};
use mixtape_queue::QueueError;
use mixtape_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job model error: {0}")]
    Model(#[from] ModelError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// The error kind recorded on a failed job.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::InvalidInput(_) => ErrorKind::InvalidInput,
            WorkerError::ProcessingFailed(_) => ErrorKind::ProcessingFailed,
            WorkerError::UploadFailed(_) => ErrorKind::UploadFailed,
            WorkerError::Internal(_) | WorkerError::ConfigError(_) => ErrorKind::Internal,
            WorkerError::Model(e) if e.is_input_error() => ErrorKind::InvalidInput,
            WorkerError::Model(_) => ErrorKind::Internal,
            WorkerError::Media(e) if e.is_input_error() => ErrorKind::InvalidInput,
            WorkerError::Media(MediaError::MixInput(_) | MediaError::Internal(_)) => ErrorKind::Internal,
            WorkerError::Media(_) => ErrorKind::ProcessingFailed,
            WorkerError::Storage(StorageError::Model(_)) => ErrorKind::Internal,
            WorkerError::Storage(_) | WorkerError::Io(_) => ErrorKind::ProcessingFailed,
            WorkerError::Queue(_) => ErrorKind::Internal,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::ProcessingFailed(_) | WorkerError::UploadFailed(_) | WorkerError::Io(_) => true,
            WorkerError::Media(e) => e.is_transient(),
            WorkerError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Structured error for the job record.
    pub fn to_job_error(&self) -> JobError {
        JobError::new(self.kind(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_media_errors_classified() {
        let err: WorkerError = MediaError::invalid_audio(PathBuf::from("a.mp3"), "bad header").into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!err.is_retryable());

        let err: WorkerError = MediaError::ffmpeg_failed("crashed", None, Some(1)).into();
        assert_eq!(err.kind(), ErrorKind::ProcessingFailed);
        assert!(err.is_retryable());

        let err: WorkerError = MediaError::MixInput("channel mismatch".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_model_errors_classified() {
        let err: WorkerError = ModelError::EmptyTracks.into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err: WorkerError = ModelError::FailureWithoutError.into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_upload_failure_kind() {
        let err = WorkerError::upload_failed("quota");
        assert_eq!(err.kind(), ErrorKind::UploadFailed);
        assert!(err.is_retryable());

        let job_error = err.to_job_error();
        assert_eq!(job_error.kind, ErrorKind::UploadFailed);
        assert!(job_error.message.contains("quota"));
    }
}
