//! Model-level error types.

use thiserror::Error;

use crate::artifact::ArtifactKind;
use crate::job::JobStatus;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by the job state machine and the derived-data builders.
///
/// Every variant except [`ModelError::InvalidRequest`] is a programming or
/// invariant violation and must never be shown to users as an input problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("Job is already in terminal state {0}")]
    TerminalState(JobStatus),

    #[error("Transition to failed must go through Job::fail")]
    FailureWithoutError,

    #[error("Job has no tracks")]
    EmptyTracks,

    #[error("Artifact of kind {0} already recorded")]
    DuplicateArtifact(ArtifactKind),

    #[error("Overlap plan has {actual} entries for {tracks} tracks")]
    PlanLengthMismatch { tracks: usize, actual: usize },

    #[error("Missing overlap plan entry for track {0}")]
    MissingOverlap(usize),

    #[error("Chapter {index} does not start after the previous chapter")]
    NonMonotonicChapters { index: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ModelError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Whether this error describes bad user input rather than a bug.
    pub fn is_input_error(&self) -> bool {
        matches!(self, ModelError::InvalidRequest(_) | ModelError::EmptyTracks)
    }
}
