//! Job definitions and the job state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::artifact::{ArtifactKind, ArtifactRef};
use crate::error::{ModelError, ModelResult};
use crate::options::JobOptions;
use crate::status::StatusEvent;
use crate::track::TrackRef;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
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

/// Pipeline status of a job.
///
/// Declaration order is pipeline order; `Failed` is reachable from every
/// non-terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker
    #[default]
    Queued,
    /// Reading durations and tags
    Probing,
    /// Decoding and crossfading
    Mixing,
    /// Rendering the still-image video
    RenderingVideo,
    /// Deriving chapters and description
    BuildingChapters,
    /// Handing the video to the upload hook
    Uploading,
    /// All artifacts produced
    Completed,
    /// Stopped with an error
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Probing => "probing",
            JobStatus::Mixing => "mixing",
            JobStatus::RenderingVideo => "rendering_video",
            JobStatus::BuildingChapters => "building_chapters",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a job failure, as surfaced to the submitting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The submitted input cannot be processed; resubmit with fixed input
    InvalidInput,
    /// Processing failed after retries; trying again may help
    ProcessingFailed,
    /// Upload failed; produced files are still available
    UploadFailed,
    /// Bug or broken invariant in the pipeline
    Internal,
    /// Cancelled before a worker picked the job up
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ProcessingFailed => "processing_failed",
            ErrorKind::UploadFailed => "upload_failed",
            ErrorKind::Internal => "internal",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error stored on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    /// Status the job was in when it failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<JobStatus>,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn processing_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProcessingFailed, message)
    }

    pub fn upload_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UploadFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Job cancelled before processing started")
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A mixtape job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Tracks in playback order
    pub tracks: Vec<TrackRef>,

    /// Background image for the video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg_image_ref: Option<String>,

    /// Processing options
    #[serde(default)]
    pub options: JobOptions,

    /// Produced outputs, at most one per kind
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,

    /// Set only when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Transition counter
    #[serde(default)]
    pub event_seq: u64,
}

impl Job {
    /// Create a queued job.
    pub fn new(tracks: Vec<TrackRef>, bg_image_ref: Option<String>, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            tracks,
            bg_image_ref,
            options,
            artifacts: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            event_seq: 0,
        }
    }

    /// Statuses this job will pass through on success, in order.
    pub fn planned_path(&self) -> Vec<JobStatus> {
        let mut path = vec![JobStatus::Queued, JobStatus::Probing, JobStatus::Mixing];
        if self.options.render_video {
            path.push(JobStatus::RenderingVideo);
        }
        path.push(JobStatus::BuildingChapters);
        if self.options.upload_requested() {
            path.push(JobStatus::Uploading);
        }
        path.push(JobStatus::Completed);
        path
    }

    /// The only non-failure status reachable from the current one.
    pub fn next_status(&self) -> Option<JobStatus> {
        let path = self.planned_path();
        let pos = path.iter().position(|s| *s == self.status)?;
        path.get(pos + 1).copied()
    }

    /// Advance to the next pipeline status.
    ///
    /// Anything other than the immediate successor is rejected; failures
    /// go through [`Job::fail`].
    pub fn advance(&mut self, to: JobStatus) -> ModelResult<StatusEvent> {
        if self.status.is_terminal() {
            return Err(ModelError::TerminalState(self.status));
        }
        if to == JobStatus::Failed {
            return Err(ModelError::FailureWithoutError);
        }
        if self.next_status() != Some(to) {
            return Err(ModelError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        if self.status == JobStatus::Queued && self.tracks.is_empty() {
            return Err(ModelError::EmptyTracks);
        }

        self.status = to;
        Ok(self.touch())
    }

    /// Move to `failed` with the given error.
    pub fn fail(&mut self, mut error: JobError) -> ModelResult<StatusEvent> {
        if self.status.is_terminal() {
            return Err(ModelError::TerminalState(self.status));
        }
        error.stage.get_or_insert(self.status);
        self.status = JobStatus::Failed;
        self.error = Some(error);
        Ok(self.touch())
    }

    /// Record an artifact. Kinds are append-only, and a terminal job only
    /// accepts late metadata.
    pub fn add_artifact(&mut self, artifact: ArtifactRef) -> ModelResult<()> {
        if self.artifact(artifact.kind).is_some() {
            return Err(ModelError::DuplicateArtifact(artifact.kind));
        }
        if self.status.is_terminal() && !artifact.kind.is_late_metadata() {
            return Err(ModelError::TerminalState(self.status));
        }
        self.artifacts.push(artifact);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactRef> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }

    /// Current state as a status event.
    pub fn status_event(&self) -> StatusEvent {
        StatusEvent {
            job_id: self.id.clone(),
            status: self.status,
            error: self.error.clone(),
            artifacts: self.artifacts.clone(),
            seq: self.event_seq,
            at: self.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) -> StatusEvent {
        self.updated_at = Utc::now();
        self.event_seq += 1;
        self.status_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(render_video: bool) -> Job {
        Job::new(
            vec![TrackRef::new("a.mp3"), TrackRef::new("b.mp3")],
            Some("bg.jpg".to_string()),
            JobOptions::default().with_render_video(render_video),
        )
    }

    fn run_to_completion(job: &mut Job) -> Vec<JobStatus> {
        let mut seen = vec![job.status];
        while let Some(next) = job.next_status() {
            let event = job.advance(next).unwrap();
            assert_eq!(event.status, next);
            seen.push(next);
        }
        seen
    }

    #[test]
    fn test_full_path_with_video() {
        let mut job = job(true);
        let seen = run_to_completion(&mut job);
        assert_eq!(
            seen,
            vec![
                JobStatus::Queued,
                JobStatus::Probing,
                JobStatus::Mixing,
                JobStatus::RenderingVideo,
                JobStatus::BuildingChapters,
                JobStatus::Completed,
            ]
        );
        assert_eq!(job.event_seq, 5);
    }

    #[test]
    fn test_video_skipped_when_disabled() {
        let mut job = job(false);
        let seen = run_to_completion(&mut job);
        assert!(!seen.contains(&JobStatus::RenderingVideo));
    }

    #[test]
    fn test_upload_step_included_when_requested() {
        let mut job = job(true);
        job.options.upload = Some(Default::default());
        let seen = run_to_completion(&mut job);
        assert_eq!(seen[seen.len() - 2], JobStatus::Uploading);
    }

    #[test]
    fn test_skipping_a_state_is_illegal() {
        let mut job = job(true);
        let err = job.advance(JobStatus::Mixing).unwrap_err();
        assert_eq!(
            err,
            ModelError::IllegalTransition {
                from: JobStatus::Queued,
                to: JobStatus::Mixing
            }
        );
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.event_seq, 0);
    }

    #[test]
    fn test_rendering_video_rejected_when_disabled() {
        let mut job = job(false);
        job.advance(JobStatus::Probing).unwrap();
        job.advance(JobStatus::Mixing).unwrap();
        assert!(job.advance(JobStatus::RenderingVideo).is_err());
        assert!(job.advance(JobStatus::BuildingChapters).is_ok());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut job = job(true);
        job.advance(JobStatus::Probing).unwrap();
        job.advance(JobStatus::Mixing).unwrap();
        assert!(job.advance(JobStatus::Probing).is_err());
        assert!(job.advance(JobStatus::Mixing).is_err());
    }

    #[test]
    fn test_failed_requires_error_record() {
        let mut job = job(true);
        assert_eq!(job.advance(JobStatus::Failed).unwrap_err(), ModelError::FailureWithoutError);

        job.advance(JobStatus::Probing).unwrap();
        let event = job.fail(JobError::invalid_input("corrupt file")).unwrap();
        assert_eq!(event.status, JobStatus::Failed);
        let error = event.error.unwrap();
        assert_eq!(error.kind, ErrorKind::InvalidInput);
        assert_eq!(error.stage, Some(JobStatus::Probing));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job(true);
        job.fail(JobError::cancelled()).unwrap();
        assert_eq!(
            job.fail(JobError::internal("again")).unwrap_err(),
            ModelError::TerminalState(JobStatus::Failed)
        );
        assert!(job.advance(JobStatus::Probing).is_err());
    }

    #[test]
    fn test_empty_tracks_cannot_leave_queue() {
        let mut job = Job::new(Vec::new(), None, JobOptions::default());
        assert_eq!(job.advance(JobStatus::Probing).unwrap_err(), ModelError::EmptyTracks);
    }

    #[test]
    fn test_artifacts_append_only() {
        let mut job = job(true);
        job.add_artifact(ArtifactRef::new(ArtifactKind::MixedAudio, "k1", "audio/mpeg"))
            .unwrap();
        assert_eq!(
            job.add_artifact(ArtifactRef::new(ArtifactKind::MixedAudio, "k2", "audio/mpeg"))
                .unwrap_err(),
            ModelError::DuplicateArtifact(ArtifactKind::MixedAudio)
        );
        assert_eq!(job.artifact(ArtifactKind::MixedAudio).unwrap().reference, "k1");
    }

    #[test]
    fn test_terminal_job_only_accepts_late_metadata() {
        let mut job = job(true);
        job.fail(JobError::upload_failed("quota")).unwrap();
        assert!(job
            .add_artifact(ArtifactRef::new(ArtifactKind::Video, "v", "video/mp4"))
            .is_err());
        assert!(job
            .add_artifact(ArtifactRef::new(ArtifactKind::ExternalUpload, "ext-1", "text/plain"))
            .is_ok());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::RenderingVideo).unwrap(),
            "\"rendering_video\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::UploadFailed).unwrap(),
            "\"upload_failed\""
        );
    }
}
