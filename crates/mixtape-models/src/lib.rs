//! Shared data models for the mixtape pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, the job state machine and status events
//! - Tracks, job options and submission requests
//! - Crossfade plans, chapters and description text
//! - Audio and video encoding configuration

pub mod artifact;
pub mod chapters;
pub mod encoding;
pub mod error;
pub mod job;
pub mod mix;
pub mod options;
pub mod status;
pub mod track;

// Re-export common types
pub use artifact::{ArtifactKind, ArtifactRef};
pub use chapters::{build_chapters, format_timestamp, render_description, Chapter, ChapterSheet};
pub use encoding::{AudioFormat, VideoRenderConfig, FRAMES_PER_MS, MIX_CHANNELS, MIX_SAMPLE_RATE};
pub use error::{ModelError, ModelResult};
pub use job::{ErrorKind, Job, JobError, JobId, JobStatus};
pub use mix::{expected_mix_duration_ms, OverlapPlan};
pub use options::{JobOptions, PrivacyStatus, SubmitRequest, UploadRequest};
pub use status::StatusEvent;
pub use track::TrackRef;
