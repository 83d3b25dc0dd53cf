//! Job options and submission requests.

use std::borrow::Cow;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::encoding::{AudioFormat, DEFAULT_LOWPASS_HZ, DEFAULT_TRANSITION_MS};
use crate::error::{ModelError, ModelResult};

/// Default mixtape title used in the description and upload metadata.
pub const DEFAULT_MIXTAPE_TITLE: &str = "Smooth Fade EDM Mixtape";

/// Processing options for a job.
///
/// The configuration surface is fixed; ranges are checked at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct JobOptions {
    /// Target crossfade length in milliseconds
    #[serde(default = "default_transition_ms")]
    #[validate(range(max = 60000))]
    pub transition_ms: u32,

    /// Low-pass cutoff applied inside each overlap window
    #[serde(default = "default_lowpass_hz")]
    #[validate(range(min = 20, max = 20000))]
    pub lowpass_cutoff_hz: u32,

    /// Also produce a still-image video
    #[serde(default = "default_render_video")]
    pub render_video: bool,

    /// Container for the mixed audio
    #[serde(default)]
    pub output_audio_format: AudioFormat,

    /// Title shown at the top of the description
    #[serde(default = "default_mixtape_title")]
    #[validate(length(min = 1, max = 200))]
    pub mixtape_title: String,

    /// Additional hashtags appended to the description
    #[serde(default)]
    pub extra_hashtags: Vec<String>,

    /// External upload request, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub upload: Option<UploadRequest>,
}

fn default_transition_ms() -> u32 {
    DEFAULT_TRANSITION_MS
}
fn default_lowpass_hz() -> u32 {
    DEFAULT_LOWPASS_HZ
}
fn default_render_video() -> bool {
    true
}
fn default_mixtape_title() -> String {
    DEFAULT_MIXTAPE_TITLE.to_string()
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            transition_ms: DEFAULT_TRANSITION_MS,
            lowpass_cutoff_hz: DEFAULT_LOWPASS_HZ,
            render_video: true,
            output_audio_format: AudioFormat::default(),
            mixtape_title: default_mixtape_title(),
            extra_hashtags: Vec::new(),
            upload: None,
        }
    }
}

impl JobOptions {
    pub fn with_transition_ms(mut self, transition_ms: u32) -> Self {
        self.transition_ms = transition_ms;
        self
    }

    pub fn with_render_video(mut self, render_video: bool) -> Self {
        self.render_video = render_video;
        self
    }

    pub fn with_upload(mut self, upload: UploadRequest) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Whether the job should run the upload hook.
    pub fn upload_requested(&self) -> bool {
        self.upload.is_some()
    }
}

/// Visibility of the uploaded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyStatus {
    Private,
    #[default]
    Unlisted,
    Public,
}

impl PrivacyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyStatus::Private => "private",
            PrivacyStatus::Unlisted => "unlisted",
            PrivacyStatus::Public => "public",
        }
    }
}

/// Request to hand the rendered video to the external upload hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate, Default)]
pub struct UploadRequest {
    /// Video title (defaults to the mixtape title)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 100))]
    pub title: Option<String>,

    /// Video description (defaults to the generated description)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 5000))]
    pub description: Option<String>,

    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Visibility
    #[serde(default)]
    pub privacy_status: PrivacyStatus,
}

/// Submission payload accepted by the core.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[validate(schema(function = "validate_submit_request"))]
pub struct SubmitRequest {
    /// Track file references in playback order
    #[validate(length(min = 1), custom(function = "validate_track_refs"))]
    pub tracks: Vec<String>,

    /// Background image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg_image_ref: Option<String>,

    /// Processing options
    #[serde(default)]
    #[validate(nested)]
    pub options: JobOptions,

    /// Shuffle the tracks once, at submission time
    #[serde(default)]
    pub shuffle: bool,
}

impl SubmitRequest {
    pub fn new(tracks: Vec<String>, bg_image_ref: Option<String>, options: JobOptions) -> Self {
        Self {
            tracks,
            bg_image_ref,
            options,
            shuffle: false,
        }
    }

    /// Validate field ranges and cross-field rules.
    pub fn check(&self) -> ModelResult<()> {
        self.validate()
            .map_err(|e| ModelError::invalid_request(e.to_string()))
    }
}

fn validation_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

fn validate_track_refs(tracks: &Vec<String>) -> Result<(), ValidationError> {
    if tracks.iter().any(|t| t.trim().is_empty()) {
        return Err(validation_error("empty_track_ref", "track references must not be empty"));
    }
    Ok(())
}

fn validate_submit_request(req: &SubmitRequest) -> Result<(), ValidationError> {
    if req.options.render_video && req.bg_image_ref.as_deref().map_or(true, |r| r.trim().is_empty()) {
        return Err(validation_error(
            "missing_image",
            "render_video requires a background image",
        ));
    }
    if req.options.upload_requested() && !req.options.render_video {
        return Err(validation_error(
            "upload_without_video",
            "upload requires render_video",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tracks: &[&str]) -> SubmitRequest {
        SubmitRequest::new(
            tracks.iter().map(|t| t.to_string()).collect(),
            Some("bg.jpg".to_string()),
            JobOptions::default(),
        )
    }

    #[test]
    fn test_defaults() {
        let options = JobOptions::default();
        assert_eq!(options.transition_ms, 6000);
        assert_eq!(options.lowpass_cutoff_hz, 4000);
        assert!(options.render_video);
        assert_eq!(options.output_audio_format, AudioFormat::Mp3);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: JobOptions = serde_json::from_str(r#"{"render_video": false}"#).unwrap();
        assert!(!options.render_video);
        assert_eq!(options.transition_ms, DEFAULT_TRANSITION_MS);
    }

    #[test]
    fn test_valid_request() {
        assert!(request(&["a.mp3", "b.mp3"]).check().is_ok());
    }

    #[test]
    fn test_empty_tracks_rejected() {
        let err = request(&[]).check().unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_blank_track_rejected() {
        assert!(request(&["a.mp3", "  "]).check().is_err());
    }

    #[test]
    fn test_out_of_range_options_rejected() {
        let mut req = request(&["a.mp3"]);
        req.options.transition_ms = 120_000;
        assert!(req.check().is_err());

        let mut req = request(&["a.mp3"]);
        req.options.lowpass_cutoff_hz = 5;
        assert!(req.check().is_err());
    }

    #[test]
    fn test_video_requires_image() {
        let mut req = request(&["a.mp3"]);
        req.bg_image_ref = None;
        assert!(req.check().is_err());

        req.options.render_video = false;
        assert!(req.check().is_ok());
    }

    #[test]
    fn test_upload_requires_video() {
        let mut req = request(&["a.mp3"]);
        req.options = JobOptions::default()
            .with_render_video(false)
            .with_upload(UploadRequest::default());
        assert!(req.check().is_err());
    }
}
