//! Job output artifacts.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of output a job produces. A job holds at most one artifact per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The crossfaded mix
    MixedAudio,
    /// Still-image video carrying the mix
    Video,
    /// Human-readable description with the tracklist
    DescriptionText,
    /// Machine-readable chapter list
    ChaptersJson,
    /// Identifier returned by the external upload hook
    ExternalUpload,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::MixedAudio => "mixed_audio",
            ArtifactKind::Video => "video",
            ArtifactKind::DescriptionText => "description_text",
            ArtifactKind::ChaptersJson => "chapters_json",
            ArtifactKind::ExternalUpload => "external_upload",
        }
    }

    /// Kinds that may still be attached after the job reached a terminal state.
    pub fn is_late_metadata(&self) -> bool {
        matches!(self, ArtifactKind::ExternalUpload)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactRef {
    /// Artifact kind
    pub kind: ArtifactKind,
    /// Storage-specific locator (object key, path, or external id)
    pub reference: String,
    /// Size in bytes, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// MIME type
    pub content_type: String,
    /// When the artifact was stored
    pub created_at: DateTime<Utc>,
}

impl ArtifactRef {
    pub fn new(kind: ArtifactKind, reference: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            kind,
            reference: reference.into(),
            size_bytes: None,
            content_type: content_type.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }
}
