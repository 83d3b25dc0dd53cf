//! Seam for publishing the rendered video to an external platform.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mixtape_models::{ArtifactRef, JobOptions, PrivacyStatus, UploadRequest};

use crate::error::WorkerResult;

/// Platform title limit.
const MAX_TITLE_LEN: usize = 100;

/// Metadata sent along with an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub privacy_status: PrivacyStatus,
}

impl UploadMetadata {
    /// Fill gaps in the request from the job options and the generated
    /// description.
    pub fn from_request(request: &UploadRequest, options: &JobOptions, generated_description: &str) -> Self {
        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(options.mixtape_title.as_str());

        let description = match request.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => generated_description.to_string(),
        };

        Self {
            title: title.chars().take(MAX_TITLE_LEN).collect(),
            description,
            tags: request.tags.clone(),
            privacy_status: request.privacy_status,
        }
    }
}

/// Uploads a video and returns the platform's id for it.
#[async_trait]
pub trait UploadHook: Send + Sync {
    async fn upload(&self, video: &ArtifactRef, metadata: &UploadMetadata) -> WorkerResult<String>;
}
