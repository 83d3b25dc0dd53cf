//! Cloudflare R2 (S3-compatible) artifact store.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use mixtape_models::{ArtifactKind, ArtifactRef, JobId};

use crate::artifact::{artifact_key, ArtifactBody, ArtifactStore};
use crate::error::{StorageError, StorageResult};

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }

    /// Whether the R2 variables are present at all.
    pub fn is_configured() -> bool {
        std::env::var("R2_ENDPOINT_URL").is_ok() && std::env::var("R2_BUCKET_NAME").is_ok()
    }
}

/// Artifacts stored as objects in an R2 bucket.
#[derive(Clone)]
pub struct R2ArtifactStore {
    client: Client,
    bucket: String,
}

impl R2ArtifactStore {
    /// Create a new store from configuration.
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(R2Config::from_env()?))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ArtifactStore for R2ArtifactStore {
    async fn put(&self, job_id: &JobId, kind: ArtifactKind, body: ArtifactBody) -> StorageResult<ArtifactRef> {
        let key = artifact_key(job_id, kind, body.extension());
        let content_type = body.content_type().to_string();

        let (stream, size) = match body {
            ArtifactBody::Bytes { data, .. } => {
                let size = data.len() as u64;
                (ByteStream::from(data), size)
            }
            ArtifactBody::File { path, .. } => {
                debug!("Uploading {} to {}", path.display(), key);
                let size = tokio::fs::metadata(&path).await?.len();
                let stream = ByteStream::from_path(&path)
                    .await
                    .map_err(|e| StorageError::upload_failed(e.to_string()))?;
                (stream, size)
            }
        };

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(stream)
            .content_type(&content_type)
            .if_none_match("*")
            .send()
            .await
            .map_err(|e| {
                let precondition_failed = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 412)
                    .unwrap_or(false);
                if precondition_failed {
                    StorageError::ArtifactExists(key.clone())
                } else {
                    StorageError::upload_failed(e.to_string())
                }
            })?;

        info!(job_id = %job_id, kind = %kind, key = %key, size, "Uploaded artifact to R2");
        Ok(ArtifactRef::new(kind, key, content_type).with_size(size))
    }

    async fn get(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>> {
        let key = artifact.reference.as_str();
        debug!("Downloading {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(key)
                } else {
                    StorageError::DownloadFailed(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }
}
