//! Artifact storage.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use mixtape_models::{ArtifactKind, ArtifactRef, JobId};

use crate::error::{StorageError, StorageResult};

/// Content handed to an [`ArtifactStore`].
#[derive(Debug, Clone)]
pub enum ArtifactBody {
    /// In-memory content
    Bytes {
        data: Vec<u8>,
        content_type: String,
        extension: String,
    },
    /// A file produced in the job's work directory
    File { path: PathBuf, content_type: String },
}

impl ArtifactBody {
    /// UTF-8 text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Bytes {
            data: text.into().into_bytes(),
            content_type: "text/plain; charset=utf-8".to_string(),
            extension: "txt".to_string(),
        }
    }

    /// Pretty-printed JSON.
    pub fn json<T: Serialize>(value: &T) -> StorageResult<Self> {
        Ok(Self::Bytes {
            data: serde_json::to_vec_pretty(value)?,
            content_type: "application/json".to_string(),
            extension: "json".to_string(),
        })
    }

    pub fn file(path: impl Into<PathBuf>, content_type: impl Into<String>) -> Self {
        Self::File {
            path: path.into(),
            content_type: content_type.into(),
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            ArtifactBody::Bytes { content_type, .. } | ArtifactBody::File { content_type, .. } => content_type,
        }
    }

    pub fn extension(&self) -> Option<&str> {
        match self {
            ArtifactBody::Bytes { extension, .. } => Some(extension.as_str()),
            ArtifactBody::File { path, .. } => path.extension().and_then(|e| e.to_str()),
        }
    }
}

/// Object key for an artifact: `jobs/{job_id}/{kind}.{ext}`.
pub fn artifact_key(job_id: &JobId, kind: ArtifactKind, extension: Option<&str>) -> String {
    match extension {
        Some(ext) if !ext.is_empty() => format!("jobs/{}/{}.{}", job_id, kind, ext),
        _ => format!("jobs/{}/{}", job_id, kind),
    }
}

/// Reject keys that could escape the store root.
fn validate_key(key: &str) -> StorageResult<()> {
    let path = Path::new(key);
    let ok = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Persists job outputs.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `body` as the `kind` artifact of `job_id`. Fails with
    /// [`StorageError::ArtifactExists`] if that artifact is already stored.
    async fn put(&self, job_id: &JobId, kind: ArtifactKind, body: ArtifactBody) -> StorageResult<ArtifactRef>;

    /// Read an artifact back.
    async fn get(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>>;
}

/// Artifacts as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a stored artifact.
    pub fn path_for(&self, artifact: &ArtifactRef) -> StorageResult<PathBuf> {
        validate_key(&artifact.reference)?;
        Ok(self.root.join(&artifact.reference))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, job_id: &JobId, kind: ArtifactKind, body: ArtifactBody) -> StorageResult<ArtifactRef> {
        let key = artifact_key(job_id, kind, body.extension());
        validate_key(&key)?;

        let dest = self.root.join(&key);
        if fs::try_exists(&dest).await? {
            return Err(StorageError::ArtifactExists(key));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write next to the destination, then link it into place. Linking
        // never replaces an existing file and readers never see a partial one.
        let tmp = dest.with_extension("partial");
        let size = match &body {
            ArtifactBody::Bytes { data, .. } => {
                fs::write(&tmp, data).await?;
                data.len() as u64
            }
            ArtifactBody::File { path, .. } => fs::copy(path, &tmp).await?,
        };
        let linked = fs::hard_link(&tmp, &dest).await;
        if let Err(e) = fs::remove_file(&tmp).await {
            debug!(path = %tmp.display(), "Failed to remove partial artifact: {}", e);
        }
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::ArtifactExists(key));
            }
            Err(e) => return Err(e.into()),
        }

        info!(job_id = %job_id, kind = %kind, key = %key, size, "Stored artifact");
        Ok(ArtifactRef::new(kind, key, body.content_type()).with_size(size))
    }

    async fn get(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>> {
        let path = self.path_for(artifact)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::not_found(&artifact.reference)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Artifacts held in memory. Used by tests and one-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Keys of all stored objects, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, job_id: &JobId, kind: ArtifactKind, body: ArtifactBody) -> StorageResult<ArtifactRef> {
        let key = artifact_key(job_id, kind, body.extension());
        let content_type = body.content_type().to_string();
        let data = match body {
            ArtifactBody::Bytes { data, .. } => data,
            ArtifactBody::File { path, .. } => fs::read(&path).await?,
        };
        let size = data.len() as u64;

        {
            let mut objects = self.objects.write().await;
            if objects.contains_key(&key) {
                return Err(StorageError::ArtifactExists(key));
            }
            objects.insert(key.clone(), data);
        }
        debug!(job_id = %job_id, kind = %kind, key = %key, size, "Stored artifact in memory");

        Ok(ArtifactRef::new(kind, key, content_type).with_size(size))
    }

    async fn get(&self, artifact: &ArtifactRef) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&artifact.reference)
            .cloned()
            .ok_or_else(|| StorageError::not_found(&artifact.reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_key() {
        let id = JobId::from_string("abc");
        assert_eq!(
            artifact_key(&id, ArtifactKind::MixedAudio, Some("mp3")),
            "jobs/abc/mixed_audio.mp3"
        );
        assert_eq!(artifact_key(&id, ArtifactKind::Video, None), "jobs/abc/video");
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("jobs/a/video.mp4").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("").is_err());
    }

    #[tokio::test]
    async fn test_local_store_bytes_and_file() {
        let root = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(root.path());
        let id = JobId::new();

        let text = store
            .put(&id, ArtifactKind::DescriptionText, ArtifactBody::text("hello"))
            .await
            .unwrap();
        assert_eq!(text.size_bytes, Some(5));
        assert!(text.content_type.starts_with("text/plain"));
        assert_eq!(store.get(&text).await.unwrap(), b"hello");

        let work = TempDir::new().unwrap();
        let src = work.path().join("mix.mp3");
        std::fs::write(&src, vec![7u8; 1024]).unwrap();
        let audio = store
            .put(&id, ArtifactKind::MixedAudio, ArtifactBody::file(&src, "audio/mpeg"))
            .await
            .unwrap();
        assert!(audio.reference.ends_with("mixed_audio.mp3"));
        assert_eq!(audio.size_bytes, Some(1024));

        // Survives removal of the work directory
        drop(work);
        assert_eq!(store.get(&audio).await.unwrap().len(), 1024);
    }

    #[tokio::test]
    async fn test_stored_artifact_is_never_replaced() {
        let root = TempDir::new().unwrap();
        let local = LocalArtifactStore::new(root.path());
        let memory = InMemoryArtifactStore::new();
        let id = JobId::new();

        for store in [&local as &dyn ArtifactStore, &memory] {
            let first = store
                .put(&id, ArtifactKind::DescriptionText, ArtifactBody::text("first"))
                .await
                .unwrap();
            let err = store
                .put(&id, ArtifactKind::DescriptionText, ArtifactBody::text("second"))
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::ArtifactExists(_)));
            assert!(!err.is_transient());
            assert_eq!(store.get(&first).await.unwrap(), b"first");
        }

        // No partial files left behind
        let dir = root.path().join("jobs").join(id.as_str());
        let names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["description_text.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_local_store_missing() {
        let root = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(root.path());
        let missing = ArtifactRef::new(ArtifactKind::Video, "jobs/x/video.mp4", "video/mp4");
        assert!(matches!(store.get(&missing).await, Err(StorageError::NotFound(_))));

        let escape = ArtifactRef::new(ArtifactKind::Video, "../x", "video/mp4");
        assert!(matches!(store.get(&escape).await, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryArtifactStore::new();
        let id = JobId::new();

        let body = ArtifactBody::json(&serde_json::json!({"chapters": []})).unwrap();
        let artifact = store.put(&id, ArtifactKind::ChaptersJson, body).await.unwrap();

        assert_eq!(artifact.content_type, "application/json");
        assert_eq!(store.len().await, 1);
        let data = store.get(&artifact).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert!(value["chapters"].is_array());
    }
}
