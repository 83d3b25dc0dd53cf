//! Job record storage with per-job claims.
//!
//! A claim gives one runner exclusive ownership of a job id. Cancellation
//! goes through the same claim, so a job is either cancelled while still
//! queued or processed to the end, never both.
//!
//! Claims carry a heartbeat. A holder refreshes it while it works, and only
//! claims whose heartbeat has gone quiet may be cleared by recovery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use mixtape_models::{Job, JobError, JobId, JobStatus, StatusEvent};

use crate::error::{StorageError, StorageResult};

/// Claim owner used while cancelling.
const CANCEL_OWNER: &str = "cancel";

/// Persistent job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new job. Fails if the id already exists.
    async fn insert(&self, job: &Job) -> StorageResult<()>;

    /// Snapshot of a job.
    async fn get(&self, id: &JobId) -> StorageResult<Job>;

    /// Overwrite an existing job record. A terminal record only accepts
    /// writes that keep its status.
    async fn update(&self, job: &Job) -> StorageResult<()>;

    /// Try to take exclusive ownership. Returns `false` if someone else
    /// already holds the job.
    async fn try_claim(&self, id: &JobId, owner: &str) -> StorageResult<bool>;

    /// Give up ownership. Releasing a job not held by `owner` is an error.
    async fn release(&self, id: &JobId, owner: &str) -> StorageResult<()>;

    /// Refresh the heartbeat of a claim held by `owner`.
    async fn heartbeat(&self, id: &JobId, owner: &str) -> StorageResult<()>;

    /// Fail a job with kind `cancelled` if it is still queued and unclaimed.
    ///
    /// Returns the resulting status event, or `None` if the job was already
    /// picked up or finished.
    async fn cancel_if_queued(&self, id: &JobId) -> StorageResult<Option<StatusEvent>>;
}

fn cancel(job: &mut Job) -> StorageResult<Option<StatusEvent>> {
    if job.status != JobStatus::Queued {
        return Ok(None);
    }
    Ok(Some(job.fail(JobError::cancelled())?))
}

fn check_overwrite(existing: &Job, incoming: &Job) -> StorageResult<()> {
    if existing.is_terminal() && incoming.status != existing.status {
        return Err(StorageError::TerminalRecord {
            job_id: existing.id.clone(),
            status: existing.status,
        });
    }
    Ok(())
}

/// Contents of a claim: who holds it and when they last checked in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ClaimRecord {
    owner: String,
    heartbeat_at: DateTime<Utc>,
}

impl ClaimRecord {
    fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            heartbeat_at: Utc::now(),
        }
    }

    fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.heartbeat_at);
        age.to_std().map(|age| age >= max_age).unwrap_or(max_age.is_zero())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    claims: HashMap<JobId, ClaimRecord>,
}

/// Job records held in memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<MemoryState>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current claim holder, if any.
    pub async fn claimed_by(&self, id: &JobId) -> Option<String> {
        self.state.lock().await.claims.get(id).map(|c| c.owner.clone())
    }

    /// Snapshots of all jobs.
    pub async fn all(&self) -> Vec<Job> {
        self.state.lock().await.jobs.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(StorageError::JobExists(job.id.clone()));
        }
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StorageResult<Job> {
        self.state
            .lock()
            .await
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::JobNotFound(id.clone()))
    }

    async fn update(&self, job: &Job) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&job.id) {
            Some(existing) => {
                check_overwrite(existing, job)?;
                *existing = job.clone();
                Ok(())
            }
            None => Err(StorageError::JobNotFound(job.id.clone())),
        }
    }

    async fn try_claim(&self, id: &JobId, owner: &str) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(id) {
            return Err(StorageError::JobNotFound(id.clone()));
        }
        if state.claims.contains_key(id) {
            return Ok(false);
        }
        state.claims.insert(id.clone(), ClaimRecord::new(owner));
        Ok(true)
    }

    async fn release(&self, id: &JobId, owner: &str) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        match state.claims.get(id) {
            Some(claim) if claim.owner == owner => {
                state.claims.remove(id);
                Ok(())
            }
            _ => Err(StorageError::NotClaimed {
                job_id: id.clone(),
                owner: owner.to_string(),
            }),
        }
    }

    async fn heartbeat(&self, id: &JobId, owner: &str) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        match state.claims.get_mut(id) {
            Some(claim) if claim.owner == owner => {
                claim.heartbeat_at = Utc::now();
                Ok(())
            }
            _ => Err(StorageError::NotClaimed {
                job_id: id.clone(),
                owner: owner.to_string(),
            }),
        }
    }

    async fn cancel_if_queued(&self, id: &JobId) -> StorageResult<Option<StatusEvent>> {
        let mut state = self.state.lock().await;
        if state.claims.contains_key(id) {
            return Ok(None);
        }
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| StorageError::JobNotFound(id.clone()))?;
        cancel(job)
    }
}

/// Job records as JSON files, claims as lock files.
///
/// Layout below the root:
/// - `jobs/{id}.json`: the record, replaced atomically on every write
/// - `claims/{id}.lock`: present while a runner owns the job; a JSON
///   claim record with the owner name and its last heartbeat
#[derive(Debug, Clone)]
pub struct FsJobStore {
    root: PathBuf,
}

impl FsJobStore {
    /// Open a store, creating its directories.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("jobs")).await?;
        fs::create_dir_all(root.join("claims")).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked_id(id: &JobId) -> StorageResult<&str> {
        let raw = id.as_str();
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(raw)
        } else {
            Err(StorageError::InvalidKey(raw.to_string()))
        }
    }

    fn job_path(&self, id: &JobId) -> StorageResult<PathBuf> {
        Ok(self.root.join("jobs").join(format!("{}.json", Self::checked_id(id)?)))
    }

    fn claim_path(&self, id: &JobId) -> StorageResult<PathBuf> {
        Ok(self.root.join("claims").join(format!("{}.lock", Self::checked_id(id)?)))
    }

    async fn write_record(&self, job: &Job) -> StorageResult<()> {
        let path = self.job_path(&job.id)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(job)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read_record(&self, id: &JobId) -> StorageResult<Job> {
        let path = self.job_path(id)?;
        match fs::read(&path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(StorageError::JobNotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of all stored jobs that are not terminal. Used to requeue work
    /// after a restart.
    pub async fn pending_ids(&self) -> StorageResult<Vec<JobId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.root.join("jobs")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let id = JobId::from_string(stem);
            if !self.read_record(&id).await?.is_terminal() {
                ids.push(id);
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    /// The claim on `id`, provided `owner` holds it.
    async fn held_claim(&self, id: &JobId, claim: &Path, owner: &str) -> StorageResult<ClaimRecord> {
        match self.read_claim(claim).await? {
            Some(record) if record.owner == owner => Ok(record),
            _ => Err(StorageError::NotClaimed {
                job_id: id.clone(),
                owner: owner.to_string(),
            }),
        }
    }

    async fn read_claim(&self, path: &Path) -> StorageResult<Option<ClaimRecord>> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove claims whose heartbeat is older than `max_age`, e.g. left
    /// behind by a crashed worker. Claims of live workers are kept.
    pub async fn clear_stale_claims(&self, max_age: Duration) -> StorageResult<usize> {
        let now = Utc::now();
        let mut removed = 0;
        let mut entries = fs::read_dir(self.root.join("claims")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            let stale = match self.read_claim(&path).await {
                Ok(Some(claim)) => claim.is_stale(max_age, now),
                Ok(None) => false,
                // Unreadable claim: fall back to the file's age
                Err(_) => {
                    let modified = entry.metadata().await?.modified()?;
                    modified.elapsed().map(|age| age >= max_age).unwrap_or(false)
                }
            };
            if !stale {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed > 0 {
            info!(removed, "Cleared stale job claims");
        }
        Ok(removed)
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn insert(&self, job: &Job) -> StorageResult<()> {
        let path = self.job_path(&job.id)?;
        if fs::try_exists(&path).await? {
            return Err(StorageError::JobExists(job.id.clone()));
        }
        self.write_record(job).await
    }

    async fn get(&self, id: &JobId) -> StorageResult<Job> {
        self.read_record(id).await
    }

    async fn update(&self, job: &Job) -> StorageResult<()> {
        let existing = self.read_record(&job.id).await?;
        check_overwrite(&existing, job)?;
        self.write_record(job).await
    }

    async fn try_claim(&self, id: &JobId, owner: &str) -> StorageResult<bool> {
        if !fs::try_exists(self.job_path(id)?).await? {
            return Err(StorageError::JobNotFound(id.clone()));
        }

        let claim = self.claim_path(id)?;
        // create_new is atomic: exactly one caller wins.
        match fs::OpenOptions::new().write(true).create_new(true).open(&claim).await {
            Ok(mut file) => {
                file.write_all(&serde_json::to_vec(&ClaimRecord::new(owner))?).await?;
                file.flush().await?;
                debug!(job_id = %id, owner, "Claimed job");
                Ok(true)
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self, id: &JobId, owner: &str) -> StorageResult<()> {
        let claim = self.claim_path(id)?;
        self.held_claim(id, &claim, owner).await?;
        fs::remove_file(&claim).await?;
        debug!(job_id = %id, owner, "Released job");
        Ok(())
    }

    async fn heartbeat(&self, id: &JobId, owner: &str) -> StorageResult<()> {
        let claim = self.claim_path(id)?;
        let mut record = self.held_claim(id, &claim, owner).await?;
        record.heartbeat_at = Utc::now();
        let tmp = claim.with_extension("lock.tmp");
        fs::write(&tmp, serde_json::to_vec(&record)?).await?;
        fs::rename(&tmp, &claim).await?;
        Ok(())
    }

    async fn cancel_if_queued(&self, id: &JobId) -> StorageResult<Option<StatusEvent>> {
        if !self.try_claim(id, CANCEL_OWNER).await? {
            return Ok(None);
        }

        let outcome = async {
            let mut job = self.read_record(id).await?;
            let event = cancel(&mut job)?;
            if event.is_some() {
                self.write_record(&job).await?;
            }
            Ok::<_, StorageError>(event)
        }
        .await;

        self.release(id, CANCEL_OWNER).await?;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixtape_models::{ErrorKind, JobOptions, TrackRef};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn job() -> Job {
        Job::new(
            vec![TrackRef::new("a.mp3")],
            None,
            JobOptions::default().with_render_video(false),
        )
    }

    async fn exercise_store(store: &dyn JobStore) {
        let mut job = job();
        store.insert(&job).await.unwrap();
        assert!(matches!(store.insert(&job).await, Err(StorageError::JobExists(_))));

        assert!(store.try_claim(&job.id, "w1").await.unwrap());
        assert!(!store.try_claim(&job.id, "w2").await.unwrap());
        assert!(store.release(&job.id, "w2").await.is_err());

        // A claimed job cannot be cancelled
        assert!(store.cancel_if_queued(&job.id).await.unwrap().is_none());

        job.advance(JobStatus::Probing).unwrap();
        store.update(&job).await.unwrap();
        assert_eq!(store.get(&job.id).await.unwrap().status, JobStatus::Probing);

        store.release(&job.id, "w1").await.unwrap();
        assert!(store.try_claim(&job.id, "w2").await.unwrap());
        store.release(&job.id, "w2").await.unwrap();

        // Not queued any more
        assert!(store.cancel_if_queued(&job.id).await.unwrap().is_none());
    }

    async fn exercise_cancel(store: &dyn JobStore) {
        let job = job();
        store.insert(&job).await.unwrap();

        let event = store.cancel_if_queued(&job.id).await.unwrap().unwrap();
        assert_eq!(event.status, JobStatus::Failed);
        assert_eq!(event.error.unwrap().kind, ErrorKind::Cancelled);

        let stored = store.get(&job.id).await.unwrap();
        assert!(stored.is_terminal());
        // Claim is free again after cancelling
        assert!(store.try_claim(&job.id, "w1").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryJobStore::new();
        exercise_store(&store).await;
        exercise_cancel(&store).await;
        assert!(matches!(
            store.get(&JobId::new()).await,
            Err(StorageError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_store() {
        let root = TempDir::new().unwrap();
        let store = FsJobStore::open(root.path()).await.unwrap();
        exercise_store(&store).await;
        exercise_cancel(&store).await;
    }

    #[tokio::test]
    async fn test_fs_store_persists_across_instances() {
        let root = TempDir::new().unwrap();
        let job = job();
        {
            let store = FsJobStore::open(root.path()).await.unwrap();
            store.insert(&job).await.unwrap();
            assert!(store.try_claim(&job.id, "crashed").await.unwrap());
        }

        let store = FsJobStore::open(root.path()).await.unwrap();
        assert_eq!(store.get(&job.id).await.unwrap(), job);
        assert_eq!(store.pending_ids().await.unwrap(), vec![job.id.clone()]);
        assert!(!store.try_claim(&job.id, "w1").await.unwrap());
        assert_eq!(store.clear_stale_claims(Duration::ZERO).await.unwrap(), 1);
        assert!(store.try_claim(&job.id, "w1").await.unwrap());
    }

    #[tokio::test]
    async fn test_recovery_keeps_live_claims_of_other_workers() {
        let root = TempDir::new().unwrap();
        let first = FsJobStore::open(root.path()).await.unwrap();
        let second = FsJobStore::open(root.path()).await.unwrap();
        let job = job();
        first.insert(&job).await.unwrap();
        assert!(first.try_claim(&job.id, "runner-a").await.unwrap());

        // Second worker starts up while the first one is busy
        assert_eq!(second.clear_stale_claims(Duration::from_secs(60)).await.unwrap(), 0);
        assert!(!second.try_claim(&job.id, "runner-b").await.unwrap());

        first.heartbeat(&job.id, "runner-a").await.unwrap();
        assert!(matches!(
            second.heartbeat(&job.id, "runner-b").await,
            Err(StorageError::NotClaimed { .. })
        ));
        first.release(&job.id, "runner-a").await.unwrap();
        assert!(second.try_claim(&job.id, "runner-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_terminal_record_is_not_overwritten() {
        async fn check(store: &dyn JobStore) {
            let mut job = job();
            store.insert(&job).await.unwrap();
            let running = {
                let mut running = job.clone();
                running.advance(JobStatus::Probing).unwrap();
                running
            };
            job.fail(JobError::internal("interrupted")).unwrap();
            store.update(&job).await.unwrap();

            assert!(matches!(
                store.update(&running).await,
                Err(StorageError::TerminalRecord { status: JobStatus::Failed, .. })
            ));
            assert_eq!(store.get(&job.id).await.unwrap().status, JobStatus::Failed);
            // Same status stays writable
            store.update(&job).await.unwrap();
        }

        check(&InMemoryJobStore::new()).await;
        let root = TempDir::new().unwrap();
        check(&FsJobStore::open(root.path()).await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_in_memory_heartbeat_requires_holder() {
        let store = InMemoryJobStore::new();
        let job = job();
        store.insert(&job).await.unwrap();
        assert!(store.heartbeat(&job.id, "w1").await.is_err());
        assert!(store.try_claim(&job.id, "w1").await.unwrap());
        store.heartbeat(&job.id, "w1").await.unwrap();
        assert_eq!(store.claimed_by(&job.id).await.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_fs_store_rejects_unsafe_ids() {
        let root = TempDir::new().unwrap();
        let store = FsJobStore::open(root.path()).await.unwrap();
        let mut job = job();
        job.id = JobId::from_string("../escape");
        assert!(matches!(store.insert(&job).await, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(FsJobStore::open(root.path()).await.unwrap());
        let job = job();
        store.insert(&job).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = job.id.clone();
            handles.push(tokio::spawn(async move {
                store.try_claim(&id, &format!("w{}", i)).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
