//! Job submission and cancellation.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{info, warn};

use mixtape_models::{Job, JobError, JobId, StatusEvent, SubmitRequest, TrackRef};
use mixtape_queue::{JobQueue, StatusReporter};
use mixtape_storage::JobStore;

use crate::error::WorkerResult;

/// Creates queued jobs and hands them to the queue.
pub struct SubmissionService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    reporter: Arc<dyn StatusReporter>,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>, reporter: Arc<dyn StatusReporter>) -> Self {
        Self { store, queue, reporter }
    }

    /// Validate, persist and enqueue. The returned job is `queued`.
    ///
    /// Track order is kept as given unless the request asks for a shuffle,
    /// which happens here and only here.
    pub async fn submit(&self, request: SubmitRequest) -> WorkerResult<Job> {
        request.check()?;

        let mut paths = request.tracks;
        if request.shuffle {
            paths.shuffle(&mut rand::rng());
        }
        let tracks = paths.into_iter().map(TrackRef::new).collect();
        let mut job = Job::new(tracks, request.bg_image_ref, request.options);

        self.store.insert(&job).await?;
        if let Err(e) = self.queue.enqueue(&job.id).await {
            warn!(job_id = %job.id, "Enqueue failed: {}", e);
            let event = job.fail(JobError::internal(format!("enqueue failed: {}", e)))?;
            self.store.update(&job).await?;
            self.reporter.report(&event).await.ok();
            return Err(e.into());
        }

        info!(job_id = %job.id, tracks = job.tracks.len(), "Job submitted");
        Ok(job)
    }

    /// Cancel a job that no worker has claimed yet. Returns `None` when the
    /// job is already running or finished.
    pub async fn cancel(&self, job_id: &JobId) -> WorkerResult<Option<StatusEvent>> {
        let event = self.store.cancel_if_queued(job_id).await?;
        if let Some(ref event) = event {
            info!(job_id = %job_id, "Job cancelled");
            self.reporter.report(event).await.ok();
        }
        Ok(event)
    }

    /// Snapshot of a job.
    pub async fn status(&self, job_id: &JobId) -> WorkerResult<Job> {
        Ok(self.store.get(job_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixtape_models::{ErrorKind, JobOptions, JobStatus};
    use mixtape_queue::{BroadcastReporter, MemoryQueue};
    use mixtape_storage::InMemoryJobStore;
    use std::time::Duration;

    fn service() -> (SubmissionService, Arc<MemoryQueue>, Arc<InMemoryJobStore>) {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let service = SubmissionService::new(store.clone(), queue.clone(), Arc::new(BroadcastReporter::default()));
        (service, queue, store)
    }

    fn request(tracks: &[&str]) -> SubmitRequest {
        SubmitRequest::new(
            tracks.iter().map(|t| t.to_string()).collect(),
            None,
            JobOptions::default().with_render_video(false),
        )
    }

    #[tokio::test]
    async fn test_submit_persists_and_enqueues() {
        let (service, queue, _) = service();
        let job = service.submit(request(&["a.mp3", "b.mp3", "c.mp3"])).await.unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        let paths: Vec<_> = job.tracks.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, vec!["a.mp3", "b.mp3", "c.mp3"]);

        let stored = service.status(&job.id).await.unwrap();
        assert_eq!(stored, job);

        let delivery = queue.dequeue("t", Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(delivery.job_id(), &job.id);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_request() {
        let (service, queue, store) = service();
        let err = service.submit(request(&[])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(queue.is_empty().await);
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_shuffle_keeps_track_set() {
        let (service, _, _) = service();
        let names: Vec<String> = (0..20).map(|i| format!("{:02}.mp3", i)).collect();
        let mut req = SubmitRequest::new(names.clone(), None, JobOptions::default().with_render_video(false));
        req.shuffle = true;

        let job = service.submit(req).await.unwrap();
        let mut paths: Vec<String> = job.tracks.iter().map(|t| t.path.clone()).collect();
        paths.sort();
        assert_eq!(paths, names);
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let (service, _, _) = service();
        let job = service.submit(request(&["a.mp3"])).await.unwrap();

        let event = service.cancel(&job.id).await.unwrap().unwrap();
        assert_eq!(event.status, JobStatus::Failed);
        assert_eq!(event.error.unwrap().kind, ErrorKind::Cancelled);

        // Second cancel is a no-op
        assert!(service.cancel(&job.id).await.unwrap().is_none());
    }
}
