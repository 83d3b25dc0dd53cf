//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mixtape_queue::{Delivery, JobQueue};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::FailureTracker;
use crate::runner::{JobRunner, RunOutcome};

/// Pulls jobs from the queue and runs at most `max_concurrent_jobs` of
/// them at a time.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    runner: Arc<JobRunner>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, queue: Arc<dyn JobQueue>, runner: Arc<JobRunner>) -> Self {
        let max_jobs = config.max_concurrent_jobs.max(1);
        let job_semaphore = Arc::new(Semaphore::new(max_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            runner,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until [`JobExecutor::shutdown`] is called, then wait for
    /// in-flight jobs up to the shutdown timeout.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name,
            self.max_jobs()
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(3);

        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                result = self.consume_next() => match result {
                    Ok(()) => failures.record_success(),
                    Err(e) => {
                        if failures.record_failure() {
                            error!("Error consuming jobs: {}", e);
                        }
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
        info!("Shutdown signal received, stopping executor");

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout after {:?} with {} jobs still running",
                self.config.shutdown_timeout,
                self.running_jobs()
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Wait for a free slot, then for a job.
    async fn consume_next(&self) -> WorkerResult<()> {
        let permit = Arc::clone(&self.job_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::internal("job semaphore closed"))?;

        let Some(delivery) = self
            .queue
            .dequeue(&self.consumer_name, self.config.dequeue_timeout)
            .await?
        else {
            return Ok(());
        };

        debug!(job_id = %delivery.job_id(), "Consumed job from queue");
        let runner = Arc::clone(&self.runner);
        let queue = Arc::clone(&self.queue);
        tokio::spawn(Self::execute_job(runner, queue, delivery, permit));
        Ok(())
    }

    /// Run one delivery and settle it with the queue.
    async fn execute_job(
        runner: Arc<JobRunner>,
        queue: Arc<dyn JobQueue>,
        delivery: Delivery,
        _permit: OwnedSemaphorePermit,
    ) {
        let job_id = delivery.job_id().clone();
        info!("Executing job {}", job_id);

        match runner.run(&job_id).await {
            Ok(outcome) => {
                match &outcome {
                    RunOutcome::Completed(_) => info!("Job {} completed successfully", job_id),
                    RunOutcome::Failed(job) => {
                        let kind = job.error.as_ref().map(|e| e.kind.as_str()).unwrap_or("unknown");
                        warn!("Job {} failed with {}", job_id, kind);
                    }
                    RunOutcome::Skipped(reason) => debug!("Job {} skipped: {:?}", job_id, reason),
                }
                if let Err(e) = queue.ack(&delivery).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
            }
            Err(e) => {
                error!("Job {} could not be run: {}", job_id, e);
                if let Err(dlq_err) = queue.dead_letter(&delivery, &e.to_string()).await {
                    error!("Failed to move job {} to DLQ: {}", job_id, dlq_err);
                }
            }
        }
    }

    fn max_jobs(&self) -> usize {
        self.config.max_concurrent_jobs.max(1)
    }

    /// Jobs currently executing.
    pub fn running_jobs(&self) -> usize {
        self.max_jobs() - self.job_semaphore.available_permits()
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.running_jobs() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
