//! Job runner: drives one job from `queued` to a terminal status.
//!
//! Stages run strictly in order:
//!
//! 1. `probing`: read duration and tags of every track
//! 2. `mixing`: decode, crossfade on the blocking pool, encode, store
//! 3. `rendering_video` (optional): loop the background image over the mix
//! 4. `building_chapters`: chapters, description text and chapter JSON
//! 5. `uploading` (optional): hand the video to the [`UploadHook`]
//!
//! Every transition is persisted before it is reported. Intermediate files
//! live in a per-job temporary directory that is removed on every exit path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn, Instrument};

use mixtape_media::{crossfade_blocking, CrossfadeSettings, MediaError, MediaToolkit};
use mixtape_models::{
    build_chapters, expected_mix_duration_ms, render_description, ArtifactKind, ArtifactRef, Job, JobId,
    JobStatus, OverlapPlan, StatusEvent,
};
use mixtape_queue::StatusReporter;
use mixtape_storage::{ArtifactBody, ArtifactStore, JobStore};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_if, RetryConfig, RetryResult};
use crate::upload::{UploadHook, UploadMetadata};

/// Why a job was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another runner holds the claim
    Claimed,
    /// Already completed, failed or cancelled
    Terminal,
}

/// Outcome of [`JobRunner::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Job),
    Failed(Job),
    Skipped(SkipReason),
}

impl RunOutcome {
    pub fn job(&self) -> Option<&Job> {
        match self {
            RunOutcome::Completed(job) | RunOutcome::Failed(job) => Some(job),
            RunOutcome::Skipped(_) => None,
        }
    }
}

/// Runner settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Parent of the per-job work directories
    pub work_dir: PathBuf,
    /// Retry limits for transient stage failures
    pub retry: RetryConfig,
    /// How often a held claim is refreshed
    pub claim_heartbeat: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            retry: RetryConfig::default(),
            claim_heartbeat: Duration::from_secs(30),
        }
    }
}

/// Intermediate results handed from one stage to the next.
struct MixResult {
    plan: Vec<OverlapPlan>,
    duration_ms: u64,
    audio_path: PathBuf,
}

/// Measures time spent per stage.
struct StageClock {
    started: Instant,
}

impl StageClock {
    fn start() -> Self {
        Self { started: Instant::now() }
    }

    fn lap(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        self.started = Instant::now();
        elapsed
    }
}

/// Executes the pipeline for one job at a time.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    media: Arc<dyn MediaToolkit>,
    reporter: Arc<dyn StatusReporter>,
    upload: Option<Arc<dyn UploadHook>>,
    config: RunnerConfig,
    owner: String,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        media: Arc<dyn MediaToolkit>,
        reporter: Arc<dyn StatusReporter>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            artifacts,
            media,
            reporter,
            upload: None,
            config,
            owner: format!("runner-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn with_upload_hook(mut self, hook: Arc<dyn UploadHook>) -> Self {
        self.upload = Some(hook);
        self
    }

    /// Claim owner name used by this runner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Claim and run a job. The claim is released on every path.
    ///
    /// Pipeline failures are recorded on the job and returned as
    /// [`RunOutcome::Failed`]; `Err` means the job record itself could not
    /// be read or written.
    pub async fn run(&self, job_id: &JobId) -> WorkerResult<RunOutcome> {
        if !self.store.try_claim(job_id, &self.owner).await? {
            debug!(job_id = %job_id, "Job claimed elsewhere, skipping");
            return Ok(RunOutcome::Skipped(SkipReason::Claimed));
        }

        let heartbeat = self.spawn_heartbeat(job_id);
        let logger = JobLogger::new(job_id);
        let result = self.run_claimed(job_id, &logger).instrument(logger.create_span()).await;
        heartbeat.abort();

        if let Err(e) = self.store.release(job_id, &self.owner).await {
            warn!(job_id = %job_id, "Failed to release claim: {}", e);
        }
        result
    }

    /// Keep the claim fresh so recovery on other workers leaves it alone.
    fn spawn_heartbeat(&self, job_id: &JobId) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let owner = self.owner.clone();
        let job_id = job_id.clone();
        let period = self.config.claim_heartbeat.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store.heartbeat(&job_id, &owner).await {
                    warn!(job_id = %job_id, "Failed to refresh claim: {}", e);
                }
            }
        })
    }

    async fn run_claimed(&self, job_id: &JobId, logger: &JobLogger) -> WorkerResult<RunOutcome> {
        let mut job = self.store.get(job_id).await?;
        if job.is_terminal() {
            info!(job_id = %job_id, status = %job.status, "Job already finished, skipping");
            return Ok(RunOutcome::Skipped(SkipReason::Terminal));
        }

        let mut clock = StageClock::start();
        let result = if job.status == JobStatus::Queued {
            logger.log_start(job.tracks.len());
            self.execute(&mut job, logger, &mut clock).await
        } else {
            // A previous runner stopped mid-pipeline. Stages are not resumable.
            Err(WorkerError::internal(format!(
                "job was interrupted during {}",
                job.status
            )))
        };

        match result {
            Ok(()) => {
                metrics::record_job(JobStatus::Completed.as_str());
                Ok(RunOutcome::Completed(job))
            }
            Err(e) => {
                let stage = job.status;
                logger.log_error(stage, &e.to_string());
                if !job.is_terminal() {
                    metrics::record_stage_duration(stage.as_str(), clock.lap().as_secs_f64());
                    let event = job.fail(e.to_job_error())?;
                    self.commit(&job, &event).await?;
                }
                metrics::record_job(JobStatus::Failed.as_str());
                Ok(RunOutcome::Failed(job))
            }
        }
    }

    /// Run every stage inside a fresh work directory.
    async fn execute(&self, job: &mut Job, logger: &JobLogger, clock: &mut StageClock) -> WorkerResult<()> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let work = tempfile::Builder::new()
            .prefix(&format!("mixtape-{}-", job.id))
            .tempdir_in(&self.config.work_dir)?;
        let work_dir = work.path();

        self.advance(job, JobStatus::Probing, logger, clock).await?;
        self.probe_tracks(job).await?;

        self.advance(job, JobStatus::Mixing, logger, clock).await?;
        let mix = self.mix_tracks(job, work_dir, logger).await?;

        if job.options.render_video {
            self.advance(job, JobStatus::RenderingVideo, logger, clock).await?;
            self.render_video(job, &mix, work_dir).await?;
        }

        self.advance(job, JobStatus::BuildingChapters, logger, clock).await?;
        let description = self.build_chapter_artifacts(job, &mix).await?;

        if job.options.upload_requested() {
            self.advance(job, JobStatus::Uploading, logger, clock).await?;
            self.upload_video(job, &description).await?;
        }

        self.advance(job, JobStatus::Completed, logger, clock).await?;
        logger.log_completion(mix.duration_ms, job.artifacts.len());
        Ok(())
    }

    /// Fill in durations and missing tags.
    async fn probe_tracks(&self, job: &mut Job) -> WorkerResult<()> {
        for track in job.tracks.iter_mut() {
            let path = Path::new(&track.path);
            let info = self
                .with_retry(JobStatus::Probing, move || async move {
                    self.media.probe(path).await.map_err(WorkerError::from)
                })
                .await?;

            track.duration_ms = Some(info.duration_ms);
            if track.title.is_none() {
                track.title = info.title;
            }
            if track.artist.is_none() {
                track.artist = info.artist;
            }
        }
        self.store.update(job).await?;
        Ok(())
    }

    /// Decode, crossfade and encode. Stores the mixed audio artifact.
    async fn mix_tracks(&self, job: &mut Job, work_dir: &Path, logger: &JobLogger) -> WorkerResult<MixResult> {
        let mut segments = Vec::with_capacity(job.tracks.len());
        for track in job.tracks.iter_mut() {
            let path = Path::new(&track.path);
            let buffer = self
                .with_retry(JobStatus::Mixing, move || async move {
                    self.media.decode(path).await.map_err(WorkerError::from)
                })
                .await?;
            if buffer.is_empty() {
                return Err(MediaError::ZeroDuration(path.to_path_buf()).into());
            }

            // The mix uses what was actually decoded, not the probed length.
            let decoded_ms = buffer.duration_ms();
            if track.duration_ms != Some(decoded_ms) {
                debug!(
                    path = %track.path,
                    probed_ms = ?track.duration_ms,
                    decoded_ms,
                    "Decoded length differs from probe"
                );
            }
            track.duration_ms = Some(decoded_ms);
            segments.push(buffer);
        }

        let durations: Vec<u64> = segments.iter().map(|s| s.duration_ms()).collect();
        let settings = CrossfadeSettings {
            transition_ms: u64::from(job.options.transition_ms),
            lowpass_cutoff_hz: job.options.lowpass_cutoff_hz,
        };
        let mix = crossfade_blocking(segments, settings).await?;
        let duration_ms = mix.duration_ms();

        if expected_mix_duration_ms(&durations, &mix.plan) != duration_ms {
            return Err(WorkerError::internal(format!(
                "mix length {} ms does not match the overlap plan",
                duration_ms
            )));
        }
        logger.log_progress(&format!(
            "Mixed {} tracks into {} ms with {} crossfades",
            durations.len(),
            duration_ms,
            mix.plan.len()
        ));

        let format = job.options.output_audio_format;
        let audio_path = work_dir.join(format!("mix.{}", format.extension()));
        let audio = Arc::new(mix.audio);
        {
            let audio = &audio;
            let output = audio_path.as_path();
            self.with_retry(JobStatus::Mixing, move || async move {
                self.media
                    .encode(Arc::clone(audio), format, output)
                    .await
                    .map_err(WorkerError::from)
            })
            .await?;
        }
        drop(audio);

        let body = ArtifactBody::file(&audio_path, format.content_type());
        self.store_artifact(job, ArtifactKind::MixedAudio, body).await?;

        Ok(MixResult {
            plan: mix.plan,
            duration_ms,
            audio_path,
        })
    }

    async fn render_video(&self, job: &mut Job, mix: &MixResult, work_dir: &Path) -> WorkerResult<()> {
        let image = job
            .bg_image_ref
            .clone()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| WorkerError::invalid_input("render_video requires a background image"))?;

        let image_path = Path::new(&image);
        let audio_path = mix.audio_path.as_path();
        let video_path = work_dir.join("video.mp4");
        let output = video_path.as_path();
        let duration_ms = mix.duration_ms;

        self.with_retry(JobStatus::RenderingVideo, move || async move {
            self.media
                .render_video(image_path, audio_path, duration_ms, work_dir, output)
                .await
                .map_err(WorkerError::from)
        })
        .await?;

        self.store_artifact(job, ArtifactKind::Video, ArtifactBody::file(&video_path, "video/mp4"))
            .await
    }

    /// Store the description and chapter list; returns the description.
    async fn build_chapter_artifacts(&self, job: &mut Job, mix: &MixResult) -> WorkerResult<String> {
        let sheet = build_chapters(&job.tracks, &mix.plan, mix.duration_ms)?;
        let description = render_description(&sheet, &job.options);

        self.store_artifact(job, ArtifactKind::DescriptionText, ArtifactBody::text(description.clone()))
            .await?;
        self.store_artifact(job, ArtifactKind::ChaptersJson, ArtifactBody::json(&sheet)?)
            .await?;
        Ok(description)
    }

    async fn upload_video(&self, job: &mut Job, description: &str) -> WorkerResult<()> {
        let request = job
            .options
            .upload
            .clone()
            .ok_or_else(|| WorkerError::internal("upload stage without an upload request"))?;
        let video = job
            .artifact(ArtifactKind::Video)
            .cloned()
            .ok_or_else(|| WorkerError::internal("upload requested without a video artifact"))?;
        let hook = self
            .upload
            .as_deref()
            .ok_or_else(|| WorkerError::upload_failed("no upload hook configured"))?;

        let metadata = UploadMetadata::from_request(&request, &job.options, description);
        let video = &video;
        let metadata = &metadata;
        let external_id = self
            .with_retry(JobStatus::Uploading, move || async move {
                hook.upload(video, metadata).await.map_err(|e| match e {
                    WorkerError::UploadFailed(_) => e,
                    other => WorkerError::upload_failed(other.to_string()),
                })
            })
            .await?;

        info!(job_id = %job.id, external_id = %external_id, "Video uploaded");
        job.add_artifact(ArtifactRef::new(ArtifactKind::ExternalUpload, external_id, "text/plain"))?;
        self.store.update(job).await?;
        Ok(())
    }

    async fn store_artifact(&self, job: &mut Job, kind: ArtifactKind, body: ArtifactBody) -> WorkerResult<()> {
        let job_id = job.id.clone();
        let body = &body;
        let artifact = self
            .with_retry(job.status, move || {
                let job_id = job_id.clone();
                async move {
                    self.artifacts
                        .put(&job_id, kind, body.clone())
                        .await
                        .map_err(WorkerError::from)
                }
            })
            .await?;

        job.add_artifact(artifact)?;
        self.store.update(job).await?;
        Ok(())
    }

    async fn advance(
        &self,
        job: &mut Job,
        to: JobStatus,
        logger: &JobLogger,
        clock: &mut StageClock,
    ) -> WorkerResult<()> {
        let from = job.status;
        let event = job.advance(to)?;
        self.commit(job, &event).await?;

        let elapsed = clock.lap();
        if from != JobStatus::Queued {
            metrics::record_stage_duration(from.as_str(), elapsed.as_secs_f64());
            logger.log_stage_done(from, elapsed);
        }
        if !to.is_terminal() {
            logger.log_stage(to);
        }
        Ok(())
    }

    /// Persist, then report.
    async fn commit(&self, job: &Job, event: &StatusEvent) -> WorkerResult<()> {
        self.store.update(job).await?;
        if let Err(e) = self.reporter.report(event).await {
            warn!(job_id = %job.id, status = %event.status, "Failed to report status: {}", e);
        }
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, stage: JobStatus, operation: F) -> WorkerResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = WorkerResult<T>>,
    {
        let config = self.config.retry.named(stage.as_str());
        match retry_if(&config, operation, WorkerError::is_retryable).await {
            RetryResult::Success(value) => Ok(value),
            RetryResult::Failed { error, attempts } => {
                if attempts > 1 {
                    warn!(stage = %stage, attempts, "Giving up after retries: {}", error);
                }
                Err(error)
            }
        }
    }
}
