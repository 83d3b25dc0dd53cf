//! The media operations the job runner depends on.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

use mixtape_models::encoding::{AudioFormat, VideoRenderConfig};

use crate::command::FfmpegRunner;
use crate::error::{MediaError, MediaResult};
use crate::pcm::{decode_to_pcm, encode_pcm, AudioBuffer};
use crate::probe::{probe_audio, AudioInfo};
use crate::video::render_still_video;

/// Subprocess-backed media operations.
///
/// Mixing itself is pure computation and lives in [`crate::mixer`]; this
/// trait covers everything that reads or writes media files.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Read duration and tags.
    async fn probe(&self, path: &Path) -> MediaResult<AudioInfo>;

    /// Decode to mix-rate PCM.
    async fn decode(&self, path: &Path) -> MediaResult<AudioBuffer>;

    /// Encode PCM into the requested container.
    async fn encode(&self, audio: Arc<AudioBuffer>, format: AudioFormat, output: &Path) -> MediaResult<()>;

    /// Loop a still image over an audio file.
    async fn render_video(
        &self,
        image: &Path,
        audio: &Path,
        duration_ms: u64,
        work_dir: &Path,
        output: &Path,
    ) -> MediaResult<()>;
}

/// [`MediaToolkit`] backed by the `ffmpeg` and `ffprobe` binaries.
///
/// Every subprocess holds a permit from a shared semaphore, which bounds
/// the number of concurrent FFmpeg processes across all jobs.
#[derive(Clone)]
pub struct FfmpegToolkit {
    runner: FfmpegRunner,
    permits: Arc<Semaphore>,
    video: VideoRenderConfig,
}

impl FfmpegToolkit {
    pub fn new(max_processes: usize) -> Self {
        Self {
            runner: FfmpegRunner::new(),
            permits: Arc::new(Semaphore::new(max_processes.max(1))),
            video: VideoRenderConfig::default(),
        }
    }

    /// Kill subprocesses that run longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.runner = self.runner.with_timeout(secs);
        self
    }

    pub fn with_video_config(mut self, video: VideoRenderConfig) -> Self {
        self.video = video;
        self
    }

    /// Free subprocess slots.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn permit(&self) -> MediaResult<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| MediaError::internal("ffmpeg semaphore closed"))
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, path: &Path) -> MediaResult<AudioInfo> {
        let _permit = self.permit().await?;
        probe_audio(&self.runner, path).await
    }

    async fn decode(&self, path: &Path) -> MediaResult<AudioBuffer> {
        let _permit = self.permit().await?;
        decode_to_pcm(&self.runner, path).await
    }

    async fn encode(&self, audio: Arc<AudioBuffer>, format: AudioFormat, output: &Path) -> MediaResult<()> {
        let _permit = self.permit().await?;
        encode_pcm(&self.runner, audio, format, output).await
    }

    async fn render_video(
        &self,
        image: &Path,
        audio: &Path,
        duration_ms: u64,
        work_dir: &Path,
        output: &Path,
    ) -> MediaResult<()> {
        let _permit = self.permit().await?;
        render_still_video(&self.runner, image, audio, duration_ms, &self.video, work_dir, output).await
    }
}
