//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryConfig;
use crate::runner::RunnerConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent FFmpeg processes across all jobs
    pub max_ffmpeg_processes: usize,
    /// Kill FFmpeg processes running longer than this
    pub ffmpeg_timeout: Duration,
    /// Parent of the per-job work directories
    pub work_dir: PathBuf,
    /// Root of the job records and local artifacts
    pub storage_root: PathBuf,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Retries per stage for transient tool errors
    pub stage_retries: u32,
    /// First retry delay, doubled per attempt
    pub retry_base_delay: Duration,
    /// How long one dequeue call blocks
    pub dequeue_timeout: Duration,
    /// Prometheus exporter port; no exporter when unset
    pub metrics_port: Option<u16>,
    /// Clear stale claims and requeue unfinished jobs at startup
    pub recover_on_start: bool,
    /// How often a runner refreshes the claim on its job
    pub claim_heartbeat: Duration,
    /// Claims without a heartbeat for this long are cleared at startup
    pub stale_claim_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_ffmpeg_processes: 4,
            ffmpeg_timeout: Duration::from_secs(3600),
            work_dir: PathBuf::from("/tmp/mixtape"),
            storage_root: PathBuf::from("./data"),
            shutdown_timeout: Duration::from_secs(30),
            stage_retries: 2,
            retry_base_delay: Duration::from_millis(500),
            dequeue_timeout: Duration::from_secs(1),
            metrics_port: None,
            recover_on_start: true,
            claim_heartbeat: Duration::from_secs(30),
            stale_claim_after: Duration::from_secs(120),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS").unwrap_or(defaults.max_concurrent_jobs),
            max_ffmpeg_processes: env_parse("WORKER_MAX_FFMPEG").unwrap_or(defaults.max_ffmpeg_processes),
            ffmpeg_timeout: env_parse("WORKER_FFMPEG_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ffmpeg_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            storage_root: std::env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            stage_retries: env_parse("WORKER_STAGE_RETRIES").unwrap_or(defaults.stage_retries),
            retry_base_delay: env_parse("WORKER_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            dequeue_timeout: defaults.dequeue_timeout,
            metrics_port: env_parse("METRICS_PORT"),
            recover_on_start: env_parse("WORKER_RECOVER_ON_START").unwrap_or(defaults.recover_on_start),
            claim_heartbeat: env_parse("WORKER_CLAIM_HEARTBEAT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_heartbeat),
            stale_claim_after: env_parse("WORKER_STALE_CLAIM_AFTER")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_claim_after),
        }
    }

    /// Root of the job record store.
    pub fn records_root(&self) -> PathBuf {
        self.storage_root.join("records")
    }

    /// Directory holding locally stored artifacts.
    pub fn artifacts_root(&self) -> PathBuf {
        self.storage_root.join("artifacts")
    }

    /// Runner settings derived from this config.
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            work_dir: self.work_dir.clone(),
            retry: RetryConfig::new("stage")
                .with_max_retries(self.stage_retries)
                .with_base_delay(self.retry_base_delay),
            claim_heartbeat: self.claim_heartbeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert!(config.metrics_port.is_none());
        assert_eq!(config.records_root(), PathBuf::from("./data/records"));
        assert_eq!(config.artifacts_root(), PathBuf::from("./data/artifacts"));

        let runner = config.runner_config();
        assert_eq!(runner.retry.max_retries, 2);
        assert_eq!(runner.work_dir, PathBuf::from("/tmp/mixtape"));
        assert!(config.stale_claim_after > runner.claim_heartbeat);
    }
}
