//! Mixtape worker binary.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mixtape_media::FfmpegToolkit;
use mixtape_queue::{JobQueue, RedisQueue, RedisStatusPublisher};
use mixtape_storage::{ArtifactStore, FsJobStore, LocalArtifactStore, R2ArtifactStore, R2Config};
use mixtape_worker::{metrics, JobExecutor, JobRunner, WorkerConfig};

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "mixtape=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn exit_with(message: &str, err: impl std::fmt::Display) -> ! {
    error!("{}: {}", message, err);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (Redis TLS and the R2 client)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider already installed");
    }

    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting mixtape-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match metrics::init_exporter(port) {
            Ok(()) => info!("Prometheus metrics enabled on port {}", port),
            Err(e) => warn!("Metrics disabled: {}", e),
        }
    }

    let store = match FsJobStore::open(config.records_root()).await {
        Ok(s) => s,
        Err(e) => exit_with("Failed to open job store", e),
    };

    let artifacts: Arc<dyn ArtifactStore> = if R2Config::is_configured() {
        match R2ArtifactStore::from_env() {
            Ok(r2) => {
                info!("Storing artifacts in R2 bucket {}", r2.bucket());
                Arc::new(r2)
            }
            Err(e) => exit_with("Failed to configure R2", e),
        }
    } else {
        let root = config.artifacts_root();
        info!("Storing artifacts under {}", root.display());
        Arc::new(LocalArtifactStore::new(root))
    };

    let queue = match RedisQueue::from_env() {
        Ok(q) => q,
        Err(e) => exit_with("Failed to create job queue", e),
    };
    if let Err(e) = queue.init().await {
        exit_with("Failed to initialize job queue", e);
    }

    let reporter = match RedisStatusPublisher::new(&queue.config().redis_url) {
        Ok(r) => r,
        Err(e) => exit_with("Failed to create status publisher", e),
    };

    if config.recover_on_start {
        recover(&store, &queue, config.stale_claim_after).await;
    }

    let media = FfmpegToolkit::new(config.max_ffmpeg_processes).with_timeout(config.ffmpeg_timeout.as_secs());

    let runner = JobRunner::new(
        Arc::new(store),
        artifacts,
        Arc::new(media),
        Arc::new(reporter),
        config.runner_config(),
    );

    let executor = Arc::new(JobExecutor::new(config, Arc::new(queue), Arc::new(runner)));

    // Setup signal handler
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        exit_with("Executor error", e);
    }

    info!("Worker shutdown complete");
}

/// Drop claims whose holder stopped heartbeating and requeue unfinished
/// jobs. Jobs still held by a live worker are skipped by the runner.
async fn recover(store: &FsJobStore, queue: &RedisQueue, stale_after: Duration) {
    if let Err(e) = store.clear_stale_claims(stale_after).await {
        warn!("Failed to clear stale claims: {}", e);
    }

    let pending = match store.pending_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!("Failed to list pending jobs: {}", e);
            return;
        }
    };

    for id in pending {
        match queue.enqueue(&id).await {
            Ok(_) => info!(job_id = %id, "Requeued unfinished job"),
            Err(mixtape_queue::QueueError::Duplicate(_)) => {}
            Err(e) => warn!(job_id = %id, "Failed to requeue job: {}", e),
        }
    }
}
