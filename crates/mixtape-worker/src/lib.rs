//! Mixtape job worker.
//!
//! This crate provides:
//! - Job submission and cancellation
//! - The job runner driving probe, mix, render, chapters and upload
//! - A bounded executor consuming from the job queue
//! - Retry, structured logging and metrics
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod runner;
pub mod submit;
pub mod upload;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use retry::RetryConfig;
pub use runner::{JobRunner, RunOutcome, RunnerConfig, SkipReason};
pub use submit::SubmissionService;
pub use upload::{UploadHook, UploadMetadata};
