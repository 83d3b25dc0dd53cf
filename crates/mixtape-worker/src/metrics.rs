//! Prometheus metrics for the worker.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_TOTAL: &str = "mixtape_jobs_total";
    pub const STAGE_DURATION_SECONDS: &str = "mixtape_stage_duration_seconds";
    pub const STAGE_RETRIES_TOTAL: &str = "mixtape_stage_retries_total";
}

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Must be called from within a tokio runtime.
pub fn init_exporter(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Record a job reaching a terminal status.
pub fn record_job(status: &str) {
    let labels = [("status", status.to_string())];
    counter!(names::JOBS_TOTAL, &labels).increment(1);
}

/// Record the time a job spent in one stage.
pub fn record_stage_duration(stage: &str, duration_secs: f64) {
    let labels = [("stage", stage.to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record one retry of a stage operation.
pub fn record_stage_retry(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::STAGE_RETRIES_TOTAL, &labels).increment(1);
}
