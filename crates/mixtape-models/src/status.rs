//! Status events emitted on every job transition.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRef;
use crate::job::{JobError, JobId, JobStatus};

/// Snapshot of a job right after a committed transition.
///
/// Plain value with no I/O attached; reporters decide how to surface it.
/// `seq` increases by one per transition of the same job, so readers can
/// detect gaps and drop stale or duplicate events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatusEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    pub seq: u64,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
