//! Queue message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mixtape_models::JobId;

/// Message placed on the queue for one job. The job record itself lives in
/// the job store; the queue only carries the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
        }
    }

    /// Key used to reject duplicate enqueues of the same job.
    pub fn idempotency_key(&self) -> String {
        format!("mixtape:{}", self.job_id)
    }
}

/// A message handed to one consumer, to be acked when done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Backend message id
    pub message_id: String,
    pub message: QueueMessage,
}

impl Delivery {
    pub fn job_id(&self) -> &JobId {
        &self.message.job_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let msg = QueueMessage::new(JobId::from_string("job-1"));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"job_id\":\"job-1\""));
        let parsed: QueueMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(msg.idempotency_key(), "mixtape:job-1");
    }
}
