//! Status event delivery.

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::debug;

use mixtape_models::{JobId, StatusEvent};

use crate::error::{QueueError, QueueResult};

/// Receives one event per committed job transition.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, event: &StatusEvent) -> QueueResult<()>;
}

/// In-process fan-out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastReporter {
    sender: broadcast::Sender<StatusEvent>,
}

impl BroadcastReporter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastReporter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl StatusReporter for BroadcastReporter {
    async fn report(&self, event: &StatusEvent) -> QueueResult<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Publishes status events over Redis Pub/Sub on `status:{job_id}`.
pub struct RedisStatusPublisher {
    client: redis::Client,
}

impl RedisStatusPublisher {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("status:{}", job_id)
    }

    /// Subscribe to status events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = StatusEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl StatusReporter for RedisStatusPublisher {
    async fn report(&self, event: &StatusEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.job_id);
        let payload = serde_json::to_string(event)?;

        debug!(job_id = %event.job_id, status = %event.status, seq = event.seq, "Publishing status event");
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| QueueError::PublishFailed(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixtape_models::JobStatus;

    fn event(seq: u64, status: JobStatus) -> StatusEvent {
        StatusEvent {
            job_id: JobId::from_string("job-1"),
            status,
            error: None,
            artifacts: Vec::new(),
            seq,
            at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_delivers_in_order() {
        let reporter = BroadcastReporter::new(8);
        let mut rx = reporter.subscribe();

        reporter.report(&event(1, JobStatus::Probing)).await.unwrap();
        reporter.report(&event(2, JobStatus::Mixing)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().seq, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.status, JobStatus::Mixing);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let reporter = BroadcastReporter::default();
        assert!(reporter.report(&event(1, JobStatus::Probing)).await.is_ok());
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(
            RedisStatusPublisher::channel_name(&JobId::from_string("abc")),
            "status:abc"
        );
    }
}
