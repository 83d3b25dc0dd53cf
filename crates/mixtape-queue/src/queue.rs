//! Job queues: in-process and Redis Streams.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use redis::AsyncCommands;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use mixtape_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::job::{Delivery, QueueMessage};

/// Delivers job ids to workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue a job. Rejects a job id that is already queued or in flight.
    async fn enqueue(&self, job_id: &JobId) -> QueueResult<String>;

    /// Wait up to `timeout` for the next job.
    async fn dequeue(&self, consumer: &str, timeout: Duration) -> QueueResult<Option<Delivery>>;

    /// Mark a delivery as handled.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Park a delivery that could not be handled and ack the original.
    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    ready: VecDeque<Delivery>,
    /// Job ids queued or in flight
    active: HashSet<JobId>,
    in_flight: HashMap<String, Delivery>,
    dead: Vec<(Delivery, String)>,
}

/// In-process FIFO queue.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    notify: Notify,
    next_id: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs waiting for a consumer.
    pub async fn len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.ready.is_empty()
    }

    /// Deliveries handed out and not yet acked.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Dead-lettered deliveries with their error.
    pub async fn dead_letters(&self) -> Vec<(Delivery, String)> {
        self.state.lock().await.dead.clone()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job_id: &JobId) -> QueueResult<String> {
        let message = QueueMessage::new(job_id.clone());
        let mut state = self.state.lock().await;
        if !state.active.insert(job_id.clone()) {
            return Err(QueueError::Duplicate(message.idempotency_key()));
        }

        let message_id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        state.ready.push_back(Delivery {
            message_id: message_id.clone(),
            message,
        });
        drop(state);

        self.notify.notify_one();
        debug!(job_id = %job_id, message_id = %message_id, "Enqueued job");
        Ok(message_id)
    }

    async fn dequeue(&self, consumer: &str, timeout: Duration) -> QueueResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so a concurrent enqueue
            // between the check and the wait is not missed.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(delivery) = state.ready.pop_front() {
                    state
                        .in_flight
                        .insert(delivery.message_id.clone(), delivery.clone());
                    debug!(consumer, job_id = %delivery.job_id(), "Dequeued job");
                    return Ok(Some(delivery));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.in_flight.remove(&delivery.message_id).is_none() {
            return Err(QueueError::UnknownDelivery(delivery.message_id.clone()));
        }
        state.active.remove(delivery.job_id());
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        self.ack(delivery).await?;
        self.state
            .lock()
            .await
            .dead
            .push((delivery.clone(), error.to_string()));
        warn!(job_id = %delivery.job_id(), error, "Moved job to dead letter queue");
        Ok(())
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Deliveries idle this long are reclaimed from crashed consumers
    pub visibility_timeout: Duration,
    /// TTL of the duplicate-enqueue guard
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "mixtape:jobs".to_string(),
            consumer_group: "mixtape:workers".to_string(),
            dlq_stream_name: "mixtape:dlq".to_string(),
            visibility_timeout: Duration::from_secs(1800),
            dedup_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            dedup_ttl: defaults.dedup_ttl,
        }
    }
}

/// Redis Streams queue with a consumer group.
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    fn dedup_key(&self, message: &QueueMessage) -> String {
        format!("{}:dedup:{}", self.config.stream_name, message.idempotency_key())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Parse stream entries, acking payloads that cannot be decoded.
    async fn parse_entries(&self, entries: Vec<redis::streams::StreamId>) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for entry in entries {
            let message_id = entry.id.clone();
            let Some(redis::Value::BulkString(payload)) = entry.map.get("job") else {
                continue;
            };
            match serde_json::from_slice::<QueueMessage>(payload) {
                Ok(message) => deliveries.push(Delivery { message_id, message }),
                Err(e) => {
                    warn!("Failed to parse job payload: {}", e);
                    self.ack_id(&message_id).await.ok();
                }
            }
        }
        deliveries
    }

    /// Reclaim one delivery that another consumer left idle too long.
    async fn claim_stale(&self, consumer: &str) -> QueueResult<Option<Delivery>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(self.config.visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let claimed = self.parse_entries(result.claimed).await.into_iter().next();
        if let Some(ref delivery) = claimed {
            info!(job_id = %delivery.job_id(), "Claimed stale job from stream");
        }
        Ok(claimed)
    }

    async fn ack_id(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job_id: &JobId) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let message = QueueMessage::new(job_id.clone());
        let payload = serde_json::to_string(&message)?;

        // SET NX doubles as the duplicate check.
        let dedup_key = self.dedup_key(&message);
        let fresh: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs())
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !fresh {
            warn!("Duplicate job rejected: {}", job_id);
            return Err(QueueError::Duplicate(message.idempotency_key()));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!("Enqueued job {} with message ID {}", job_id, message_id);
        Ok(message_id)
    }

    async fn dequeue(&self, consumer: &str, timeout: Duration) -> QueueResult<Option<Delivery>> {
        if let Some(delivery) = self.claim_stale(consumer).await? {
            return Ok(Some(delivery));
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(timeout.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let Some(reply) = result else {
            return Ok(None);
        };

        let entries = reply.keys.into_iter().flat_map(|k| k.ids).collect();
        let delivery = self.parse_entries(entries).await.into_iter().next();
        if let Some(ref d) = delivery {
            debug!(consumer, job_id = %d.job_id(), "Consumed job from stream");
        }
        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.ack_id(&delivery.message_id).await?;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(self.dedup_key(&delivery.message)).await?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&delivery.message)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(delivery).await?;

        warn!("Moved job {} to DLQ: {}", delivery.job_id(), error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_queue_fifo() {
        let queue = MemoryQueue::new();
        let a = JobId::new();
        let b = JobId::new();
        queue.enqueue(&a).await.unwrap();
        queue.enqueue(&b).await.unwrap();
        assert_eq!(queue.len().await, 2);

        let first = queue.dequeue("w", Duration::from_millis(10)).await.unwrap().unwrap();
        let second = queue.dequeue("w", Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.job_id(), &a);
        assert_eq!(second.job_id(), &b);
        assert_eq!(queue.in_flight().await, 2);

        queue.ack(&first).await.unwrap();
        assert!(queue.ack(&first).await.is_err());
        assert_eq!(queue.in_flight().await, 1);
    }

    #[tokio::test]
    async fn test_memory_queue_rejects_duplicates_until_acked() {
        let queue = MemoryQueue::new();
        let id = JobId::new();
        queue.enqueue(&id).await.unwrap();
        assert!(matches!(queue.enqueue(&id).await, Err(QueueError::Duplicate(_))));

        let delivery = queue.dequeue("w", Duration::from_millis(10)).await.unwrap().unwrap();
        assert!(queue.enqueue(&id).await.is_err());
        queue.ack(&delivery).await.unwrap();
        assert!(queue.enqueue(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_queue_timeout() {
        let queue = MemoryQueue::new();
        let got = queue.dequeue("w", Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_memory_queue_wakes_waiting_consumer() {
        let queue = Arc::new(MemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue("w", Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = JobId::new();
        queue.enqueue(&id).await.unwrap();

        let delivery = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.job_id(), &id);
    }

    #[tokio::test]
    async fn test_memory_dead_letter() {
        let queue = MemoryQueue::new();
        let id = JobId::new();
        queue.enqueue(&id).await.unwrap();
        let delivery = queue.dequeue("w", Duration::from_millis(10)).await.unwrap().unwrap();

        queue.dead_letter(&delivery, "boom").await.unwrap();
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].1, "boom");
        assert_eq!(queue.in_flight().await, 0);
    }

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "mixtape:jobs");
        assert_eq!(config.consumer_group, "mixtape:workers");
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_redis_roundtrip() {
        let queue = RedisQueue::from_env().unwrap();
        queue.init().await.unwrap();
        let id = JobId::new();
        queue.enqueue(&id).await.unwrap();
        let delivery = queue.dequeue("test", Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(delivery.job_id(), &id);
        queue.ack(&delivery).await.unwrap();
    }
}
