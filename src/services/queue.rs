use redis::AsyncCommands;
use std::future::Future;
use tokio::sync::mpsc;

use crate::models::stage::StageTask;

const QUEUE_KEY: &str = "coal_pile:stages";
const PROCESSING_KEY: &str = "coal_pile:processing";

/// Fire-and-forget hand-off of the next pipeline stage.
pub trait StageDispatcher: Send + Sync + 'static {
    fn schedule(&self, task: StageTask) -> impl Future<Output = Result<(), QueueError>> + Send;
}

/// Redis-backed stage queue.
///
/// Popped work items move to a processing list until acknowledged, so a worker
/// crash leaves them visible for inspection.
pub struct JobQueue {
    client: redis::Client,
}

/// A popped work item together with the exact payload needed to acknowledge it.
#[derive(Debug)]
pub struct Delivery {
    pub task: StageTask,
    payload: String,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue a stage work item.
    pub async fn enqueue(&self, task: &StageTask) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Pop the oldest work item, moving it to the processing list.
    pub async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => match serde_json::from_str(&payload) {
                Ok(task) => Ok(Some(Delivery { task, payload })),
                Err(e) => {
                    // Unparseable payloads would otherwise sit in the processing list forever.
                    conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
                        .await
                        .map_err(QueueError::Redis)?;
                    Err(QueueError::Serialize(e))
                }
            },
            None => Ok(None),
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (pending work items).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Acknowledge a delivery (remove from processing list).
    pub async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &delivery.payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

impl StageDispatcher for JobQueue {
    async fn schedule(&self, task: StageTask) -> Result<(), QueueError> {
        self.enqueue(&task).await
    }
}

/// In-process dispatcher over a tokio channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<StageTask>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StageTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StageDispatcher for ChannelDispatcher {
    async fn schedule(&self, task: StageTask) -> Result<(), QueueError> {
        self.tx.send(task).map_err(|_| QueueError::Closed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Stage queue closed")]
    Closed,
}
