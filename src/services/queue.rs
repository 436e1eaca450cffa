use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const QUEUE_KEY: &str = "pop_render:jobs";
const PROCESSING_KEY: &str = "pop_render:processing";

/// Job payload serialized into Redis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRender {
    pub job_id: Uuid,
}

/// A claimed queue entry. `payload` is the exact serialized entry so it can
/// be removed from the processing list on release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub payload: String,
}

impl JobHandle {
    pub fn new(job_id: Uuid) -> Result<Self, QueueError> {
        let payload = serde_json::to_string(&QueuedRender { job_id })?;
        Ok(Self { job_id, payload })
    }
}

/// Shared queue of render job ids.
#[async_trait]
pub trait RenderQueue: Send + Sync {
    /// Take the next pending job, if any, without blocking.
    async fn claim_next(&self) -> Result<Option<JobHandle>, QueueError>;

    /// Drop a claimed entry once its job has reached a terminal state.
    async fn release(&self, handle: &JobHandle) -> Result<(), QueueError>;

    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Entries claimed by some worker and not yet released.
    async fn in_flight(&self) -> Result<Vec<JobHandle>, QueueError>;

    async fn queue_depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed reliable queue: entries move from the pending list to a
/// processing list on claim and leave it on release.
pub struct RedisQueue {
    client: redis::Client,
}

impl RedisQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl RenderQueue for RedisQueue {
    async fn claim_next(&self) -> Result<Option<JobHandle>, QueueError> {
        let mut conn = self.connection().await?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let entry: QueuedRender = match serde_json::from_str(&payload) {
                    Ok(entry) => entry,
                    Err(e) => {
                        // Unparseable entries would otherwise sit in the processing list forever
                        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
                            .await
                            .map_err(QueueError::Redis)?;
                        return Err(QueueError::Serialize(e));
                    }
                };
                Ok(Some(JobHandle {
                    job_id: entry.job_id,
                    payload,
                }))
            }
            None => Ok(None),
        }
    }

    async fn release(&self, handle: &JobHandle) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &handle.payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let handle = JobHandle::new(job_id)?;
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &handle.payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn in_flight(&self) -> Result<Vec<JobHandle>, QueueError> {
        let mut conn = self.connection().await?;
        let payloads: Vec<String> = conn
            .lrange(PROCESSING_KEY, 0, -1)
            .await
            .map_err(QueueError::Redis)?;

        let mut handles = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match serde_json::from_str::<QueuedRender>(&payload) {
                Ok(entry) => handles.push(JobHandle {
                    job_id: entry.job_id,
                    payload,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, payload = %payload, "Dropping unparseable processing entry");
                    conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
                        .await
                        .map_err(QueueError::Redis)?;
                }
            }
        }
        Ok(handles)
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
