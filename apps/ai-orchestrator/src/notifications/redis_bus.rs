use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde_json::Value;

use crate::notifications::{BackgroundJob, ChannelPublisher, JobQueue, PublishError, QueueError};

/// Publishes live events with Redis `PUBLISH`.
#[derive(Clone)]
pub struct RedisChannelPublisher {
    conn: MultiplexedConnection,
}

impl RedisChannelPublisher {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ChannelPublisher for RedisChannelPublisher {
    async fn publish(&self, channel: &str, message: &Value) -> Result<(), PublishError> {
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message.to_string())
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| PublishError::Channel {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// Pushes durable jobs onto a Redis list; workers pop from the other end.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    key: String,
}

impl RedisJobQueue {
    pub fn new(conn: MultiplexedConnection, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &BackgroundJob) -> Result<(), QueueError> {
        let body = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(&self.key)
            .arg(body)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| QueueError::Enqueue {
                job: job.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
