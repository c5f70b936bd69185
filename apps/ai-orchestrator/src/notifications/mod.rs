//! Notification dispatch after a facade completes.
//!
//! Two channels with different guarantees:
//! - the live channel (Redis pub/sub) is best-effort; a failed publish is
//!   logged and dropped so it never fails the user's request;
//! - durable follow-up jobs (Redis list) must not be lost, so an enqueue
//!   failure propagates to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub mod redis_bus;

pub use redis_bus::{RedisChannelPublisher, RedisJobQueue};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish to {channel} failed: {reason}")]
    Channel { channel: String, reason: String },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to enqueue job {job}: {reason}")]
    Enqueue { job: String, reason: String },

    #[error("failed to serialize job: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CvAnalyzed,
    PortfolioGenerated,
    RecommendationsReady,
    ChatCompleted,
    ChatChunk,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::CvAnalyzed => "cv_analyzed",
            EventType::PortfolioGenerated => "portfolio_generated",
            EventType::RecommendationsReady => "recommendations_ready",
            EventType::ChatCompleted => "chat_completed",
            EventType::ChatChunk => "chat_chunk",
        }
    }

    /// Channel group the user's client subscribes to for this event.
    pub fn channel_group(self) -> &'static str {
        match self {
            EventType::CvAnalyzed => "cv_analysis",
            EventType::PortfolioGenerated => "portfolio",
            EventType::RecommendationsReady => "recommendations",
            EventType::ChatCompleted | EventType::ChatChunk => "chat",
        }
    }

    /// Durable jobs that must run after this event.
    pub fn follow_up_jobs(self) -> &'static [&'static str] {
        match self {
            EventType::CvAnalyzed => &["refresh_job_recommendations"],
            EventType::PortfolioGenerated => &["index_portfolio"],
            EventType::RecommendationsReady | EventType::ChatCompleted | EventType::ChatChunk => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub target_user_id: i64,
    pub event_type: EventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(target_user_id: i64, event_type: EventType, payload: Value) -> Self {
        Self {
            target_user_id,
            event_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn channel_name(&self) -> String {
        format!("{}_{}", self.event_type.channel_group(), self.target_user_id)
    }

    /// Wire shape pushed to the live channel.
    pub fn to_message(&self) -> Value {
        json!({
            "type": self.event_type.as_str(),
            "user_id": self.target_user_id,
            "payload": self.payload,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundJob {
    pub id: Uuid,
    pub name: String,
    pub user_id: i64,
    pub trigger: EventType,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl BackgroundJob {
    fn for_event(name: &str, event: &NotificationEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            user_id: event.target_user_id,
            trigger: event.event_type,
            payload: event.payload.clone(),
            enqueued_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    async fn publish(&self, channel: &str, message: &Value) -> Result<(), PublishError>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &BackgroundJob) -> Result<(), QueueError>;
}

pub struct NotificationDispatcher {
    publisher: Arc<dyn ChannelPublisher>,
    queue: Arc<dyn JobQueue>,
}

impl NotificationDispatcher {
    pub fn new(publisher: Arc<dyn ChannelPublisher>, queue: Arc<dyn JobQueue>) -> Self {
        Self { publisher, queue }
    }

    /// Publishes the event once, then enqueues every follow-up job for it.
    /// Returns the enqueued jobs.
    pub async fn notify(&self, event: &NotificationEvent) -> Result<Vec<BackgroundJob>, QueueError> {
        self.publish_live(event).await;

        let mut jobs = Vec::new();
        for name in event.event_type.follow_up_jobs() {
            let job = BackgroundJob::for_event(name, event);
            if let Err(e) = self.queue.enqueue(&job).await {
                error!(
                    job = %name,
                    user_id = event.target_user_id,
                    "Durable follow-up could not be enqueued: {e}"
                );
                return Err(e);
            }
            debug!(job = %name, job_id = %job.id, user_id = event.target_user_id, "Enqueued follow-up job");
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Live channel only. Used for streaming chat deltas.
    pub async fn publish_chunk(&self, user_id: i64, index: usize, delta: &str) {
        let event = NotificationEvent::new(
            user_id,
            EventType::ChatChunk,
            json!({ "index": index, "delta": delta }),
        );
        self.publish_live(&event).await;
    }

    async fn publish_live(&self, event: &NotificationEvent) {
        let channel = event.channel_name();
        match self.publisher.publish(&channel, &event.to_message()).await {
            Ok(()) => debug!(channel = %channel, event = event.event_type.as_str(), "Published"),
            Err(e) => warn!(channel = %channel, event = event.event_type.as_str(), "Live publish dropped: {e}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records every publish; optionally fails them all.
    #[derive(Default)]
    pub(crate) struct RecordingPublisher {
        pub fail: bool,
        pub messages: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingPublisher {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn published(&self) -> Vec<(String, Value)> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelPublisher for RecordingPublisher {
        async fn publish(&self, channel: &str, message: &Value) -> Result<(), PublishError> {
            self.messages
                .lock()
                .unwrap()
                .push((channel.to_string(), message.clone()));
            if self.fail {
                return Err(PublishError::Channel {
                    channel: channel.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingQueue {
        pub fail: bool,
        pub jobs: Mutex<Vec<BackgroundJob>>,
    }

    impl RecordingQueue {
        pub fn enqueued(&self) -> Vec<BackgroundJob> {
            self.jobs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobQueue for RecordingQueue {
        async fn enqueue(&self, job: &BackgroundJob) -> Result<(), QueueError> {
            if self.fail {
                return Err(QueueError::Enqueue {
                    job: job.name.clone(),
                    reason: "list unavailable".to_string(),
                });
            }
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    fn dispatcher(
        publisher: Arc<RecordingPublisher>,
        queue: Arc<RecordingQueue>,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(publisher, queue)
    }

    #[tokio::test]
    async fn test_cv_analyzed_publishes_once_and_enqueues_refresh() {
        let publisher = Arc::new(RecordingPublisher::default());
        let queue = Arc::new(RecordingQueue::default());
        let event = NotificationEvent::new(42, EventType::CvAnalyzed, json!({"confidence_score": 0.9}));

        let jobs = dispatcher(publisher.clone(), queue.clone())
            .notify(&event)
            .await
            .unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "cv_analysis_42");
        assert_eq!(published[0].1["type"], "cv_analyzed");
        assert_eq!(published[0].1["user_id"], 42);

        let enqueued = queue.enqueued();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].name, "refresh_job_recommendations");
        assert_eq!(enqueued[0].user_id, 42);
        assert_eq!(jobs, enqueued);
    }

    #[tokio::test]
    async fn test_publish_failure_still_enqueues() {
        let publisher = Arc::new(RecordingPublisher::failing());
        let queue = Arc::new(RecordingQueue::default());
        let event = NotificationEvent::new(42, EventType::CvAnalyzed, json!({}));

        let result = dispatcher(publisher.clone(), queue.clone()).notify(&event).await;

        assert!(result.is_ok());
        assert_eq!(publisher.published().len(), 1);
        assert_eq!(queue.enqueued().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_failure_propagates() {
        let publisher = Arc::new(RecordingPublisher::default());
        let queue = Arc::new(RecordingQueue {
            fail: true,
            ..RecordingQueue::default()
        });
        let event = NotificationEvent::new(7, EventType::PortfolioGenerated, json!({}));

        let err = dispatcher(publisher.clone(), queue).notify(&event).await.unwrap_err();
        assert!(matches!(err, QueueError::Enqueue { ref job, .. } if job == "index_portfolio"));
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_events_without_follow_ups_only_publish() {
        let publisher = Arc::new(RecordingPublisher::default());
        let queue = Arc::new(RecordingQueue::default());
        let d = dispatcher(publisher.clone(), queue.clone());

        d.notify(&NotificationEvent::new(5, EventType::ChatCompleted, json!({"reply": "hi"})))
            .await
            .unwrap();
        d.publish_chunk(5, 0, "Hel").await;

        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|(channel, _)| channel == "chat_5"));
        assert_eq!(published[1].1["type"], "chat_chunk");
        assert_eq!(published[1].1["payload"]["delta"], "Hel");
        assert!(queue.enqueued().is_empty());
    }

    #[test]
    fn test_message_timestamp_is_rfc3339() {
        let event = NotificationEvent::new(1, EventType::RecommendationsReady, json!({}));
        let message = event.to_message();
        let ts = message["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
        assert_eq!(event.channel_name(), "recommendations_1");
    }
}
