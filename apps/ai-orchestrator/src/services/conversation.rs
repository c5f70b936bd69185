use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::cache::CacheScope;
use crate::errors::{AppError, GENERIC_RETRY_MESSAGE};
use crate::llm_client::{ChatMessage, RequestOverrides, TaskKind, TaskPayload};
use crate::notifications::{EventType, NotificationDispatcher, NotificationEvent};
use crate::services::pipeline::{AiPipeline, PipelineCall, PipelineError, PipelineOutcome};
use crate::services::prompts::CONVERSATION;
use crate::services::{degraded_note, to_json};

/// Older turns are dropped so long chats stay inside the context window.
const MAX_HISTORY_TURNS: usize = 20;
const CHAT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationInput {
    pub user_id: i64,
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub confidence_score: f64,
    pub notes: Option<String>,
    pub cached: bool,
}

impl ChatReply {
    fn degraded(reason: &str) -> Self {
        ChatReply {
            reply: GENERIC_RETRY_MESSAGE.to_string(),
            confidence_score: 0.0,
            notes: Some(degraded_note(reason)),
            cached: false,
        }
    }
}

/// Career chat. Plain-text task; failures degrade to a retry-later reply.
pub struct ConversationService {
    pipeline: Arc<AiPipeline>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl ConversationService {
    pub fn new(pipeline: Arc<AiPipeline>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            pipeline,
            dispatcher,
        }
    }

    pub async fn process(&self, input: &ConversationInput) -> Result<ChatReply, AppError> {
        let call = build_call(input)?;
        let outcome = self.pipeline.run(&call).await;
        self.complete(input, outcome).await
    }

    /// Publishes each reply delta to the user's chat channel as it is
    /// generated, then sends the usual completion event.
    pub async fn process_streaming(&self, input: &ConversationInput) -> Result<ChatReply, AppError> {
        let call = build_call(input)?;
        let outcome = self.pipeline.run_streaming(&call, input.user_id).await;
        self.complete(input, outcome).await
    }

    async fn complete(
        &self,
        input: &ConversationInput,
        outcome: Result<PipelineOutcome, PipelineError>,
    ) -> Result<ChatReply, AppError> {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => match e.model_failure() {
                Some(reason) => {
                    warn!(user_id = input.user_id, "Chat reply degraded: {e}");
                    return Ok(ChatReply::degraded(reason));
                }
                None => return Err(e.into()),
            },
        };

        let reply = ChatReply {
            reply: outcome.result.extracted_text.trim().to_string(),
            confidence_score: 1.0,
            notes: None,
            cached: outcome.cache_hit,
        };

        let event = NotificationEvent::new(
            input.user_id,
            EventType::ChatCompleted,
            json!({ "reply": reply.reply, "cached": reply.cached }),
        );
        self.dispatcher.notify(&event).await?;

        Ok(reply)
    }
}

fn build_call(input: &ConversationInput) -> Result<PipelineCall, AppError> {
    let skip = input.history.len().saturating_sub(MAX_HISTORY_TURNS);
    let history: Vec<ChatMessage> = input.history[skip..].to_vec();
    let context = input
        .context
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| format!("Context about me:\n{c}\n\n"))
        .unwrap_or_default();
    let message = input.message.trim();

    Ok(PipelineCall {
        task: TaskKind::Conversation,
        scope: CacheScope::Conversation,
        cache_input: json!({
            "message": message,
            "context": context,
            "history": to_json(&history)?,
        }),
        payload: TaskPayload::new(&CONVERSATION)
            .slot("context", context)
            .slot("message", message)
            .with_history(history),
        overrides: RequestOverrides {
            max_tokens: Some(CHAT_MAX_TOKENS),
            ..RequestOverrides::default()
        },
        expects_json: false,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::llm_client::request::Role;
    use crate::llm_client::TransportError;
    use crate::notifications::tests::RecordingPublisher;
    use crate::services::pipeline::tests::{claude_body, Harness};

    fn input(message: &str) -> ConversationInput {
        ConversationInput {
            user_id: 11,
            message: message.to_string(),
            history: vec![],
            context: None,
        }
    }

    fn service(harness: &Harness) -> ConversationService {
        ConversationService::new(harness.pipeline.clone(), harness.dispatcher.clone())
    }

    #[tokio::test]
    async fn test_reply_and_completion_event() {
        let harness = Harness::new(vec![Ok(claude_body("  Update your headline first. "))]);
        let reply = service(&harness).process(&input("Where do I start?")).await.unwrap();

        assert_eq!(reply.reply, "Update your headline first.");
        assert_eq!(reply.confidence_score, 1.0);

        let published = harness.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "chat_11");
        assert_eq!(published[0].1["type"], "chat_completed");
        assert!(harness.queue.enqueued().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_degrades_to_retry_message() {
        let harness = Harness::new(vec![Err(TransportError::Timeout("slow".to_string()))]);
        let reply = service(&harness).process(&input("Hello?")).await.unwrap();

        assert_eq!(reply.reply, GENERIC_RETRY_MESSAGE);
        assert_eq!(reply.confidence_score, 0.0);
        assert_eq!(harness.transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_publish_outage_does_not_fail_chat() {
        let harness = Harness::with_publisher(
            vec![Ok(claude_body("Still here."))],
            RecordingPublisher::failing(),
        );
        let reply = service(&harness).process(&input("ping")).await.unwrap();
        assert_eq!(reply.reply, "Still here.");
    }

    #[tokio::test]
    async fn test_history_is_part_of_cache_key() {
        let harness = Harness::new(vec![Ok(claude_body("Sure."))]);
        let service = service(&harness);

        service.process(&input("And then?")).await.unwrap();
        let mut follow_up = input("And then?");
        follow_up.history = vec![
            ChatMessage::user("I know Rust."),
            ChatMessage::assistant("Great, try systems roles."),
        ];
        let second = service.process(&follow_up).await.unwrap();

        assert!(!second.cached);
        assert_eq!(harness.transport.calls(), 2);
    }

    #[test]
    fn test_history_is_trimmed_to_recent_turns() {
        let mut long = input("latest");
        long.history = (0..30)
            .map(|i| ChatMessage::user(format!("turn {i}")))
            .collect();
        let call = build_call(&long).unwrap();

        assert_eq!(call.payload.history.len(), MAX_HISTORY_TURNS);
        assert_eq!(call.payload.history[0].content, "turn 10");
        assert_eq!(call.payload.history[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_streaming_publishes_chunks_then_completion() {
        let stream = json!([
            {"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Try "}},
            {"type": "content_block_delta", "delta": {"type": "text_delta", "text": "mentoring."}}
        ]);
        let harness = Harness::new(vec![Ok(stream)]);
        let reply = service(&harness)
            .process_streaming(&input("Any ideas?"))
            .await
            .unwrap();

        assert_eq!(reply.reply, "Try mentoring.");
        let types: Vec<Value> = harness
            .publisher
            .published()
            .into_iter()
            .map(|(_, message)| message["type"].clone())
            .collect();
        assert_eq!(types, vec![json!("chat_chunk"), json!("chat_chunk"), json!("chat_completed")]);
    }
}
