//! The shared facade pipeline: cache lookup → build → invoke → extract →
//! cache store → observe. Facades only describe their call; the stages and
//! their ordering live here.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CacheError, CacheScope, ResultCache};
use crate::llm_client::extract::{stream_delta, stream_usage};
use crate::llm_client::{
    InvocationResult, LlmError, ModelCatalog, ModelInvoker, RequestBuilder, RequestOverrides,
    ResponseExtractor, TaskKind, TaskPayload, TokenUsage,
};
use crate::notifications::NotificationDispatcher;

const STREAM_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl PipelineError {
    /// Short label when the model call itself failed. `None` for bad input,
    /// misconfiguration, or an unreachable cache.
    pub fn model_failure(&self) -> Option<&'static str> {
        match self {
            PipelineError::Llm(LlmError::Invocation { .. }) => Some("model_unavailable"),
            PipelineError::Llm(LlmError::Extraction(_)) => Some("empty_response"),
            PipelineError::Llm(LlmError::JsonParse(_)) => Some("unparseable_response"),
            _ => None,
        }
    }

    /// The model answered but with no usable text.
    pub fn is_empty_output(&self) -> bool {
        matches!(self, PipelineError::Llm(LlmError::Extraction(_)))
    }
}

/// One facade call, described declaratively.
#[derive(Debug, Clone)]
pub struct PipelineCall {
    pub task: TaskKind,
    pub scope: CacheScope,
    /// Canonical input used for the cache key.
    pub cache_input: Value,
    pub payload: TaskPayload,
    pub overrides: RequestOverrides,
    pub expects_json: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub result: InvocationResult,
    pub cache_hit: bool,
    /// Set when a JSON task produced text that could not be parsed.
    /// Such results are returned but never cached.
    pub json_error: Option<String>,
}

pub struct AiPipeline {
    catalog: Arc<ModelCatalog>,
    builder: RequestBuilder,
    invoker: ModelInvoker,
    extractor: ResponseExtractor,
    cache: Arc<ResultCache>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl AiPipeline {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        invoker: ModelInvoker,
        cache: Arc<ResultCache>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            builder: RequestBuilder::new(catalog.clone()),
            extractor: ResponseExtractor::new(catalog.clone()),
            catalog,
            invoker,
            cache,
            dispatcher,
        }
    }

    pub async fn run(&self, call: &PipelineCall) -> Result<PipelineOutcome, PipelineError> {
        let started = Instant::now();
        let model_id = self.catalog.get_model_for_task(call.task.as_str())?.to_string();
        let key = cache_key(call.scope, &call.cache_input);

        if let Some(result) = self.cache.get::<InvocationResult>(&key).await? {
            observe(call, &model_id, true, &result.token_usage, started);
            return Ok(PipelineOutcome {
                result,
                cache_hit: true,
                json_error: None,
            });
        }

        let request = self
            .builder
            .build(call.task, &model_id, &call.payload, &call.overrides)?;
        let raw = self.invoker.invoke(&request).await?;
        debug!(model = %raw.model_id, attempts = raw.attempts, "Model responded");
        let text = self.extractor.extract_text(&raw.body, &model_id)?;
        let token_usage = self.extractor.token_usage(&raw.body, &model_id)?;

        let result = InvocationResult {
            raw_response: raw.body,
            extracted_text: text,
            extracted_json: None,
            token_usage,
            duration_ms: raw.duration_ms,
        };
        let outcome = self.finish(call, &key, result).await?;
        observe(call, &model_id, false, &outcome.result.token_usage, started);
        Ok(outcome)
    }

    /// Same stages, but the model response is streamed and every text delta
    /// is published to the user's live channel as it arrives. A cache hit is
    /// published as a single chunk.
    pub async fn run_streaming(
        &self,
        call: &PipelineCall,
        user_id: i64,
    ) -> Result<PipelineOutcome, PipelineError> {
        let started = Instant::now();
        let model_id = self.catalog.get_model_for_task(call.task.as_str())?.to_string();
        let key = cache_key(call.scope, &call.cache_input);

        if let Some(result) = self.cache.get::<InvocationResult>(&key).await? {
            self.dispatcher
                .publish_chunk(user_id, 0, &result.extracted_text)
                .await;
            observe(call, &model_id, true, &result.token_usage, started);
            return Ok(PipelineOutcome {
                result,
                cache_hit: true,
                json_error: None,
            });
        }

        let request = self
            .builder
            .build(call.task, &model_id, &call.payload, &call.overrides)?;
        let family = request.family;
        let (tx, mut rx) = mpsc::channel::<Value>(STREAM_BUFFER);

        let relay = async {
            let mut chunks = Vec::new();
            let mut text = String::new();
            let mut usage = TokenUsage::default();
            let mut index = 0;
            while let Some(chunk) = rx.recv().await {
                if let Some(delta) = stream_delta(&chunk, family) {
                    self.dispatcher.publish_chunk(user_id, index, &delta).await;
                    text.push_str(&delta);
                    index += 1;
                }
                if let Some(reported) = stream_usage(&chunk) {
                    usage = reported;
                }
                chunks.push(chunk);
            }
            (chunks, text, usage)
        };

        let (streamed, (chunks, text, token_usage)) =
            tokio::join!(self.invoker.invoke_streaming(&request, tx), relay);
        let elapsed = streamed?;

        if text.trim().is_empty() {
            return Err(LlmError::Extraction(format!("{model_id} streamed no text")).into());
        }

        let result = InvocationResult {
            raw_response: Value::Array(chunks),
            extracted_text: text,
            extracted_json: None,
            token_usage,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
        };
        let outcome = self.finish(call, &key, result).await?;
        observe(call, &model_id, false, &outcome.result.token_usage, started);
        Ok(outcome)
    }

    /// Parses JSON when the task expects it, then caches the result unless
    /// parsing failed.
    async fn finish(
        &self,
        call: &PipelineCall,
        key: &str,
        mut result: InvocationResult,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut json_error = None;
        if call.expects_json {
            match self.extractor.extract_json(&result.extracted_text) {
                Ok(value) => result.extracted_json = Some(value),
                Err(e) => {
                    warn!(task = call.task.as_str(), "Model output is not valid JSON: {e}");
                    json_error = Some(e.to_string());
                }
            }
        }

        if json_error.is_none() {
            self.cache
                .set(key, &result, self.cache.ttl_for(call.scope))
                .await?;
        }

        Ok(PipelineOutcome {
            result,
            cache_hit: false,
            json_error,
        })
    }
}

fn observe(call: &PipelineCall, model_id: &str, cache_hit: bool, usage: &TokenUsage, started: Instant) {
    info!(
        task = call.task.as_str(),
        scope = call.scope.as_str(),
        model = %model_id,
        cache_hit,
        duration_ms = started.elapsed().as_secs_f64() * 1000.0,
        input_tokens = usage.input,
        output_tokens = usage.output,
        "AI pipeline call completed"
    );
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::{CacheTtls, MemoryCacheStore};
    use crate::llm_client::catalog::builtin_descriptors;
    use crate::llm_client::invoker::tests::ScriptedTransport;
    use crate::llm_client::{RetryPolicy, TransportError};
    use crate::notifications::tests::{RecordingPublisher, RecordingQueue};
    use crate::services::prompts::CONVERSATION;

    pub(crate) const SONNET: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
    pub(crate) const HAIKU: &str = "anthropic.claude-3-haiku-20240307-v1:0";

    /// Everything a facade test needs, wired over in-memory fakes.
    pub(crate) struct Harness {
        pub transport: Arc<ScriptedTransport>,
        pub publisher: Arc<RecordingPublisher>,
        pub queue: Arc<RecordingQueue>,
        pub dispatcher: Arc<NotificationDispatcher>,
        pub pipeline: Arc<AiPipeline>,
    }

    impl Harness {
        pub(crate) fn new(script: Vec<Result<Value, TransportError>>) -> Self {
            Self::with_publisher(script, RecordingPublisher::default())
        }

        pub(crate) fn with_publisher(
            script: Vec<Result<Value, TransportError>>,
            publisher: RecordingPublisher,
        ) -> Self {
            let catalog = Arc::new(
                ModelCatalog::new(
                    builtin_descriptors(),
                    [
                        (TaskKind::TextAnalysis, SONNET.to_string()),
                        (TaskKind::ContentGeneration, SONNET.to_string()),
                        (TaskKind::Conversation, HAIKU.to_string()),
                    ],
                )
                .unwrap(),
            );
            let transport = Arc::new(ScriptedTransport::new(script));
            let policy = RetryPolicy::default()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_millis(10))
                .with_jitter(false);
            let invoker = ModelInvoker::new(transport.clone(), policy);
            let cache = Arc::new(ResultCache::new(
                Arc::new(MemoryCacheStore::new()),
                CacheTtls::default(),
            ));
            let publisher = Arc::new(publisher);
            let queue = Arc::new(RecordingQueue::default());
            let dispatcher = Arc::new(NotificationDispatcher::new(publisher.clone(), queue.clone()));
            let pipeline = Arc::new(AiPipeline::new(catalog, invoker, cache, dispatcher.clone()));
            Self {
                transport,
                publisher,
                queue,
                dispatcher,
                pipeline,
            }
        }
    }

    /// Claude response envelope around `text`.
    pub(crate) fn claude_body(text: &str) -> Value {
        json!({
            "id": "msg_test",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
            "usage": {"input_tokens": 20, "output_tokens": 10}
        })
    }

    fn chat_call(message: &str, expects_json: bool) -> PipelineCall {
        PipelineCall {
            task: TaskKind::Conversation,
            scope: CacheScope::Conversation,
            cache_input: json!({"message": message}),
            payload: TaskPayload::new(&CONVERSATION)
                .slot("context", "")
                .slot("message", message),
            overrides: RequestOverrides::default(),
            expects_json,
        }
    }

    #[tokio::test]
    async fn test_second_identical_call_is_served_from_cache() {
        let harness = Harness::new(vec![Ok(claude_body("Polish your README."))]);
        let call = chat_call("How do I stand out?", false);

        let first = harness.pipeline.run(&call).await.unwrap();
        let second = harness.pipeline.run(&call).await.unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(second.result.extracted_text, "Polish your README.");
        assert_eq!(second.result.token_usage, TokenUsage { input: 20, output: 10 });
        assert_eq!(harness.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_json_is_returned_but_not_cached() {
        let harness = Harness::new(vec![Ok(claude_body("Sorry, I cannot help with that."))]);
        let call = chat_call("Give me JSON", true);

        let outcome = harness.pipeline.run(&call).await.unwrap();
        assert!(outcome.json_error.is_some());
        assert!(outcome.result.extracted_json.is_none());

        harness.pipeline.run(&call).await.unwrap();
        assert_eq!(harness.transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_invocation_is_not_cached() {
        let harness = Harness::new(vec![
            Err(TransportError::Throttled("rate exceeded".to_string())),
            Err(TransportError::Throttled("rate exceeded".to_string())),
            Ok(claude_body("Recovered")),
        ]);
        let call = chat_call("hello", false);

        let err = harness.pipeline.run(&call).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Llm(LlmError::Invocation { attempts: 2, .. })
        ));

        let outcome = harness.pipeline.run(&call).await.unwrap();
        assert!(!outcome.cache_hit);
        assert_eq!(outcome.result.extracted_text, "Recovered");
        assert_eq!(harness.transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_required_slot_never_reaches_the_model() {
        let harness = Harness::new(vec![Ok(claude_body("unused"))]);
        let call = chat_call("   ", false);

        let err = harness.pipeline.run(&call).await.unwrap_err();
        assert!(matches!(err, PipelineError::Llm(LlmError::Validation(_))));
        assert_eq!(harness.transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_streaming_publishes_each_delta_then_caches() {
        let stream = json!([
            {"type": "message_start", "message": {}},
            {"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Learn "}},
            {"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Rust."}},
            {"type": "message_stop", "amazon-bedrock-invocationMetrics": {"inputTokenCount": 9, "outputTokenCount": 2}}
        ]);
        let harness = Harness::new(vec![Ok(stream)]);
        let call = chat_call("What next?", false);

        let outcome = harness.pipeline.run_streaming(&call, 8).await.unwrap();
        assert_eq!(outcome.result.extracted_text, "Learn Rust.");
        assert_eq!(outcome.result.token_usage, TokenUsage { input: 9, output: 2 });

        let published = harness.publisher.published();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|(channel, m)| channel == "chat_8" && m["type"] == "chat_chunk"));
        assert_eq!(published[1].1["payload"]["delta"], "Rust.");

        let again = harness.pipeline.run_streaming(&call, 8).await.unwrap();
        assert!(again.cache_hit);
        assert_eq!(harness.transport.calls(), 1);
        let published = harness.publisher.published();
        assert_eq!(published.len(), 3);
        assert_eq!(published[2].1["payload"]["delta"], "Learn Rust.");
    }

    #[tokio::test]
    async fn test_streaming_without_text_is_an_extraction_error() {
        let harness = Harness::new(vec![Ok(json!([{"type": "message_stop"}]))]);
        let err = harness
            .pipeline
            .run_streaming(&chat_call("hi", false), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Llm(LlmError::Extraction(_))));
        assert!(err.is_empty_output());
    }
}
