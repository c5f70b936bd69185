//! Model invocation. Sends a built request to the provider with a per-attempt
//! timeout and a bounded retry loop. Only transient failures are retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::llm_client::request::InvocationRequest;
use crate::llm_client::retry::RetryPolicy;
use crate::llm_client::LlmError;

/// Failure of a single attempt against the model provider.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_)
                | TransportError::Throttled(_)
                | TransportError::ServiceUnavailable(_)
                | TransportError::Network(_)
        )
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            TransportError::Throttled(_) => "throttled",
            TransportError::ServiceUnavailable(_) => "service_unavailable",
            TransportError::Network(_) => "network",
            TransportError::BadRequest(_) => "bad_request",
            TransportError::Unauthorized(_) => "unauthorized",
            TransportError::ModelNotFound(_) => "model_not_found",
            TransportError::Other(_) => "other",
        }
    }
}

/// The wire to the model provider. `BedrockTransport` in production;
/// tests substitute fakes.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn send(&self, model_id: &str, body: &Value) -> Result<Value, TransportError>;

    /// Forwards each decoded stream chunk to `tx` until the stream ends.
    async fn send_streaming(
        &self,
        model_id: &str,
        body: &Value,
        tx: mpsc::Sender<Value>,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub body: Value,
    pub model_id: String,
    pub attempts: u32,
    pub duration_ms: f64,
}

#[derive(Clone)]
pub struct ModelInvoker {
    transport: Arc<dyn ModelTransport>,
    policy: RetryPolicy,
}

impl ModelInvoker {
    pub fn new(transport: Arc<dyn ModelTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn invoke(&self, request: &InvocationRequest) -> Result<RawResponse, LlmError> {
        let body = request.to_body();
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let attempt_started = Instant::now();
            let outcome = match timeout(
                self.policy.attempt_timeout,
                self.transport.send(&request.model_id, &body),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout(format!(
                    "no response within {:?}",
                    self.policy.attempt_timeout
                ))),
            };
            let attempt_ms = elapsed_ms(attempt_started);

            match outcome {
                Ok(response) => {
                    record_attempt(request, attempt, attempt_ms, None);
                    return Ok(RawResponse {
                        body: response,
                        model_id: request.model_id.clone(),
                        attempts: attempt,
                        duration_ms: elapsed_ms(started),
                    });
                }
                Err(err) => {
                    record_attempt(request, attempt, attempt_ms, Some(&err));

                    if !err.is_retryable() || attempt >= self.policy.max_attempts {
                        return Err(LlmError::Invocation {
                            model_id: request.model_id.clone(),
                            attempts: attempt,
                            source: err,
                        });
                    }

                    let delay = self.policy.backoff_delay(attempt);
                    warn!(
                        "Model {} attempt {}/{} failed ({}), retrying after {}ms",
                        request.model_id,
                        attempt,
                        self.policy.max_attempts,
                        err.kind(),
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Single streamed attempt bounded by the attempt timeout. A stream that
    /// already delivered chunks cannot be replayed, so there is no retry here.
    pub async fn invoke_streaming(
        &self,
        request: &InvocationRequest,
        tx: mpsc::Sender<Value>,
    ) -> Result<Duration, LlmError> {
        let body = request.to_body();
        let started = Instant::now();

        let outcome = match timeout(
            self.policy.attempt_timeout,
            self.transport.send_streaming(&request.model_id, &body, tx),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Timeout(format!(
                "stream did not finish within {:?}",
                self.policy.attempt_timeout
            ))),
        };
        record_attempt(request, 1, elapsed_ms(started), outcome.as_ref().err());

        outcome
            .map(|_| started.elapsed())
            .map_err(|source| LlmError::Invocation {
                model_id: request.model_id.clone(),
                attempts: 1,
                source,
            })
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Per-attempt performance record.
fn record_attempt(
    request: &InvocationRequest,
    attempt: u32,
    duration_ms: f64,
    error: Option<&TransportError>,
) {
    info!(
        target: "performance",
        model = %request.model_id,
        task = request.task.as_str(),
        attempt,
        duration_ms,
        success = error.is_none(),
        error_kind = error.map(TransportError::kind).unwrap_or(""),
        "model invocation attempt"
    );
}
