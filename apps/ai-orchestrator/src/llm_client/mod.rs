/// LLM Client: the single point of entry for all Bedrock model calls.
///
/// ARCHITECTURAL RULE: facades never talk to a `ModelTransport` directly.
/// Every call goes RequestBuilder → ModelInvoker → ResponseExtractor.
use thiserror::Error;

pub mod bedrock;
pub mod catalog;
pub mod extract;
pub mod invoker;
pub mod request;
pub mod retry;

pub use catalog::{ModelCatalog, TaskKind};
pub use extract::{InvocationResult, ResponseExtractor, TokenUsage};
pub use invoker::{ModelInvoker, TransportError};
pub use request::{ChatMessage, PromptTemplate, RequestBuilder, RequestOverrides, TaskPayload};
pub use retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("{0}")]
    Validation(String),

    #[error("Model {model_id} failed after {attempts} attempt(s): {source}")]
    Invocation {
        model_id: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("No text found in response: {0}")]
    Extraction(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),
}
