//! AWS Bedrock transport. The only code that talks to the Bedrock runtime API.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::ResponseStream;
use aws_sdk_bedrockruntime::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::llm_client::invoker::{ModelTransport, TransportError};

const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Clone)]
pub struct BedrockTransport {
    client: Client,
}

impl BedrockTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelTransport for BedrockTransport {
    async fn send(&self, model_id: &str, body: &Value) -> Result<Value, TransportError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| TransportError::BadRequest(format!("unserializable body: {e}")))?;

        let output = self
            .client
            .invoke_model()
            .model_id(model_id)
            .content_type(CONTENT_TYPE_JSON)
            .accept(CONTENT_TYPE_JSON)
            .body(Blob::new(payload))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        serde_json::from_slice(output.body().as_ref())
            .map_err(|e| TransportError::Other(format!("response body is not JSON: {e}")))
    }

    async fn send_streaming(
        &self,
        model_id: &str,
        body: &Value,
        tx: mpsc::Sender<Value>,
    ) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| TransportError::BadRequest(format!("unserializable body: {e}")))?;

        let mut output = self
            .client
            .invoke_model_with_response_stream()
            .model_id(model_id)
            .content_type(CONTENT_TYPE_JSON)
            .accept(CONTENT_TYPE_JSON)
            .body(Blob::new(payload))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        loop {
            match output.body.recv().await {
                Ok(Some(ResponseStream::Chunk(part))) => {
                    let Some(bytes) = part.bytes() else { continue };
                    let chunk: Value = serde_json::from_slice(bytes.as_ref()).map_err(|e| {
                        TransportError::Other(format!("stream chunk is not JSON: {e}"))
                    })?;
                    if tx.send(chunk).await.is_err() {
                        debug!("Stream consumer dropped; stopping {model_id} stream early");
                        return Ok(());
                    }
                }
                Ok(Some(_)) => continue,
                Ok(None) => return Ok(()),
                Err(err) => return Err(classify_sdk_error(err)),
            }
        }
    }
}

fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> TransportError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) => TransportError::Timeout(message),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => {
            TransportError::Timeout(message)
        }
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            TransportError::Network(message)
        }
        SdkError::ConstructionFailure(_) => TransportError::BadRequest(message),
        SdkError::ServiceError(context) => classify_error_code(context.err().code(), message),
        _ => TransportError::Other(message),
    }
}

/// Maps a Bedrock service error code onto the retry taxonomy.
pub fn classify_error_code(code: Option<&str>, message: String) -> TransportError {
    match code {
        Some("ThrottlingException" | "ServiceQuotaExceededException") => {
            TransportError::Throttled(message)
        }
        Some("ModelTimeoutException") => TransportError::Timeout(message),
        Some(
            "ServiceUnavailableException" | "InternalServerException" | "ModelNotReadyException",
        ) => TransportError::ServiceUnavailable(message),
        Some("ValidationException") => TransportError::BadRequest(message),
        Some("AccessDeniedException") => TransportError::Unauthorized(message),
        Some("ResourceNotFoundException") => TransportError::ModelNotFound(message),
        _ => TransportError::Other(message),
    }
}
