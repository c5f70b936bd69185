//! Response extraction. Unwraps each family's response envelope into plain
//! text, and parses model text into JSON leniently.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm_client::catalog::{ModelCatalog, ModelFamily};
use crate::llm_client::LlmError;

/// Bedrock appends this object to the last chunk of every response stream.
const STREAM_METRICS_KEY: &str = "amazon-bedrock-invocationMetrics";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
}

/// Outcome of one successful invocation. Cached by the ResultCache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub raw_response: Value,
    pub extracted_text: String,
    pub extracted_json: Option<Value>,
    pub token_usage: TokenUsage,
    pub duration_ms: f64,
}

#[derive(Clone)]
pub struct ResponseExtractor {
    catalog: Arc<ModelCatalog>,
}

impl ResponseExtractor {
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self { catalog }
    }

    pub fn extract_text(&self, raw: &Value, model_id: &str) -> Result<String, LlmError> {
        let family = self.catalog.family_of(model_id)?;
        text_for_family(raw, family)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                LlmError::Extraction(format!("{model_id} ({}) returned no text", family.as_str()))
            })
    }

    pub fn token_usage(&self, raw: &Value, model_id: &str) -> Result<TokenUsage, LlmError> {
        let family = self.catalog.family_of(model_id)?;
        Ok(usage_for_family(raw, family))
    }

    pub fn extract_json(&self, text: &str) -> Result<Value, LlmError> {
        extract_json(text)
    }
}

pub fn text_for_family(raw: &Value, family: ModelFamily) -> Option<String> {
    match family {
        ModelFamily::Claude => {
            let blocks = raw.get("content")?.as_array()?;
            let text: String = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            Some(text)
        }
        ModelFamily::Titan => raw
            .pointer("/results/0/outputText")
            .and_then(Value::as_str)
            .map(String::from),
        ModelFamily::Llama => raw.get("generation").and_then(Value::as_str).map(String::from),
        ModelFamily::Qwen => raw
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(String::from),
    }
}

fn usage_for_family(raw: &Value, family: ModelFamily) -> TokenUsage {
    let (input, output) = match family {
        ModelFamily::Claude => ("/usage/input_tokens", "/usage/output_tokens"),
        ModelFamily::Titan => ("/inputTextTokenCount", "/results/0/tokenCount"),
        ModelFamily::Llama => ("/prompt_token_count", "/generation_token_count"),
        ModelFamily::Qwen => ("/usage/prompt_tokens", "/usage/completion_tokens"),
    };
    TokenUsage {
        input: count_at(raw, input),
        output: count_at(raw, output),
    }
}

fn count_at(raw: &Value, pointer: &str) -> u32 {
    raw.pointer(pointer)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// Text fragment carried by one response-stream chunk, if any.
pub fn stream_delta(chunk: &Value, family: ModelFamily) -> Option<String> {
    let delta = match family {
        ModelFamily::Claude => {
            if chunk.get("type").and_then(Value::as_str) != Some("content_block_delta") {
                return None;
            }
            chunk.pointer("/delta/text")
        }
        ModelFamily::Titan => chunk.get("outputText"),
        ModelFamily::Llama => chunk.get("generation"),
        ModelFamily::Qwen => chunk.pointer("/choices/0/delta/content"),
    };
    delta
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Token usage reported in the final stream chunk.
pub fn stream_usage(chunk: &Value) -> Option<TokenUsage> {
    let metrics = chunk.get(STREAM_METRICS_KEY)?;
    Some(TokenUsage {
        input: count_at(metrics, "/inputTokenCount"),
        output: count_at(metrics, "/outputTokenCount"),
    })
}

/// Lenient JSON parsing of model output. Only a JSON object counts; a bare
/// string, number, or array is treated as unparseable.
/// 1. strip a Markdown code fence if one is present, then parse;
/// 2. otherwise parse the outermost balanced `{...}` span;
/// 3. if the fenced body yields nothing, retry both steps on the whole text.
pub fn extract_json(text: &str) -> Result<Value, LlmError> {
    let candidates = strip_code_fence(text).into_iter().chain(std::iter::once(text));

    for candidate in candidates {
        let candidate = candidate.trim();
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
            return Ok(value);
        }
        if let Some(span) = outermost_object(candidate) {
            if let Ok(value) = serde_json::from_str::<Value>(span) {
                return Ok(value);
            }
        }
    }

    let preview: String = text.chars().take(80).collect();
    Err(LlmError::JsonParse(format!(
        "no parseable JSON object in model output: {preview:?}"
    )))
}

/// Body of the first fenced block (```json ... ``` or ``` ... ```).
fn strip_code_fence(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_ticks = &text[open + 3..];
    // The rest of the opening line is a language tag, if any.
    let body_start = after_ticks.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_ticks[body_start..];
    let close = body.find("```").unwrap_or(body.len());
    Some(body[..close].trim())
}

/// First `{` through its matching `}`, skipping braces inside strings.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
