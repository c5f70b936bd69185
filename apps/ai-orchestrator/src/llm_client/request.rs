//! Request building. Turns a prompt template plus task input into a
//! provider-ready `InvocationRequest`, clamped to the model's limits.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::llm_client::catalog::{ModelCatalog, ModelFamily, TaskKind};
use crate::llm_client::LlmError;

const ANTHROPIC_BEDROCK_VERSION: &str = "bedrock-2023-05-31";
const TITAN_TOP_P: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn transcript_label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A fixed prompt with `{slot}` placeholders, owned by one facade.
#[derive(Debug)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub system: &'static str,
    pub user: &'static str,
    pub required_slots: &'static [&'static str],
}

impl PromptTemplate {
    /// Replaces every `{slot}` that has a value. Braces that do not name a
    /// slot (JSON examples in the prompt) are left untouched.
    pub fn render(&self, slots: &BTreeMap<String, String>) -> String {
        let template = self.user;
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if slots.contains_key(&after[..close]) => {
                    out.push_str(&slots[&after[..close]]);
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Task input handed to the builder: the facade's template, its slot values,
/// and any prior conversation turns.
#[derive(Debug, Clone)]
pub struct TaskPayload {
    pub template: &'static PromptTemplate,
    pub slots: BTreeMap<String, String>,
    pub history: Vec<ChatMessage>,
}

impl TaskPayload {
    pub fn new(template: &'static PromptTemplate) -> Self {
        Self {
            template,
            slots: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn slot(mut self, name: &str, value: impl Into<String>) -> Self {
        self.slots.insert(name.to_string(), value.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestOverrides {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptEncoding {
    Chat {
        system: Option<String>,
        messages: Vec<ChatMessage>,
    },
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub task: TaskKind,
    pub model_id: String,
    pub family: ModelFamily,
    pub prompt: PromptEncoding,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl InvocationRequest {
    /// f32 → JSON without float noise (0.7 rather than 0.699999988).
    fn wire_temperature(&self) -> f64 {
        (f64::from(self.temperature) * 100.0).round() / 100.0
    }

    /// Provider wire body. Must stay in sync with each family's Bedrock contract.
    pub fn to_body(&self) -> Value {
        match (&self.prompt, self.family) {
            (PromptEncoding::Chat { system, messages }, ModelFamily::Qwen) => {
                let mut wire: Vec<Value> = Vec::with_capacity(messages.len() + 1);
                if let Some(system) = system {
                    wire.push(json!({"role": "system", "content": system}));
                }
                wire.extend(
                    messages
                        .iter()
                        .map(|m| json!({"role": m.role.as_str(), "content": m.content})),
                );
                json!({
                    "messages": wire,
                    "max_tokens": self.max_tokens,
                    "temperature": self.wire_temperature(),
                })
            }
            (PromptEncoding::Chat { system, messages }, _) => {
                let mut body = json!({
                    "anthropic_version": ANTHROPIC_BEDROCK_VERSION,
                    "max_tokens": self.max_tokens,
                    "temperature": self.wire_temperature(),
                    "messages": messages
                        .iter()
                        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
                        .collect::<Vec<_>>(),
                });
                if let Some(system) = system {
                    body["system"] = Value::String(system.clone());
                }
                body
            }
            (PromptEncoding::Text(prompt), ModelFamily::Llama) => json!({
                "prompt": prompt,
                "max_gen_len": self.max_tokens,
                "temperature": self.wire_temperature(),
            }),
            (PromptEncoding::Text(prompt), _) => json!({
                "inputText": prompt,
                "textGenerationConfig": {
                    "maxTokenCount": self.max_tokens,
                    "temperature": self.wire_temperature(),
                    "topP": TITAN_TOP_P,
                },
            }),
        }
    }
}

#[derive(Clone)]
pub struct RequestBuilder {
    catalog: Arc<ModelCatalog>,
}

impl RequestBuilder {
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self { catalog }
    }

    pub fn build(
        &self,
        task: TaskKind,
        model_id: &str,
        payload: &TaskPayload,
        overrides: &RequestOverrides,
    ) -> Result<InvocationRequest, LlmError> {
        let descriptor = self.catalog.get_descriptor(model_id)?;
        let template = payload.template;

        for slot in template.required_slots {
            let present = payload
                .slots
                .get(*slot)
                .is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(LlmError::Validation(format!(
                    "'{slot}' is required for {} ({})",
                    template.name,
                    task.as_str()
                )));
            }
        }

        let requested_tokens = overrides.max_tokens.unwrap_or(descriptor.max_tokens);
        let max_tokens = descriptor.clamp_max_tokens(requested_tokens);
        if max_tokens != requested_tokens {
            warn!(
                model = %model_id,
                requested = requested_tokens,
                effective = max_tokens,
                "max_tokens outside model limit, clamped"
            );
        }

        let requested_temperature = overrides
            .temperature
            .filter(|t| t.is_finite())
            .unwrap_or(descriptor.default_temperature);
        let temperature = descriptor.clamp_temperature(requested_temperature);
        if temperature != requested_temperature {
            warn!(
                model = %model_id,
                requested = requested_temperature,
                effective = temperature,
                "temperature outside supported range, clamped"
            );
        }

        let user_message = template.render(&payload.slots);
        let system = Some(template.system.to_string()).filter(|s| !s.trim().is_empty());

        let prompt = if descriptor.family.uses_chat_messages() {
            let mut messages = payload.history.clone();
            messages.push(ChatMessage::user(user_message));
            PromptEncoding::Chat { system, messages }
        } else {
            PromptEncoding::Text(render_transcript(
                system.as_deref(),
                &payload.history,
                &user_message,
            ))
        };

        Ok(InvocationRequest {
            task,
            model_id: model_id.to_string(),
            family: descriptor.family,
            prompt,
            max_tokens,
            temperature,
        })
    }
}

/// Flattens system prompt and turns into one prompt string for single-prompt families.
fn render_transcript(system: Option<&str>, history: &[ChatMessage], user_message: &str) -> String {
    let mut transcript = String::new();
    if let Some(system) = system {
        transcript.push_str(system);
        transcript.push_str("\n\n");
    }
    for message in history {
        transcript.push_str(message.role.transcript_label());
        transcript.push_str(": ");
        transcript.push_str(&message.content);
        transcript.push('\n');
    }
    transcript.push_str("User: ");
    transcript.push_str(user_message);
    transcript.push_str("\nAssistant:");
    transcript
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::catalog::builtin_descriptors;

    const SONNET: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
    const TITAN: &str = "amazon.titan-text-express-v1";
    const LLAMA: &str = "meta.llama3-70b-instruct-v1:0";
    const QWEN: &str = "qwen.qwen3-32b-v1:0";

    static ANALYSIS: PromptTemplate = PromptTemplate {
        name: "test_analysis",
        system: "Respond in JSON.",
        user: "Analyze this CV: {cv_text}\nReturn {\"skills\": []} for {focus}.",
        required_slots: &["cv_text"],
    };

    fn builder() -> RequestBuilder {
        let catalog = ModelCatalog::new(
            builtin_descriptors(),
            [(TaskKind::TextAnalysis, SONNET.to_string())],
        )
        .unwrap();
        RequestBuilder::new(Arc::new(catalog))
    }

    fn payload() -> TaskPayload {
        TaskPayload::new(&ANALYSIS)
            .slot("cv_text", "Jane Doe, Rust engineer")
            .slot("focus", "backend roles")
    }

    #[test]
    fn test_render_fills_slots_and_keeps_json_braces() {
        let rendered = ANALYSIS.render(&payload().slots);
        assert_eq!(
            rendered,
            "Analyze this CV: Jane Doe, Rust engineer\nReturn {\"skills\": []} for backend roles."
        );
    }

    #[test]
    fn test_missing_required_slot_is_validation_error() {
        let payload = TaskPayload::new(&ANALYSIS).slot("cv_text", "   ");
        let err = builder()
            .build(TaskKind::TextAnalysis, SONNET, &payload, &RequestOverrides::default())
            .unwrap_err();
        assert!(matches!(err, LlmError::Validation(msg) if msg.contains("cv_text")));
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let err = builder()
            .build(TaskKind::TextAnalysis, "nope", &payload(), &RequestOverrides::default())
            .unwrap_err();
        assert!(matches!(err, LlmError::UnknownModel(_)));
    }

    #[test]
    fn test_out_of_range_temperature_is_clamped_to_max() {
        let overrides = RequestOverrides {
            temperature: Some(1.5),
            max_tokens: None,
        };
        let request = builder()
            .build(TaskKind::TextAnalysis, SONNET, &payload(), &overrides)
            .unwrap();
        assert_eq!(request.temperature, 1.0);
    }

    #[test]
    fn test_temperature_always_within_supported_range() {
        let builder = builder();
        for model in [SONNET, TITAN, LLAMA, QWEN] {
            for requested in [-3.0_f32, -0.1, 0.0, 0.3, 0.99, 1.0, 1.5, 2.5, 40.0, f32::NAN] {
                let overrides = RequestOverrides {
                    temperature: Some(requested),
                    max_tokens: None,
                };
                let request = builder
                    .build(TaskKind::TextAnalysis, model, &payload(), &overrides)
                    .unwrap();
                let (min, max) = builder
                    .catalog
                    .get_descriptor(model)
                    .unwrap()
                    .supported_temperature_range;
                assert!(
                    request.temperature >= min && request.temperature <= max,
                    "{model}: requested {requested} produced {}",
                    request.temperature
                );
            }
        }
    }

    #[test]
    fn test_max_tokens_clamped_to_ceiling() {
        let overrides = RequestOverrides {
            max_tokens: Some(50_000),
            temperature: None,
        };
        let request = builder()
            .build(TaskKind::TextAnalysis, LLAMA, &payload(), &overrides)
            .unwrap();
        assert_eq!(request.max_tokens, 2048);
    }

    #[test]
    fn test_claude_body_uses_messages_and_version() {
        let payload = payload().with_history(vec![
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello! How can I help?"),
        ]);
        let request = builder()
            .build(TaskKind::TextAnalysis, SONNET, &payload, &RequestOverrides::default())
            .unwrap();
        let body = request.to_body();

        assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(body["system"], "Respond in JSON.");
        assert_eq!(body["max_tokens"], 4096);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["role"], "user");
        assert!(messages[2]["content"].as_str().unwrap().contains("Jane Doe"));
    }

    #[test]
    fn test_titan_body_is_single_prompt() {
        let request = builder()
            .build(TaskKind::TextAnalysis, TITAN, &payload(), &RequestOverrides::default())
            .unwrap();
        let body = request.to_body();

        let input = body["inputText"].as_str().unwrap();
        assert!(input.starts_with("Respond in JSON.\n\nUser: Analyze this CV"));
        assert!(input.ends_with("\nAssistant:"));
        assert_eq!(body["textGenerationConfig"]["maxTokenCount"], 8192);
        assert!(body.get("messages").is_none());
    }

    #[test]
    fn test_llama_body_uses_prompt_and_max_gen_len() {
        let request = builder()
            .build(TaskKind::TextAnalysis, LLAMA, &payload(), &RequestOverrides::default())
            .unwrap();
        let body = request.to_body();
        assert!(body["prompt"].as_str().unwrap().contains("Jane Doe"));
        assert_eq!(body["max_gen_len"], 2048);
    }

    #[test]
    fn test_qwen_body_puts_system_first() {
        let request = builder()
            .build(TaskKind::TextAnalysis, QWEN, &payload(), &RequestOverrides::default())
            .unwrap();
        let body = request.to_body();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert!(body.get("anthropic_version").is_none());
    }
}
