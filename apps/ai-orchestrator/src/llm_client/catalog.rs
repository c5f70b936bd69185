//! Model catalog: which model serves which task, and what each model accepts.
//!
//! Built once at startup from the built-in descriptors plus the configured
//! task → model mapping. Read-only afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::llm_client::LlmError;

/// A group of model ids sharing one request/response wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Claude,
    Titan,
    Llama,
    Qwen,
}

impl ModelFamily {
    /// Chat families take a message array; the others take one prompt string.
    pub fn uses_chat_messages(self) -> bool {
        matches!(self, ModelFamily::Claude | ModelFamily::Qwen)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamily::Claude => "claude",
            ModelFamily::Titan => "titan",
            ModelFamily::Llama => "llama",
            ModelFamily::Qwen => "qwen",
        }
    }
}

/// Logical task names used to pick a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    TextAnalysis,
    ContentGeneration,
    Conversation,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [
        TaskKind::TextAnalysis,
        TaskKind::ContentGeneration,
        TaskKind::Conversation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::TextAnalysis => "text_analysis",
            TaskKind::ContentGeneration => "content_generation",
            TaskKind::Conversation => "conversation",
        }
    }

    pub fn parse(task: &str) -> Result<Self, LlmError> {
        TaskKind::ALL
            .into_iter()
            .find(|t| t.as_str() == task)
            .ok_or_else(|| LlmError::UnknownTask(task.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: String,
    pub family: ModelFamily,
    pub max_tokens: u32,
    pub default_temperature: f32,
    /// Inclusive (min, max).
    pub supported_temperature_range: (f32, f32),
}

impl ModelDescriptor {
    fn new(model_id: &str, family: ModelFamily, max_tokens: u32, default_temperature: f32, range: (f32, f32)) -> Self {
        Self {
            model_id: model_id.to_string(),
            family,
            max_tokens,
            default_temperature,
            supported_temperature_range: range,
        }
    }

    pub fn clamp_temperature(&self, temperature: f32) -> f32 {
        let (min, max) = self.supported_temperature_range;
        temperature.clamp(min, max)
    }

    pub fn clamp_max_tokens(&self, max_tokens: u32) -> u32 {
        max_tokens.clamp(1, self.max_tokens.max(1))
    }
}

pub struct ModelCatalog {
    descriptors: HashMap<String, ModelDescriptor>,
    task_models: HashMap<TaskKind, String>,
}

impl ModelCatalog {
    /// Fails with `UnknownModel` when a task is mapped to a model without a descriptor.
    pub fn new(
        descriptors: Vec<ModelDescriptor>,
        task_models: impl IntoIterator<Item = (TaskKind, String)>,
    ) -> Result<Self, LlmError> {
        let descriptors: HashMap<String, ModelDescriptor> = descriptors
            .into_iter()
            .map(|d| (d.model_id.clone(), d))
            .collect();

        let mut mapped = HashMap::new();
        for (task, model_id) in task_models {
            if !descriptors.contains_key(&model_id) {
                return Err(LlmError::UnknownModel(model_id));
            }
            mapped.insert(task, model_id);
        }

        Ok(Self {
            descriptors,
            task_models: mapped,
        })
    }

    /// Built-in catalog with the task mapping taken from configuration.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        Self::new(
            builtin_descriptors(),
            [
                (TaskKind::TextAnalysis, config.default_model_id.clone()),
                (TaskKind::ContentGeneration, config.default_model_id.clone()),
                (TaskKind::Conversation, config.conversation_model_id.clone()),
            ],
        )
    }

    pub fn get_model_for_task(&self, task: &str) -> Result<&str, LlmError> {
        let kind = TaskKind::parse(task)?;
        self.task_models
            .get(&kind)
            .map(String::as_str)
            .ok_or_else(|| LlmError::UnknownTask(task.to_string()))
    }

    pub fn get_descriptor(&self, model_id: &str) -> Result<&ModelDescriptor, LlmError> {
        self.descriptors
            .get(model_id)
            .ok_or_else(|| LlmError::UnknownModel(model_id.to_string()))
    }

    pub fn family_of(&self, model_id: &str) -> Result<ModelFamily, LlmError> {
        self.get_descriptor(model_id).map(|d| d.family)
    }
}

pub fn builtin_descriptors() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "anthropic.claude-3-sonnet-20240229-v1:0",
            ModelFamily::Claude,
            4096,
            0.7,
            (0.0, 1.0),
        ),
        ModelDescriptor::new(
            "anthropic.claude-3-haiku-20240307-v1:0",
            ModelFamily::Claude,
            4096,
            0.7,
            (0.0, 1.0),
        ),
        ModelDescriptor::new("amazon.titan-text-express-v1", ModelFamily::Titan, 8192, 0.7, (0.0, 1.0)),
        ModelDescriptor::new("meta.llama3-70b-instruct-v1:0", ModelFamily::Llama, 2048, 0.5, (0.0, 1.0)),
        ModelDescriptor::new("qwen.qwen3-32b-v1:0", ModelFamily::Qwen, 8192, 0.7, (0.0, 2.0)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONNET: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
    const TITAN: &str = "amazon.titan-text-express-v1";

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(
            builtin_descriptors(),
            [
                (TaskKind::TextAnalysis, SONNET.to_string()),
                (TaskKind::Conversation, TITAN.to_string()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_task_lookup_returns_mapped_model() {
        let catalog = catalog();
        assert_eq!(catalog.get_model_for_task("text_analysis").unwrap(), SONNET);
        assert_eq!(catalog.get_model_for_task("conversation").unwrap(), TITAN);
    }

    #[test]
    fn test_unknown_task_string_fails() {
        let err = catalog().get_model_for_task("poetry").unwrap_err();
        assert!(matches!(err, LlmError::UnknownTask(t) if t == "poetry"));
    }

    #[test]
    fn test_known_but_unmapped_task_fails() {
        let err = catalog().get_model_for_task("content_generation").unwrap_err();
        assert!(matches!(err, LlmError::UnknownTask(_)));
    }

    #[test]
    fn test_unknown_model_descriptor_fails() {
        let err = catalog().get_descriptor("openai.gpt-9").unwrap_err();
        assert!(matches!(err, LlmError::UnknownModel(m) if m == "openai.gpt-9"));
    }

    #[test]
    fn test_mapping_to_missing_model_is_rejected() {
        let result = ModelCatalog::new(
            builtin_descriptors(),
            [(TaskKind::TextAnalysis, "missing-model".to_string())],
        );
        assert!(matches!(result, Err(LlmError::UnknownModel(_))));
    }

    #[test]
    fn test_family_encoding_kind() {
        assert!(ModelFamily::Claude.uses_chat_messages());
        assert!(ModelFamily::Qwen.uses_chat_messages());
        assert!(!ModelFamily::Titan.uses_chat_messages());
        assert!(!ModelFamily::Llama.uses_chat_messages());
    }

    #[test]
    fn test_descriptor_clamps() {
        let catalog = catalog();
        let sonnet = catalog.get_descriptor(SONNET).unwrap();
        assert_eq!(sonnet.clamp_temperature(1.5), 1.0);
        assert_eq!(sonnet.clamp_temperature(-0.2), 0.0);
        assert_eq!(sonnet.clamp_max_tokens(100_000), 4096);
        assert_eq!(sonnet.clamp_max_tokens(0), 1);
    }
}
