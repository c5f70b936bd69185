pub mod conversation;
pub mod cv_analysis;
pub mod handlers;
pub mod pipeline;
pub mod portfolio;
pub mod prompts;
pub mod recommendation;
pub mod schema;

use serde::Serialize;
use serde_json::Value;

use crate::errors::{AppError, GENERIC_RETRY_MESSAGE};

pub use conversation::ConversationService;
pub use cv_analysis::CvAnalysisService;
pub use pipeline::AiPipeline;
pub use portfolio::PortfolioService;
pub use recommendation::RecommendationService;

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(e.into()))
}

/// Profile JSON as a prompt slot. An absent or empty profile renders as an
/// empty slot so the builder rejects it as missing.
pub(crate) fn profile_slot(profile: &Value) -> String {
    match profile {
        Value::Null => String::new(),
        Value::Object(fields) if fields.is_empty() => String::new(),
        Value::Array(items) if items.is_empty() => String::new(),
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}

/// Notes for a result produced without a usable model answer. Carries a
/// stable reason label, never provider text.
pub(crate) fn degraded_note(reason: &str) -> String {
    format!("{GENERIC_RETRY_MESSAGE} (reason: {reason})")
}
