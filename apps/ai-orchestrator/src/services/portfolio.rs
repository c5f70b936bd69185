use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::cache::CacheScope;
use crate::errors::AppError;
use crate::llm_client::{RequestOverrides, TaskKind, TaskPayload};
use crate::notifications::{EventType, NotificationDispatcher, NotificationEvent};
use crate::services::pipeline::{AiPipeline, PipelineCall};
use crate::services::prompts::PORTFOLIO;
use crate::services::{degraded_note, profile_slot};
use crate::services::schema::{lenient_string, lenient_string_list, SchemaReader};

const DEFAULT_STYLE: &str = "professional";

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioInput {
    pub user_id: i64,
    #[serde(default)]
    pub profile: Value,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeaturedProject {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub technologies: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillGroup {
    #[serde(default, deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioContent {
    pub headline: String,
    pub bio: String,
    pub about: String,
    pub featured_projects: Vec<FeaturedProject>,
    pub skills_showcase: Vec<SkillGroup>,
    pub call_to_action: String,
    pub seo_keywords: Vec<String>,
    pub confidence_score: f64,
    pub notes: Option<String>,
    pub cached: bool,
}

impl PortfolioContent {
    fn from_json(value: Option<&Value>) -> Self {
        let mut reader = SchemaReader::new(value);
        let mut content = PortfolioContent {
            headline: reader.text("headline"),
            bio: reader.text("bio"),
            about: reader.text("about"),
            featured_projects: reader.list("featured_projects"),
            skills_showcase: reader.list("skills_showcase"),
            call_to_action: reader.text("call_to_action"),
            seo_keywords: reader.string_list("seo_keywords"),
            ..PortfolioContent::default()
        };
        content.confidence_score = reader.confidence();
        content.notes = reader.notes();
        content
    }

    fn unparsed(raw_text: &str) -> Self {
        PortfolioContent {
            bio: raw_text.trim().to_string(),
            confidence_score: 0.0,
            notes: Some("The portfolio could not be structured; showing the raw text as bio.".to_string()),
            ..PortfolioContent::default()
        }
    }

    fn empty(reason: &str) -> Self {
        PortfolioContent {
            confidence_score: 0.0,
            notes: Some(degraded_note(reason)),
            ..PortfolioContent::default()
        }
    }
}

/// Portfolio generation. Invocation failures propagate; an empty answer
/// yields an empty portfolio with zero confidence.
pub struct PortfolioService {
    pipeline: Arc<AiPipeline>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl PortfolioService {
    pub fn new(pipeline: Arc<AiPipeline>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            pipeline,
            dispatcher,
        }
    }

    pub async fn process(&self, input: &PortfolioInput) -> Result<PortfolioContent, AppError> {
        let style = input
            .style
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STYLE);

        let call = PipelineCall {
            task: TaskKind::ContentGeneration,
            scope: CacheScope::Portfolio,
            cache_input: json!({ "profile": input.profile, "style": style }),
            payload: TaskPayload::new(&PORTFOLIO)
                .slot("profile", profile_slot(&input.profile))
                .slot("style", style),
            overrides: RequestOverrides::default(),
            expects_json: true,
        };

        let outcome = match self.pipeline.run(&call).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_empty_output() => {
                warn!(user_id = input.user_id, "Portfolio generation returned nothing: {e}");
                return Ok(PortfolioContent::empty("empty_response"));
            }
            Err(e) => return Err(e.into()),
        };

        let mut content = match outcome.json_error {
            Some(_) => PortfolioContent::unparsed(&outcome.result.extracted_text),
            None => PortfolioContent::from_json(outcome.result.extracted_json.as_ref()),
        };
        content.cached = outcome.cache_hit;

        let event = NotificationEvent::new(
            input.user_id,
            EventType::PortfolioGenerated,
            json!({
                "headline": content.headline,
                "seo_keywords": content.seo_keywords,
                "confidence_score": content.confidence_score,
            }),
        );
        self.dispatcher.notify(&event).await?;

        Ok(content)
    }
}
