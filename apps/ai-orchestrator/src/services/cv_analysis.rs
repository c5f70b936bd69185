//! CV analysis: structured extraction of a candidate's CV.
//!
//! User-facing flow, so model failures degrade to a zero-confidence result
//! instead of an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::cache::CacheScope;
use crate::errors::AppError;
use crate::llm_client::{RequestOverrides, TaskKind, TaskPayload};
use crate::notifications::{EventType, NotificationDispatcher, NotificationEvent};
use crate::services::pipeline::{AiPipeline, PipelineCall};
use crate::services::prompts::CV_ANALYSIS;
use crate::services::schema::{lenient_string, lenient_string_list, SchemaReader};
use crate::services::degraded_note;

/// Extraction wants precision over variety.
const ANALYSIS_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Deserialize)]
pub struct CvAnalysisInput {
    pub user_id: i64,
    pub cv_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub linkedin: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub website: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkExperience {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub company: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub duration: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub achievements: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Education {
    #[serde(default, deserialize_with = "lenient_string")]
    pub degree: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub institution: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub year: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub field: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CvAnalysis {
    pub personal_info: PersonalInfo,
    pub professional_summary: String,
    pub technical_skills: Vec<String>,
    pub soft_skills: Vec<String>,
    pub work_experience: Vec<WorkExperience>,
    pub education: Vec<Education>,
    pub certifications: Vec<String>,
    pub languages: Vec<String>,
    pub career_level: String,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub recommended_roles: Vec<String>,
    pub confidence_score: f64,
    pub notes: Option<String>,
    pub cached: bool,
}

impl CvAnalysis {
    fn from_json(value: Option<&Value>) -> Self {
        let mut reader = SchemaReader::new(value);
        let mut analysis = CvAnalysis {
            personal_info: reader.object("personal_info"),
            professional_summary: reader.text("professional_summary"),
            technical_skills: reader.string_list("technical_skills"),
            soft_skills: reader.string_list("soft_skills"),
            work_experience: reader.list("work_experience"),
            education: reader.list("education"),
            certifications: reader.string_list("certifications"),
            languages: reader.string_list("languages"),
            career_level: reader.text("career_level"),
            strengths: reader.string_list("strengths"),
            areas_for_improvement: reader.string_list("areas_for_improvement"),
            recommended_roles: reader.string_list("recommended_roles"),
            ..CvAnalysis::default()
        };
        analysis.confidence_score = reader.confidence();
        analysis.notes = reader.notes();
        analysis
    }

    /// Model answered in prose: keep the text as the summary.
    fn unparsed(raw_text: &str) -> Self {
        CvAnalysis {
            professional_summary: raw_text.trim().to_string(),
            confidence_score: 0.0,
            notes: Some("The analysis could not be structured; showing the raw summary.".to_string()),
            ..CvAnalysis::default()
        }
    }

    fn degraded(reason: &str) -> Self {
        CvAnalysis {
            confidence_score: 0.0,
            notes: Some(degraded_note(reason)),
            ..CvAnalysis::default()
        }
    }

    fn event_payload(&self) -> Value {
        json!({
            "name": self.personal_info.name,
            "career_level": self.career_level,
            "technical_skills": self.technical_skills,
            "recommended_roles": self.recommended_roles,
            "confidence_score": self.confidence_score,
        })
    }
}

pub struct CvAnalysisService {
    pipeline: Arc<AiPipeline>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl CvAnalysisService {
    pub fn new(pipeline: Arc<AiPipeline>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            pipeline,
            dispatcher,
        }
    }

    pub async fn process(&self, input: &CvAnalysisInput) -> Result<CvAnalysis, AppError> {
        let cv_text = input.cv_text.trim();
        let call = PipelineCall {
            task: TaskKind::TextAnalysis,
            scope: CacheScope::CvAnalysis,
            cache_input: json!({ "cv_text": cv_text }),
            payload: TaskPayload::new(&CV_ANALYSIS).slot("cv_text", cv_text),
            overrides: RequestOverrides {
                temperature: Some(ANALYSIS_TEMPERATURE),
                ..RequestOverrides::default()
            },
            expects_json: true,
        };

        let outcome = match self.pipeline.run(&call).await {
            Ok(outcome) => outcome,
            Err(e) => match e.model_failure() {
                Some(reason) => {
                    warn!(user_id = input.user_id, "CV analysis degraded: {e}");
                    return Ok(CvAnalysis::degraded(reason));
                }
                None => return Err(e.into()),
            },
        };

        let mut analysis = match outcome.json_error {
            Some(_) => CvAnalysis::unparsed(&outcome.result.extracted_text),
            None => CvAnalysis::from_json(outcome.result.extracted_json.as_ref()),
        };
        analysis.cached = outcome.cache_hit;

        let event = NotificationEvent::new(input.user_id, EventType::CvAnalyzed, analysis.event_payload());
        self.dispatcher.notify(&event).await?;

        Ok(analysis)
    }
}
