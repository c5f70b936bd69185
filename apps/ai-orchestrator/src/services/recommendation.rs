//! Job recommendations: ranks a caller-supplied set of jobs against a profile.
//!
//! The model only scores; which jobs exist is decided by the input. Entries
//! for job ids that were not offered are dropped, scores are clamped to
//! 0–100 and the list is sorted best match first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cache::CacheScope;
use crate::errors::AppError;
use crate::llm_client::{RequestOverrides, TaskKind, TaskPayload};
use crate::notifications::{EventType, NotificationDispatcher, NotificationEvent};
use crate::services::pipeline::{AiPipeline, PipelineCall};
use crate::services::prompts::RECOMMENDATIONS;
use crate::services::schema::{
    lenient_f64, lenient_i64, lenient_string, lenient_string_list, round2, SchemaReader,
};
use crate::services::{degraded_note, profile_slot, to_json};

const MIN_SCORE: f64 = 0.0;
const MAX_SCORE: f64 = 100.0;
const SCORING_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationInput {
    pub user_id: i64,
    #[serde(default)]
    pub profile: Value,
    #[serde(default)]
    pub jobs: Vec<JobPosting>,
}

/// One entry as the model wrote it.
#[derive(Debug, Default, Deserialize)]
struct ScoredJob {
    #[serde(default, deserialize_with = "lenient_i64")]
    job_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    match_score: f64,
    #[serde(default, deserialize_with = "lenient_string_list")]
    matching_skills: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    missing_skills: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecommendation {
    pub job_id: i64,
    pub job_title: String,
    pub company: String,
    pub match_score: f64,
    pub matching_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecommendations {
    pub recommendations: Vec<JobRecommendation>,
    pub career_advice: String,
    pub confidence_score: f64,
    pub notes: Option<String>,
    pub cached: bool,
}

impl JobRecommendations {
    fn from_json(value: Option<&Value>, jobs: &[JobPosting]) -> Self {
        let mut reader = SchemaReader::new(value);
        let scored: Vec<ScoredJob> = reader.list("recommendations");
        let career_advice = reader.text("career_advice");

        let offered: HashMap<i64, &JobPosting> = jobs.iter().map(|j| (j.id, j)).collect();
        let mut seen = HashSet::new();
        let mut dropped = 0usize;
        let mut recommendations = Vec::with_capacity(scored.len());

        for entry in scored {
            let Some(job) = entry.job_id.and_then(|id| offered.get(&id)) else {
                dropped += 1;
                continue;
            };
            if !seen.insert(job.id) {
                dropped += 1;
                continue;
            }
            recommendations.push(JobRecommendation {
                job_id: job.id,
                job_title: job.title.clone(),
                company: job.company.clone(),
                match_score: clamp_score(entry.match_score),
                matching_skills: entry.matching_skills,
                missing_skills: entry.missing_skills,
                reasoning: entry.reasoning,
            });
        }
        recommendations.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));

        if dropped > 0 {
            debug!("Dropped {dropped} recommendation(s) for unknown or repeated job ids");
        }
        let notes = match (reader.notes(), dropped) {
            (notes, 0) => notes,
            (None, n) => Some(format!("Ignored {n} entries for jobs that were not offered")),
            (Some(missing), n) => Some(format!(
                "{missing}. Ignored {n} entries for jobs that were not offered"
            )),
        };

        JobRecommendations {
            recommendations,
            career_advice,
            confidence_score: reader.confidence(),
            notes,
            cached: false,
        }
    }

    fn unparsed(raw_text: &str) -> Self {
        JobRecommendations {
            career_advice: raw_text.trim().to_string(),
            confidence_score: 0.0,
            notes: Some("The ranking could not be structured; showing the raw advice.".to_string()),
            ..JobRecommendations::default()
        }
    }

    fn empty(reason: &str) -> Self {
        JobRecommendations {
            confidence_score: 0.0,
            notes: Some(degraded_note(reason)),
            ..JobRecommendations::default()
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if !score.is_finite() {
        return MIN_SCORE;
    }
    round2(score.clamp(MIN_SCORE, MAX_SCORE))
}

pub struct RecommendationService {
    pipeline: Arc<AiPipeline>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl RecommendationService {
    pub fn new(pipeline: Arc<AiPipeline>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            pipeline,
            dispatcher,
        }
    }

    pub async fn process(&self, input: &RecommendationInput) -> Result<JobRecommendations, AppError> {
        if input.jobs.is_empty() {
            return Err(AppError::Validation(
                "jobs must contain at least one posting".to_string(),
            ));
        }

        let jobs = to_json(&input.jobs)?;
        let call = PipelineCall {
            task: TaskKind::TextAnalysis,
            scope: CacheScope::Recommendations,
            cache_input: json!({ "profile": input.profile, "jobs": jobs }),
            payload: TaskPayload::new(&RECOMMENDATIONS)
                .slot("profile", profile_slot(&input.profile))
                .slot("jobs", jobs.to_string()),
            overrides: RequestOverrides {
                temperature: Some(SCORING_TEMPERATURE),
                ..RequestOverrides::default()
            },
            expects_json: true,
        };

        let outcome = match self.pipeline.run(&call).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_empty_output() => {
                warn!(user_id = input.user_id, "Job ranking returned nothing: {e}");
                return Ok(JobRecommendations::empty("empty_response"));
            }
            Err(e) => return Err(e.into()),
        };

        let mut ranked = match outcome.json_error {
            Some(_) => JobRecommendations::unparsed(&outcome.result.extracted_text),
            None => JobRecommendations::from_json(outcome.result.extracted_json.as_ref(), &input.jobs),
        };
        ranked.cached = outcome.cache_hit;

        let top: Vec<Value> = ranked
            .recommendations
            .iter()
            .take(3)
            .map(|r| json!({ "job_id": r.job_id, "match_score": r.match_score }))
            .collect();
        let event = NotificationEvent::new(
            input.user_id,
            EventType::RecommendationsReady,
            json!({ "count": ranked.recommendations.len(), "top": top }),
        );
        self.dispatcher.notify(&event).await?;

        Ok(ranked)
    }
}
