//! Axum route handlers for the AI API.

use axum::{
    extract::{Multipart, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::authz::{require, Action, OwnedResource, StaffOnly, Subject};
use crate::errors::AppError;
use crate::services::conversation::{ChatReply, ConversationInput};
use crate::services::cv_analysis::{CvAnalysis, CvAnalysisInput};
use crate::services::portfolio::{PortfolioContent, PortfolioInput};
use crate::services::recommendation::{JobRecommendations, RecommendationInput};
use crate::state::AppState;

const CACHE_NAMESPACE: &str = "ai:";

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InvalidateQuery {
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub pattern: String,
    pub deleted: u64,
}

/// Every facade call acts on the caller's own data.
fn authorize_owner(headers: &HeaderMap, user_id: i64) -> Result<Subject, AppError> {
    let subject = Subject::from_headers(headers)?;
    require(&OwnedResource { owner_id: user_id }, &subject, Action::Write)?;
    Ok(subject)
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/ai/cv-analysis
pub async fn handle_cv_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CvAnalysisInput>,
) -> Result<Json<CvAnalysis>, AppError> {
    authorize_owner(&headers, request.user_id)?;
    if request.cv_text.trim().is_empty() {
        return Err(AppError::Validation("cv_text cannot be empty".to_string()));
    }

    let analysis = state.cv_analysis.process(&request).await?;
    Ok(Json(analysis))
}

/// POST /api/v1/ai/cv-analysis/upload
///
/// Multipart form with `user_id` and a PDF `file`. The PDF's text layer is
/// analysed exactly like a pasted CV.
pub async fn handle_cv_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<CvAnalysis>, AppError> {
    let mut user_id: Option<i64> = None;
    let mut pdf: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("user_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid user_id field: {e}")))?;
                let parsed = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| AppError::Validation("user_id must be an integer".to_string()))?;
                user_id = Some(parsed);
            }
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid file field: {e}")))?;
                pdf = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let user_id = user_id.ok_or_else(|| AppError::Validation("user_id is required".to_string()))?;
    let pdf = pdf.ok_or_else(|| AppError::Validation("file is required".to_string()))?;
    authorize_owner(&headers, user_id)?;

    let cv_text = extract_pdf_text(pdf).await?;
    info!(user_id, chars = cv_text.len(), "Extracted CV text from PDF");

    let analysis = state
        .cv_analysis
        .process(&CvAnalysisInput { user_id, cv_text })
        .await?;
    Ok(Json(analysis))
}

/// PDF parsing is CPU-bound; keep it off the async workers.
async fn extract_pdf_text(pdf: Vec<u8>) -> Result<String, AppError> {
    if pdf.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }

    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&pdf))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("PDF extraction task failed: {e}")))?
        .map_err(|e| AppError::Validation(format!("Could not read PDF: {e}")))?;

    if text.trim().is_empty() {
        return Err(AppError::Validation(
            "The PDF contains no extractable text".to_string(),
        ));
    }
    Ok(text)
}

/// POST /api/v1/ai/portfolio
pub async fn handle_portfolio(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PortfolioInput>,
) -> Result<Json<PortfolioContent>, AppError> {
    authorize_owner(&headers, request.user_id)?;
    let content = state.portfolio.process(&request).await?;
    Ok(Json(content))
}

/// POST /api/v1/ai/recommendations
pub async fn handle_recommendations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RecommendationInput>,
) -> Result<Json<JobRecommendations>, AppError> {
    authorize_owner(&headers, request.user_id)?;
    let ranked = state.recommendations.process(&request).await?;
    Ok(Json(ranked))
}

/// POST /api/v1/ai/chat
pub async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ConversationInput>,
) -> Result<Json<ChatReply>, AppError> {
    authorize_owner(&headers, request.user_id)?;
    let reply = state.conversation.process(&request).await?;
    Ok(Json(reply))
}

/// POST /api/v1/ai/chat/stream
///
/// Deltas go out over the user's `chat_{user_id}` channel while the model
/// generates; the response carries the final reply.
pub async fn handle_chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ConversationInput>,
) -> Result<Json<ChatReply>, AppError> {
    authorize_owner(&headers, request.user_id)?;
    let reply = state.conversation.process_streaming(&request).await?;
    Ok(Json(reply))
}

/// DELETE /api/v1/ai/cache?pattern=ai:cv_analysis:*
///
/// Staff only. Patterns are confined to the AI cache namespace.
pub async fn handle_invalidate_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<InvalidateQuery>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let subject = Subject::from_headers(&headers)?;
    require(&StaffOnly, &subject, Action::Delete)?;

    let pattern = query
        .pattern
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| format!("{CACHE_NAMESPACE}*"));
    if !pattern.starts_with(CACHE_NAMESPACE) {
        return Err(AppError::Validation(format!(
            "pattern must start with '{CACHE_NAMESPACE}'"
        )));
    }

    let deleted = state.cache.invalidate(&pattern).await?;
    info!(user_id = subject.user_id, pattern = %pattern, deleted, "Cache invalidated");
    Ok(Json(InvalidateResponse { pattern, deleted }))
}
