pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::services::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/ai/cv-analysis", post(handlers::handle_cv_analysis))
        .route(
            "/api/v1/ai/cv-analysis/upload",
            post(handlers::handle_cv_upload),
        )
        .route("/api/v1/ai/portfolio", post(handlers::handle_portfolio))
        .route(
            "/api/v1/ai/recommendations",
            post(handlers::handle_recommendations),
        )
        .route("/api/v1/ai/chat", post(handlers::handle_chat))
        .route("/api/v1/ai/chat/stream", post(handlers::handle_chat_stream))
        .route("/api/v1/ai/cache", delete(handlers::handle_invalidate_cache))
        .with_state(state)
}
