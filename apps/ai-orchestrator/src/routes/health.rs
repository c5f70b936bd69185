use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::config::CacheBackend;
use crate::state::AppState;

/// GET /health
/// Returns service status, version, and the models serving each task.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let cache_backend = match state.config.cache_backend {
        CacheBackend::Redis => "redis",
        CacheBackend::Memory => "memory",
    };

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": env!("CARGO_PKG_NAME"),
        "models": {
            "text_analysis": state.config.default_model_id,
            "content_generation": state.config.default_model_id,
            "conversation": state.config.conversation_model_id,
        },
        "cache_backend": cache_backend,
    }))
}
