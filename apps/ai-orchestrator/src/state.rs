use std::sync::Arc;

use crate::cache::ResultCache;
use crate::config::Config;
use crate::services::{ConversationService, CvAnalysisService, PortfolioService, RecommendationService};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<ResultCache>,
    pub cv_analysis: Arc<CvAnalysisService>,
    pub portfolio: Arc<PortfolioService>,
    pub recommendations: Arc<RecommendationService>,
    pub conversation: Arc<ConversationService>,
}
