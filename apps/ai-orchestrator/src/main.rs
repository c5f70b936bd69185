mod authz;
mod cache;
mod config;
mod errors;
mod llm_client;
mod notifications;
mod routes;
mod services;
mod state;

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::cache::{CacheStore, CacheTtls, MemoryCacheStore, RedisCacheStore, ResultCache};
use crate::config::{CacheBackend, Config};
use crate::llm_client::bedrock::BedrockTransport;
use crate::llm_client::{ModelCatalog, ModelInvoker, RetryPolicy};
use crate::notifications::{NotificationDispatcher, RedisChannelPublisher, RedisJobQueue};
use crate::routes::build_router;
use crate::services::{
    AiPipeline, ConversationService, CvAnalysisService, PortfolioService, RecommendationService,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging; per-attempt model records use the "performance" target
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{crate_name}={level},performance={level}",
                crate_name = env!("CARGO_CRATE_NAME"),
                level = &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting AI orchestrator v{}", env!("CARGO_PKG_VERSION"));

    // Model catalog: refuse to start if a task points at an unknown model
    let catalog = Arc::new(
        ModelCatalog::from_config(&config).context("Invalid Bedrock model configuration")?,
    );
    info!(
        "Model catalog loaded (analysis: {}, conversation: {})",
        config.default_model_id, config.conversation_model_id
    );

    // Initialize Bedrock
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()))
        .load()
        .await;
    let transport = Arc::new(BedrockTransport::new(aws_sdk_bedrockruntime::Client::new(
        &sdk_config,
    )));
    let policy = RetryPolicy::from_config(&config);
    info!(
        "Bedrock client initialized (region: {}, attempts: {}, timeout: {:?})",
        config.aws_region, policy.max_attempts, policy.attempt_timeout
    );
    let invoker = ModelInvoker::new(transport, policy);

    // Initialize Redis: pub/sub channel and durable job list, optionally the cache
    let redis = redis::Client::open(config.redis_url.clone())?;
    let conn = redis
        .get_multiplexed_async_connection()
        .await
        .context("Could not connect to Redis")?;
    info!("Redis connection established");

    let store: Arc<dyn CacheStore> = match config.cache_backend {
        CacheBackend::Redis => Arc::new(RedisCacheStore::new(conn.clone())),
        CacheBackend::Memory => {
            let store = MemoryCacheStore::new();
            store.start_ttl_cleanup();
            Arc::new(store)
        }
    };
    info!("Result cache backend: {:?}", config.cache_backend);
    let cache = Arc::new(ResultCache::new(store, CacheTtls::from_config(&config)));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(RedisChannelPublisher::new(conn.clone())),
        Arc::new(RedisJobQueue::new(conn, config.job_queue_key.clone())),
    ));

    let pipeline = Arc::new(AiPipeline::new(
        catalog,
        invoker,
        cache.clone(),
        dispatcher.clone(),
    ));

    // Build app state
    let state = AppState {
        config: Arc::new(config.clone()),
        cache,
        cv_analysis: Arc::new(CvAnalysisService::new(pipeline.clone(), dispatcher.clone())),
        portfolio: Arc::new(PortfolioService::new(pipeline.clone(), dispatcher.clone())),
        recommendations: Arc::new(RecommendationService::new(
            pipeline.clone(),
            dispatcher.clone(),
        )),
        conversation: Arc::new(ConversationService::new(pipeline, dispatcher)),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the front-end domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
