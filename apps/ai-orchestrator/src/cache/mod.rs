//! Result cache. Facade outputs are stored under a content-derived key so an
//! identical request does not hit the model twice while the entry is live.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

pub mod memory_store;
pub mod redis_store;

pub use memory_store::MemoryCacheStore;
pub use redis_store::RedisCacheStore;

const KEY_PREFIX: &str = "ai";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value backend with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    /// Deletes every key matching a Redis-style glob; returns how many were removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError>;
}

/// Which facade an entry belongs to. Each has its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    CvAnalysis,
    Portfolio,
    Recommendations,
    Conversation,
}

impl CacheScope {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheScope::CvAnalysis => "cv_analysis",
            CacheScope::Portfolio => "portfolio",
            CacheScope::Recommendations => "recommendations",
            CacheScope::Conversation => "conversation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub cv_analysis: Duration,
    pub portfolio: Duration,
    pub recommendations: Duration,
    pub conversation: Duration,
}

impl CacheTtls {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cv_analysis: config.cache_ttl_cv_analysis,
            portfolio: config.cache_ttl_portfolio,
            recommendations: config.cache_ttl_recommendations,
            conversation: config.cache_ttl_conversation,
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            cv_analysis: Duration::from_secs(24 * 60 * 60),
            portfolio: Duration::from_secs(12 * 60 * 60),
            recommendations: Duration::from_secs(60 * 60),
            conversation: Duration::from_secs(5 * 60),
        }
    }
}

/// `ai:{scope}:{sha256(scope + canonical input JSON)}`.
///
/// `serde_json::Value` keeps object keys sorted, so serializing it is a
/// canonical form: key order in the caller's input does not change the key.
pub fn cache_key(scope: CacheScope, input: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(input.to_string().as_bytes());
    let digest = hasher.finalize();
    format!("{KEY_PREFIX}:{}:{digest:x}", scope.as_str())
}

pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    ttls: CacheTtls,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, ttls: CacheTtls) -> Self {
        Self { store, ttls }
    }

    pub fn ttl_for(&self, scope: CacheScope) -> Duration {
        match scope {
            CacheScope::CvAnalysis => self.ttls.cv_analysis,
            CacheScope::Portfolio => self.ttls.portfolio,
            CacheScope::Recommendations => self.ttls.recommendations,
            CacheScope::Conversation => self.ttls.conversation,
        }
    }

    /// An entry that no longer decodes is treated as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.store.get(key).await? else {
            debug!("Cache miss: {key}");
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!("Cache hit: {key}");
                Ok(Some(value))
            }
            Err(e) => {
                warn!("Discarding undecodable cache entry {key}: {e}");
                Ok(None)
            }
        }
    }

    /// A zero TTL disables caching for that entry.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }
        let raw = serde_json::to_string(value)?;
        self.store.set(key, raw, ttl).await
    }

    pub async fn invalidate(&self, pattern: &str) -> Result<u64, CacheError> {
        let removed = self.store.delete_matching(pattern).await?;
        debug!("Invalidated {removed} cache entries matching {pattern}");
        Ok(removed)
    }
}
