use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_ANALYSIS_MODEL: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
pub const DEFAULT_CONVERSATION_MODEL: &str = "anthropic.claude-3-haiku-20240307-v1:0";

/// Where the ResultCache keeps its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            other => bail!("CACHE_BACKEND must be 'redis' or 'memory', got '{other}'"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Read once at startup; never reloaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub aws_region: String,
    pub default_model_id: String,
    pub conversation_model_id: String,
    pub bedrock_timeout: Duration,
    pub bedrock_max_retries: u32,
    pub bedrock_retry_delay: Duration,
    pub bedrock_retry_max_delay: Duration,
    pub bedrock_retry_jitter: bool,
    pub cache_backend: CacheBackend,
    pub cache_ttl_cv_analysis: Duration,
    pub cache_ttl_recommendations: Duration,
    pub cache_ttl_portfolio: Duration,
    pub cache_ttl_conversation: Duration,
    pub job_queue_key: String,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            redis_url: require_env("REDIS_URL")?,
            aws_region: env_or("AWS_REGION", "us-east-1"),
            default_model_id: env_or("BEDROCK_DEFAULT_MODEL_ID", DEFAULT_ANALYSIS_MODEL),
            conversation_model_id: env_or(
                "BEDROCK_CONVERSATION_MODEL_ID",
                DEFAULT_CONVERSATION_MODEL,
            ),
            bedrock_timeout: Duration::from_secs(parse_env("BEDROCK_TIMEOUT_SECS", 30)?),
            bedrock_max_retries: parse_env("BEDROCK_MAX_RETRIES", 3)?,
            bedrock_retry_delay: Duration::from_millis(parse_env("BEDROCK_RETRY_DELAY_MS", 1000)?),
            bedrock_retry_max_delay: Duration::from_millis(parse_env(
                "BEDROCK_RETRY_MAX_DELAY_MS",
                30_000,
            )?),
            bedrock_retry_jitter: parse_env("BEDROCK_RETRY_JITTER", true)?,
            cache_backend: parse_env("CACHE_BACKEND", CacheBackend::Redis)?,
            cache_ttl_cv_analysis: Duration::from_secs(parse_env(
                "CACHE_TTL_CV_ANALYSIS_SECS",
                24 * 60 * 60,
            )?),
            cache_ttl_recommendations: Duration::from_secs(parse_env(
                "CACHE_TTL_RECOMMENDATIONS_SECS",
                60 * 60,
            )?),
            cache_ttl_portfolio: Duration::from_secs(parse_env(
                "CACHE_TTL_PORTFOLIO_SECS",
                12 * 60 * 60,
            )?),
            cache_ttl_conversation: Duration::from_secs(parse_env(
                "CACHE_TTL_CONVERSATION_SECS",
                5 * 60,
            )?),
            job_queue_key: env_or("JOB_QUEUE_KEY", "ai:jobs"),
            port: parse_env("PORT", 8080)?,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_backend_parses_case_insensitively() {
        assert_eq!("Redis".parse::<CacheBackend>().unwrap(), CacheBackend::Redis);
        assert_eq!(" memory ".parse::<CacheBackend>().unwrap(), CacheBackend::Memory);
        assert!("memcached".parse::<CacheBackend>().is_err());
    }

    #[test]
    fn test_parse_env_falls_back_to_default_when_unset() {
        let value: u32 = parse_env("AI_ORCHESTRATOR_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}
