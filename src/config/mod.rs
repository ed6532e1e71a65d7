use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::upstream::{ClientSettings, RateLimitConfig, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chart_api: ChartApiConfig,
    pub llm: LlmConfig,
    pub cascade: CascadeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub requests_per_second: u32,
    pub requests_per_day: u32,
    pub chart_timeout_seconds: u64,
    pub reference_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub exchange_cache_ttl_seconds: u64,
    pub symbol_cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL, e.g. https://api.openai.com/v1
    pub api_url: String,
    pub api_key: Option<String>,
    pub vision_model: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Overall deadline for one cascade run, covering every timeframe step
    pub deadline_seconds: u64,
    /// Custom trading rules are truncated to this many characters
    pub max_rules_chars: usize,
}

impl ChartApiConfig {
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: self.requests_per_second,
            requests_per_day: self.requests_per_day,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            chart_timeout: Duration::from_secs(self.chart_timeout_seconds),
            reference_timeout: Duration::from_secs(self.reference_timeout_seconds),
            exchange_cache_ttl: Duration::from_secs(self.exchange_cache_ttl_seconds),
            symbol_cache_ttl: Duration::from_secs(self.symbol_cache_ttl_seconds),
        }
    }
}

impl CascadeConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_seconds)
    }
}

/// Read `key` from the environment, falling back to `default`
fn env_or<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {} value", key))
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file - this sets env vars that aren't already set
        dotenv::dotenv().ok();

        let config = Config {
            chart_api: ChartApiConfig {
                base_url: env::var("CHART_API_URL")
                    .unwrap_or_else(|_| "https://api.chart-img.com".to_string()),
                api_key: env::var("CHART_API_KEY").ok(),
                requests_per_second: env_or("CHART_API_REQUESTS_PER_SECOND", "10")?,
                requests_per_day: env_or("CHART_API_REQUESTS_PER_DAY", "500")?,
                chart_timeout_seconds: env_or("CHART_API_CHART_TIMEOUT_SECONDS", "30")?,
                reference_timeout_seconds: env_or("CHART_API_REFERENCE_TIMEOUT_SECONDS", "10")?,
                max_retries: env_or("CHART_API_MAX_RETRIES", "3")?,
                retry_base_delay_ms: env_or("CHART_API_RETRY_BASE_DELAY_MS", "500")?,
                exchange_cache_ttl_seconds: env_or("CHART_API_EXCHANGE_CACHE_TTL_SECONDS", "86400")?,
                symbol_cache_ttl_seconds: env_or("CHART_API_SYMBOL_CACHE_TTL_SECONDS", "3600")?,
            },
            llm: LlmConfig {
                api_url: env::var("LLM_API_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: env::var("LLM_API_KEY").or_else(|_| env::var("OPENAI_API_KEY")).ok(),
                vision_model: env::var("VISION_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
                timeout_seconds: env_or("LLM_TIMEOUT_SECONDS", "60")?,
                max_retries: env_or("LLM_MAX_RETRIES", "3")?,
            },
            cascade: CascadeConfig {
                deadline_seconds: env_or("CASCADE_DEADLINE_SECONDS", "180")?,
                max_rules_chars: env_or("CASCADE_MAX_RULES_CHARS", "2000")?,
            },
        };

        if config.chart_api.requests_per_second == 0 || config.chart_api.requests_per_day == 0 {
            anyhow::bail!("Chart API rate limits must be greater than zero");
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chart_api: ChartApiConfig {
                base_url: "https://api.chart-img.com".to_string(),
                api_key: None,
                requests_per_second: 10,
                requests_per_day: 500,
                chart_timeout_seconds: 30,
                reference_timeout_seconds: 10,
                max_retries: 3,
                retry_base_delay_ms: 500,
                exchange_cache_ttl_seconds: 86_400,
                symbol_cache_ttl_seconds: 3_600,
            },
            llm: LlmConfig {
                api_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                vision_model: "gpt-4o".to_string(),
                timeout_seconds: 60,
                max_retries: 3,
            },
            cascade: CascadeConfig {
                deadline_seconds: 180,
                max_rules_chars: 2_000,
            },
        }
    }
}
