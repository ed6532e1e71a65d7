//! LLM integration for chart reading
//! OpenAI-compatible chat completions with image input, explicit timeouts and
//! exponential-backoff retries on its own quota, separate from the chart API budget

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tracing::{error, info, warn};
use url::Url;

use crate::cascade::prompts::CascadePrompts;
use crate::cascade::{
    EntryZone, KeyLevels, TimeframeAnalysis, TimeframeRequest, Trend, TrendStrength, VisionAnalyzer,
};

/// Failures of one LLM call
#[derive(Error, Debug)]
pub enum LLMError {
    #[error("LLM API returned {status_code}: {message}")]
    Api { status_code: u16, message: String },

    #[error("LLM request timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    #[error("LLM request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
}

impl LLMError {
    /// Timeouts, 429, 5xx and transport failures are retried; other statuses
    /// and malformed responses are not
    pub fn is_retryable(&self) -> bool {
        match self {
            LLMError::Timeout { .. } | LLMError::Network(_) => true,
            LLMError::Api { status_code, .. } => *status_code == 429 || *status_code >= 500,
            LLMError::InvalidResponse(_) => false,
        }
    }
}

/// LLM response with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
}

/// LLM client configuration
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub vision_model: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            vision_model: "gpt-4o".to_string(),
            timeout_seconds: 60,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<usize>,
    completion_tokens: Option<usize>,
    total_tokens: Option<usize>,
}

/// Model output for one timeframe, before the cascade assigns position
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeframeRead {
    trend: Trend,
    trend_strength: TrendStrength,
    #[serde(default)]
    key_levels: KeyLevels,
    #[serde(default, rename = "alignsWithHigherTF")]
    aligns_with_higher_tf: Option<bool>,
    #[serde(default)]
    signals: Vec<String>,
    #[serde(default)]
    entry_zone: Option<EntryZone>,
    #[serde(default)]
    reasoning: String,
}

/// Vision-capable LLM client
#[derive(Debug, Clone)]
pub struct LLMClient {
    http: reqwest::Client,
    endpoint: Url,
    config: LLMConfig,
}

impl LLMClient {
    /// Create new LLM client with configuration
    pub fn new(config: LLMConfig) -> Result<Self> {
        let base = config.api_url.trim_end_matches('/').to_string() + "/";
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join("chat/completions"))
            .context("Invalid LLM API URL")?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("chartpilot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build LLM HTTP client")?;

        Ok(Self { http, endpoint, config })
    }

    /// Create client from config::Config
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        Self::new(LLMConfig {
            api_url: config.llm.api_url.clone(),
            api_key: config.llm.api_key.clone(),
            vision_model: config.llm.vision_model.clone(),
            timeout_seconds: config.llm.timeout_seconds,
            max_retries: config.llm.max_retries,
        })
    }

    /// Send a prompt plus one image, with timeout and exponential backoff
    pub async fn generate_with_image(&self, system: &str, prompt: &str, image_url: &str) -> Result<LLMResponse> {
        let model_name = &self.config.vision_model;

        info!(
            "Generating chart read with model '{}' (prompt length: {} chars)",
            model_name,
            prompt.len()
        );

        let body = json!({
            "model": model_name,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": prompt },
                        { "type": "image_url", "image_url": { "url": image_url } }
                    ]
                }
            ]
        });

        let timeout_seconds = self.config.timeout_seconds;
        let response = with_llm_retries(self.config.max_retries, || async {
            match timeout(Duration::from_secs(timeout_seconds), self.send(&body)).await {
                Ok(result) => result,
                Err(_) => Err(LLMError::Timeout { timeout_seconds }),
            }
        })
        .await?;

        info!(
            "Generated {} chars with model '{}'",
            response.content.len(),
            response.model
        );
        Ok(response)
    }

    async fn send(&self, body: &serde_json::Value) -> Result<LLMResponse, LLMError> {
        let mut request = self.http.post(self.endpoint.clone()).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LLMError::Api {
                status_code: status.as_u16(),
                message,
            });
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                LLMError::InvalidResponse(e.to_string())
            } else {
                LLMError::Network(e)
            }
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LLMError::InvalidResponse("no message content".to_string()))?;

        Ok(LLMResponse {
            content,
            model: parsed.model.unwrap_or_else(|| self.config.vision_model.clone()),
            prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
            total_tokens: parsed.usage.as_ref().and_then(|u| u.total_tokens),
        })
    }
}

/// Run an LLM call with `max_retries` retries after the first attempt.
///
/// Backoff is 1s, 2s, 4s, ... and only retryable failures are retried.
async fn with_llm_retries<F, Fut, T>(max_retries: u32, operation: F) -> Result<T, LLMError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LLMError>>,
{
    let backoff = (0..max_retries).map(|i| Duration::from_secs(2_u64.saturating_pow(i)));

    RetryIf::spawn(backoff, operation, |e: &LLMError| {
        if e.is_retryable() {
            warn!("Retryable LLM error: {}", e);
            true
        } else {
            error!("Non-retryable LLM error: {}", e);
            false
        }
    })
    .await
}

#[async_trait]
impl VisionAnalyzer for LLMClient {
    async fn analyze_timeframe(&self, request: TimeframeRequest<'_>) -> Result<TimeframeAnalysis> {
        let prompt = CascadePrompts::timeframe_prompt(&request);
        let response = self
            .generate_with_image(CascadePrompts::system_prompt(), &prompt, request.image_url)
            .await
            .with_context(|| format!("Vision analysis failed for {} {}", request.symbol, request.interval))?;

        parse_timeframe_read(&response.content, &request)
    }
}

/// Turn the model's JSON into a timeframe analysis.
///
/// When the model omits `alignsWithHigherTF`, alignment is derived from the
/// dominant higher-timeframe trend.
fn parse_timeframe_read(content: &str, request: &TimeframeRequest<'_>) -> Result<TimeframeAnalysis> {
    let json_content = extract_json_from_text(content)
        .ok_or_else(|| anyhow::anyhow!("No valid JSON found in response"))?;
    let read: TimeframeRead = serde_json::from_str(&json_content).context("Failed to parse JSON response")?;

    let entry_zone = read.entry_zone.map(|z| EntryZone {
        low: z.low.min(z.high),
        high: z.low.max(z.high),
    });

    let aligns_with_higher_tf = match (request.position, read.aligns_with_higher_tf) {
        (0, _) => true,
        (_, Some(aligns)) => aligns,
        (_, None) => request.prior_context.dominant_trend() == Some(read.trend),
    };

    Ok(TimeframeAnalysis {
        interval: request.interval.to_string(),
        position: request.position,
        trend: read.trend,
        trend_strength: read.trend_strength,
        key_levels: read.key_levels,
        aligns_with_higher_tf,
        signals: read.signals,
        entry_zone,
        reasoning: read.reasoning,
    })
}

/// Find the first complete JSON object in model output.
///
/// Handles prose or markdown fences around the object; braces inside JSON
/// strings are parsed, not counted.
fn extract_json_from_text(text: &str) -> Option<String> {
    text.match_indices('{').find_map(|(start, _)| {
        let candidate = &text[start..];
        let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<serde_json::Value>();
        match stream.next() {
            Some(Ok(serde_json::Value::Object(_))) => Some(candidate[..stream.byte_offset()].to_string()),
            _ => None,
        }
    })
}
