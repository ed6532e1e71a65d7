use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use super::{
    ChartApiError, ChartApiResult, ChartPayload, ChartRequest, ChartResponse, ListingEntry, UpstreamQuota,
};

/// One raw call to the charting service, with no budget, cache or retry.
#[async_trait]
pub trait ChartTransport: Send + Sync {
    async fn send(&self, request: &ChartRequest, timeout: Duration) -> ChartApiResult<ChartResponse>;
}

#[derive(Debug, Deserialize)]
struct StorageResponse {
    url: String,
    #[serde(default)]
    expire: Option<String>,
}

/// reqwest-backed transport for the chart-img style HTTP API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: Option<String>) -> ChartApiResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ChartApiError::Config(format!("Invalid chart API URL '{}': {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("chartpilot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Appends the request's segments to the base path, percent-encoding each one
    fn url_for(&self, request: &ChartRequest) -> ChartApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChartApiError::Config(format!("Chart API URL '{}' cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(request.path_segments());
        Ok(url)
    }
}

#[async_trait]
impl ChartTransport for HttpTransport {
    async fn send(&self, request: &ChartRequest, timeout: Duration) -> ChartApiResult<ChartResponse> {
        let url = self.url_for(request)?;
        debug!("Chart API request: {}", url);

        let builder = match request {
            ChartRequest::AdvancedChart { spec, .. } => self.client.post(url).json(spec),
            ChartRequest::ExchangeList | ChartRequest::SymbolList { .. } => self.client.get(url),
        };
        let builder = match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        };

        let response = builder.timeout(timeout).send().await.map_err(|e| map_send_error(e, timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let quota = parse_quota(&headers);

        if !status.is_success() {
            let status_code = status.as_u16();
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            error!("Chart API failed ({}): {}", status_code, message);
            return Err(ChartApiError::from_status(status_code, message, retry_after));
        }

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let payload = match request {
            ChartRequest::AdvancedChart { storage: true, .. } => {
                let body = response.bytes().await.map_err(|e| map_body_error(e, timeout))?;
                parse_storage(&body)?
            }
            ChartRequest::AdvancedChart { storage: false, .. } => {
                let bytes = response.bytes().await.map_err(|e| map_body_error(e, timeout))?;
                ChartPayload::Image {
                    content_type,
                    bytes: bytes.to_vec(),
                }
            }
            ChartRequest::ExchangeList | ChartRequest::SymbolList { .. } => {
                let body = response.text().await.map_err(|e| map_body_error(e, timeout))?;
                ChartPayload::Listing {
                    entries: parse_listing(&body)?,
                }
            }
        };

        Ok(ChartResponse { payload, quota })
    }
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> ChartApiError {
    if e.is_timeout() {
        ChartApiError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        ChartApiError::Network(e)
    }
}

/// A 200 whose body cannot be read as content is a parse failure, not a transport one
fn map_body_error(e: reqwest::Error, timeout: Duration) -> ChartApiError {
    if e.is_decode() {
        ChartApiError::parse_error(format!("Unreadable response body: {}", e))
    } else {
        map_send_error(e, timeout)
    }
}

/// Storage responses carry the hosted image URL and an optional RFC 3339 expiry
fn parse_storage(body: &[u8]) -> ChartApiResult<ChartPayload> {
    let body: StorageResponse = serde_json::from_slice(body)?;
    let expires_at = body
        .expire
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(ChartPayload::Stored {
        url: body.url,
        expires_at,
    })
}

fn parse_quota(headers: &HeaderMap) -> UpstreamQuota {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    UpstreamQuota {
        remaining: header_u64("x-ratelimit-remaining"),
        resets_at: header_u64("x-ratelimit-reset")
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single()),
    }
}

/// Listings come back either as an array of objects or of bare strings
fn parse_listing(body: &str) -> ChartApiResult<Vec<ListingEntry>> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let items = match &value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(obj) => obj
            .get("payload")
            .or_else(|| obj.get("data"))
            .and_then(|v| v.as_array())
            .map(|v| v.as_slice())
            .ok_or_else(|| ChartApiError::parse_error("Listing response has no array payload"))?,
        _ => return Err(ChartApiError::parse_error("Listing response is not JSON array or object")),
    };

    items
        .iter()
        .map(|item| match item {
            serde_json::Value::String(id) => Ok(ListingEntry {
                id: id.clone(),
                description: None,
            }),
            serde_json::Value::Object(obj) => {
                let id = obj
                    .get("id")
                    .or_else(|| obj.get("symbol"))
                    .or_else(|| obj.get("name"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ChartApiError::parse_error("Listing entry missing id"))?;
                Ok(ListingEntry {
                    id: id.to_string(),
                    description: obj.get("description").and_then(|v| v.as_str()).map(String::from),
                })
            }
            _ => Err(ChartApiError::parse_error("Unexpected listing entry")),
        })
        .collect()
}
