//! Upstream charting API layer
//! Budget-gated, cache-first, backoff-bounded access to the chart rendering service

pub mod cache;
pub mod client;
pub mod errors;
pub mod rate_limit;
pub mod retry;
pub mod transport;

// Re-export commonly used types
pub use cache::ResponseCache;
pub use client::{ChartApiClient, ClientSettings};
pub use errors::{ChartApiError, ChartApiResult};
pub use rate_limit::{BudgetSnapshot, RateLimitConfig, TokenBudget};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use transport::{ChartTransport, HttpTransport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interval;

pub const MIN_CHART_WIDTH: u32 = 320;
pub const MAX_CHART_WIDTH: u32 = 2048;
pub const MIN_CHART_HEIGHT: u32 = 220;
pub const MAX_CHART_HEIGHT: u32 = 2048;
pub const MAX_STUDIES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChartTheme {
    Light,
    #[default]
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ChartStyle {
    Bar,
    #[default]
    Candle,
    Line,
    Area,
    HeikinAshi,
}

/// Explicit time range, in place of the rendering service's default lookback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// A named study overlaid on the chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub name: String,
}

/// Typed configuration for one rendered chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Exchange-qualified symbol, e.g. "BINANCE:BTCUSDT"
    pub symbol: String,
    pub interval: String,
    pub width: u32,
    pub height: u32,
    pub theme: ChartTheme,
    pub style: ChartStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<ChartRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub studies: Vec<Study>,
}

impl ChartSpec {
    pub fn new(symbol: impl Into<String>, interval: &str) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval::normalize(interval),
            width: 1280,
            height: 720,
            theme: ChartTheme::default(),
            style: ChartStyle::default(),
            range: None,
            timezone: None,
            studies: Vec::new(),
        }
    }

    pub fn with_studies<I, S>(mut self, studies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.studies = studies.into_iter().map(|name| Study { name: name.into() }).collect();
        self
    }

    /// Reject requests the upstream can never satisfy, before spending budget on them
    pub fn validate(&self) -> ChartApiResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(ChartApiError::validation_error("symbol", "Symbol cannot be empty"));
        }

        if !interval::is_recognized(&self.interval) {
            return Err(ChartApiError::Validation {
                field: "interval".to_string(),
                message: format!("Unrecognized interval '{}'", self.interval),
            });
        }

        if !(MIN_CHART_WIDTH..=MAX_CHART_WIDTH).contains(&self.width) {
            return Err(ChartApiError::Validation {
                field: "width".to_string(),
                message: format!("Width must be within {}..={}", MIN_CHART_WIDTH, MAX_CHART_WIDTH),
            });
        }

        if !(MIN_CHART_HEIGHT..=MAX_CHART_HEIGHT).contains(&self.height) {
            return Err(ChartApiError::Validation {
                field: "height".to_string(),
                message: format!("Height must be within {}..={}", MIN_CHART_HEIGHT, MAX_CHART_HEIGHT),
            });
        }

        if self.studies.len() > MAX_STUDIES {
            return Err(ChartApiError::Validation {
                field: "studies".to_string(),
                message: format!("At most {} studies per chart", MAX_STUDIES),
            });
        }

        if let Some(range) = &self.range {
            if range.from >= range.to {
                return Err(ChartApiError::validation_error("range", "Range start must precede its end"));
            }
        }

        Ok(())
    }
}

/// Timeout class of an upstream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Chart,
    Reference,
}

/// Calls the core makes against the charting API
#[derive(Debug, Clone, PartialEq)]
pub enum ChartRequest {
    /// Render a chart; `storage` asks for a hosted URL instead of raw bytes
    AdvancedChart { spec: ChartSpec, storage: bool },
    ExchangeList,
    SymbolList { exchange: String },
}

impl ChartRequest {
    pub fn kind(&self) -> EndpointKind {
        match self {
            ChartRequest::AdvancedChart { .. } => EndpointKind::Chart,
            ChartRequest::ExchangeList | ChartRequest::SymbolList { .. } => EndpointKind::Reference,
        }
    }

    /// Only reference data is cached; rendered charts are always fetched fresh
    pub fn cache_key(&self) -> Option<String> {
        match self {
            ChartRequest::AdvancedChart { .. } => None,
            ChartRequest::ExchangeList => Some("exchanges".to_string()),
            ChartRequest::SymbolList { exchange } => Some(format!("symbols:{}", exchange_id(exchange))),
        }
    }

    /// Unescaped path segments; the transport encodes each one
    pub fn path_segments(&self) -> Vec<String> {
        let owned = |segments: &[&str]| segments.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        match self {
            ChartRequest::AdvancedChart { storage: true, .. } => owned(&["v2", "tradingview", "advanced-chart", "storage"]),
            ChartRequest::AdvancedChart { storage: false, .. } => owned(&["v2", "tradingview", "advanced-chart"]),
            ChartRequest::ExchangeList => owned(&["v3", "tradingview", "exchange", "list"]),
            ChartRequest::SymbolList { exchange } => {
                let mut segments = owned(&["v3", "tradingview", "exchange"]);
                segments.push(exchange_id(exchange));
                segments
            }
        }
    }

    /// Display form of the path, for logs
    pub fn path(&self) -> String {
        format!("/{}", self.path_segments().join("/"))
    }

    pub fn validate(&self) -> ChartApiResult<()> {
        match self {
            ChartRequest::AdvancedChart { spec, .. } => spec.validate(),
            ChartRequest::SymbolList { exchange } => {
                let id = exchange_id(exchange);
                if id.is_empty() {
                    return Err(ChartApiError::validation_error("exchange", "Exchange cannot be empty"));
                }
                if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                    return Err(ChartApiError::Validation {
                        field: "exchange".to_string(),
                        message: format!("Invalid exchange id '{}'", exchange),
                    });
                }
                Ok(())
            }
            ChartRequest::ExchangeList => Ok(()),
        }
    }
}

/// Exchange ids are case-insensitive upstream; one canonical form keys both the cache and the URL
fn exchange_id(exchange: &str) -> String {
    exchange.trim().to_uppercase()
}

/// A request plus how the client should treat it
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub request: ChartRequest,
    /// Bypass the cache and overwrite any cached value on success
    pub force_refresh: bool,
}

impl RequestDescriptor {
    pub fn refresh(request: ChartRequest) -> Self {
        Self {
            request,
            force_refresh: true,
        }
    }
}

impl From<ChartRequest> for RequestDescriptor {
    fn from(request: ChartRequest) -> Self {
        Self {
            request,
            force_refresh: false,
        }
    }
}

/// Informational rate-limit headers from the upstream; never used for admission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamQuota {
    pub remaining: Option<u64>,
    pub resets_at: Option<DateTime<Utc>>,
}

/// Reference-data entry (exchange or symbol)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChartPayload {
    /// Hosted image with expiry
    Stored { url: String, expires_at: Option<DateTime<Utc>> },
    /// Raw image bytes
    Image { content_type: String, bytes: Vec<u8> },
    Listing { entries: Vec<ListingEntry> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartResponse {
    pub payload: ChartPayload,
    #[serde(default)]
    pub quota: UpstreamQuota,
}

impl ChartResponse {
    pub fn stored_url(&self) -> Option<&str> {
        match &self.payload {
            ChartPayload::Stored { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn listing(&self) -> Option<&[ListingEntry]> {
        match &self.payload {
            ChartPayload::Listing { entries } => Some(entries),
            _ => None,
        }
    }
}
