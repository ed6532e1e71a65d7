//! Multi-timeframe cascade analysis
//! Charts are analyzed from the longest to the shortest timeframe, each step
//! seeing every conclusion reached above it, then reduced to one recommendation

pub mod engine;
pub mod generate;
pub mod prompts;
pub mod registry;
pub mod synthesis;
pub mod vision;

// Re-export commonly used types
pub use engine::{CascadeEngine, CascadeOptions, CascadeOutcome, OrderingMode};
pub use generate::ChartGenerator;
pub use registry::{ChartRegistry, ChartRegistryStore, RegistryLookup, RequestChartRegistry};
pub use synthesis::{synthesize, Alignment, Recommendation, SynthesisResult, TradePlan};
pub use vision::{TimeframeRequest, VisionAnalyzer};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interval::Timeframed;

/// Legacy fixed-role tag from the three-chart workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartRole {
    /// Higher timeframe
    Htf,
    /// Execution timeframe
    Etf,
    /// Lower timeframe
    Ltf,
}

impl ChartRole {
    pub fn position(&self) -> usize {
        match self {
            ChartRole::Htf => 0,
            ChartRole::Etf => 1,
            ChartRole::Ltf => 2,
        }
    }
}

/// A rendered chart available for analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChartRole>,
    pub image_url: String,
    pub symbol: String,
    pub interval: String,
    #[serde(default)]
    pub indicators: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl Timeframed for ChartInfo {
    fn interval(&self) -> &str {
        &self.interval
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl Trend {
    pub fn is_directional(&self) -> bool {
        !matches!(self, Trend::Neutral)
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendStrength {
    Strong,
    Moderate,
    Weak,
}

impl TrendStrength {
    pub fn weight(&self) -> f64 {
        match self {
            TrendStrength::Strong => 1.0,
            TrendStrength::Moderate => 0.6,
            TrendStrength::Weak => 0.3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyLevels {
    #[serde(default)]
    pub support: Vec<f64>,
    #[serde(default)]
    pub resistance: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryZone {
    pub low: f64,
    pub high: f64,
}

impl EntryZone {
    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

/// One timeframe's read of its chart. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeframeAnalysis {
    pub interval: String,
    /// 0 is the highest timeframe
    pub position: usize,
    pub trend: Trend,
    pub trend_strength: TrendStrength,
    pub key_levels: KeyLevels,
    #[serde(rename = "alignsWithHigherTF")]
    pub aligns_with_higher_tf: bool,
    pub signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_zone: Option<EntryZone>,
    pub reasoning: String,
}

/// Append-only record of what the higher timeframes concluded
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CascadeContext {
    analyses: Vec<TimeframeAnalysis>,
}

impl CascadeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, analysis: TimeframeAnalysis) {
        self.analyses.push(analysis);
    }

    pub fn analyses(&self) -> &[TimeframeAnalysis] {
        &self.analyses
    }

    pub fn len(&self) -> usize {
        self.analyses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyses.is_empty()
    }

    pub fn into_analyses(self) -> Vec<TimeframeAnalysis> {
        self.analyses
    }

    /// Trend established by the timeframes so far.
    ///
    /// Majority of directional reads; a tie goes to the highest timeframe.
    /// `None` when nothing has been analyzed yet.
    pub fn dominant_trend(&self) -> Option<Trend> {
        let first = self.analyses.first()?;
        let bullish = self.analyses.iter().filter(|a| a.trend == Trend::Bullish).count();
        let bearish = self.analyses.iter().filter(|a| a.trend == Trend::Bearish).count();

        Some(match bullish.cmp(&bearish) {
            std::cmp::Ordering::Greater => Trend::Bullish,
            std::cmp::Ordering::Less => Trend::Bearish,
            std::cmp::Ordering::Equal if bullish == 0 => Trend::Neutral,
            std::cmp::Ordering::Equal => first.trend,
        })
    }
}

/// Cascade failures. Always abort-and-surface; partial chains are never returned.
#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("Cascade analysis needs at least 2 charts, got {provided}")]
    InsufficientCharts { provided: usize },

    #[error("No chart registry found for request {request_id}")]
    RegistryNotFound { request_id: String },

    #[error("Cascade aborted at position {position} ({interval}): {source}")]
    IncompleteCascade {
        position: usize,
        interval: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cascade deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },
}

/// Result type for cascade operations
pub type CascadeResult<T> = Result<T, CascadeError>;


#[cfg(test)]
mod tests {
    use super::fixtures::analysis;
    use super::*;

    #[test]
    fn test_dominant_trend() {
        let mut context = CascadeContext::new();
        assert_eq!(context.dominant_trend(), None);

        context.push(analysis(0, Trend::Bearish, true));
        context.push(analysis(1, Trend::Bullish, false));
        // tie goes to the highest timeframe
        assert_eq!(context.dominant_trend(), Some(Trend::Bearish));

        context.push(analysis(2, Trend::Bullish, true));
        assert_eq!(context.dominant_trend(), Some(Trend::Bullish));
    }

    #[test]
    fn test_all_neutral_context() {
        let mut context = CascadeContext::new();
        context.push(analysis(0, Trend::Neutral, true));
        assert_eq!(context.dominant_trend(), Some(Trend::Neutral));
    }

    #[test]
    fn test_timeframe_analysis_wire_names() {
        let json = serde_json::to_value(analysis(1, Trend::Bullish, true)).expect("serialize");
        assert_eq!(json["alignsWithHigherTF"], true);
        assert_eq!(json["trendStrength"], "strong");
        assert!(json.get("entryZone").is_none());
    }

    #[test]
    fn test_chart_info_roundtrip_with_role() {
        let json = r#"{
            "id": "abc",
            "role": "htf",
            "imageUrl": "https://x/y.png",
            "symbol": "NASDAQ:AAPL",
            "interval": "1D",
            "generatedAt": "2026-01-05T10:00:00Z"
        }"#;
        let chart: ChartInfo = serde_json::from_str(json).expect("deserialize");
        assert_eq!(chart.role, Some(ChartRole::Htf));
        assert!(chart.indicators.is_empty());
    }
}
