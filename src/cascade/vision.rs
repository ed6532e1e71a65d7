use anyhow::Result;
use async_trait::async_trait;

use super::{CascadeContext, TimeframeAnalysis};

/// Everything one cascade step hands to the vision model
#[derive(Debug, Clone, Copy)]
pub struct TimeframeRequest<'a> {
    pub image_url: &'a str,
    pub symbol: &'a str,
    pub interval: &'a str,
    pub position: usize,
    /// All analyses from higher timeframes, highest first
    pub prior_context: &'a CascadeContext,
    pub trading_rules: Option<&'a str>,
}

/// Hosted chart-reading capability. Has its own quota and retry behavior,
/// independent of the charting API budget.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze_timeframe(&self, request: TimeframeRequest<'_>) -> Result<TimeframeAnalysis>;
}
