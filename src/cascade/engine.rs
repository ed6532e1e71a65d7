//! Cascade analysis engine
//! Orders charts from the highest to the lowest timeframe and runs the vision
//! analysis strictly in sequence, feeding each step every conclusion above it

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::{
    synthesis, CascadeContext, CascadeError, CascadeResult, ChartInfo, RegistryLookup, SynthesisResult,
    TimeframeAnalysis, TimeframeRequest, VisionAnalyzer,
};
use crate::config::CascadeConfig;
use crate::interval;

pub const MIN_CHARTS: usize = 2;

/// How charts were mapped to cascade positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderingMode {
    /// Sorted by interval duration, longest first
    Sorted,
    /// Fixed htf/etf/ltf role tags mapped to positions 0/1/2
    LegacyRoles,
}

#[derive(Debug, Clone, Default)]
pub struct CascadeOptions {
    pub trading_rules: Option<String>,
    /// Always sort by duration, even when legacy role tags are present
    pub flexible: bool,
    /// Overrides the configured deadline for this run
    pub deadline: Option<Duration>,
    /// Overrides the symbol taken from the highest-timeframe chart
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub symbol: String,
    pub mode: OrderingMode,
    pub timeframe_analyses: Vec<TimeframeAnalysis>,
    pub synthesis: SynthesisResult,
    pub elapsed_ms: u64,
}

pub struct CascadeEngine {
    analyzer: Arc<dyn VisionAnalyzer>,
    registries: Option<Arc<dyn RegistryLookup>>,
    config: CascadeConfig,
}

impl CascadeEngine {
    pub fn new(analyzer: Arc<dyn VisionAnalyzer>, config: CascadeConfig) -> Self {
        Self {
            analyzer,
            registries: None,
            config,
        }
    }

    /// Attach the registry lookup used by `analyze_request`
    pub fn with_registries(mut self, registries: Arc<dyn RegistryLookup>) -> Self {
        self.registries = Some(registries);
        self
    }

    /// Run the cascade over charts supplied directly
    pub async fn analyze(&self, charts: Vec<ChartInfo>, options: &CascadeOptions) -> CascadeResult<CascadeOutcome> {
        self.run(charts, options, None).await
    }

    /// Run the cascade over the charts registered for `request_id`
    pub async fn analyze_request(&self, request_id: &str, options: &CascadeOptions) -> CascadeResult<CascadeOutcome> {
        let registry = self
            .registries
            .as_ref()
            .and_then(|lookup| lookup.get_registry(request_id))
            .ok_or_else(|| CascadeError::RegistryNotFound {
                request_id: request_id.to_string(),
            })?;

        self.run(registry.get_all_charts(), options, Some(request_id.to_string()))
            .await
    }

    async fn run(
        &self,
        charts: Vec<ChartInfo>,
        options: &CascadeOptions,
        request_id: Option<String>,
    ) -> CascadeResult<CascadeOutcome> {
        if charts.len() < MIN_CHARTS {
            return Err(CascadeError::InsufficientCharts { provided: charts.len() });
        }

        let started = Instant::now();
        let mode = ordering_mode(&charts, options.flexible);
        let ordered = order_charts(&charts, mode);

        let symbol = options
            .symbol
            .clone()
            .unwrap_or_else(|| ordered[0].symbol.clone());
        let rules = options
            .trading_rules
            .as_deref()
            .map(|r| super::prompts::sanitize_rules(r, self.config.max_rules_chars))
            .filter(|r| !r.is_empty());

        info!(
            symbol = %symbol,
            mode = ?mode,
            order = ?ordered.iter().map(|c| c.interval.as_str()).collect::<Vec<_>>(),
            "Starting cascade analysis over {} timeframes",
            ordered.len()
        );

        let deadline = options.deadline.unwrap_or_else(|| self.config.deadline());
        let context = tokio::time::timeout(deadline, self.run_steps(&ordered, &symbol, rules.as_deref()))
            .await
            .map_err(|_| {
                error!("Cascade for {} exceeded its {:?} deadline", symbol, deadline);
                CascadeError::DeadlineExceeded {
                    deadline_ms: deadline.as_millis() as u64,
                }
            })??;

        let timeframe_analyses = context.into_analyses();
        let synthesis = synthesis::synthesize(&timeframe_analyses).ok_or(CascadeError::InsufficientCharts {
            provided: timeframe_analyses.len(),
        })?;

        Ok(CascadeOutcome {
            request_id,
            symbol,
            mode,
            timeframe_analyses,
            synthesis,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// One vision call per timeframe, strictly sequential: step k+1 needs step k's output
    async fn run_steps(
        &self,
        ordered: &[ChartInfo],
        symbol: &str,
        rules: Option<&str>,
    ) -> CascadeResult<CascadeContext> {
        let mut context = CascadeContext::new();

        for (position, chart) in ordered.iter().enumerate() {
            info!(position, interval = %chart.interval, prior = context.len(), "Analyzing timeframe");

            let request = TimeframeRequest {
                image_url: &chart.image_url,
                symbol,
                interval: &chart.interval,
                position,
                prior_context: &context,
                trading_rules: rules,
            };

            let mut analysis = self.analyzer.analyze_timeframe(request).await.map_err(|source| {
                error!(position, interval = %chart.interval, "Timeframe analysis failed: {:#}", source);
                CascadeError::IncompleteCascade {
                    position,
                    interval: chart.interval.clone(),
                    source,
                }
            })?;

            // Position and interval are owned by the cascade, not the model
            analysis.position = position;
            analysis.interval = chart.interval.clone();
            if position == 0 {
                analysis.aligns_with_higher_tf = true;
            }

            info!(
                position,
                interval = %analysis.interval,
                trend = %analysis.trend,
                aligned = analysis.aligns_with_higher_tf,
                "Timeframe analysis complete"
            );
            context.push(analysis);
        }

        Ok(context)
    }
}

/// Legacy ordering applies only to exactly three charts carrying distinct
/// htf/etf/ltf roles, and only when flexible mode is off
pub fn ordering_mode(charts: &[ChartInfo], flexible: bool) -> OrderingMode {
    if flexible || charts.len() != 3 {
        return OrderingMode::Sorted;
    }

    let roles: Option<HashSet<_>> = charts.iter().map(|c| c.role).collect();
    match roles {
        Some(roles) if roles.len() == 3 => OrderingMode::LegacyRoles,
        Some(_) => {
            warn!("Charts carry duplicate roles; falling back to duration ordering");
            OrderingMode::Sorted
        }
        None => OrderingMode::Sorted,
    }
}

/// Order charts highest timeframe first under the given mode
pub fn order_charts(charts: &[ChartInfo], mode: OrderingMode) -> Vec<ChartInfo> {
    match mode {
        OrderingMode::Sorted => interval::sort_descending(charts),
        OrderingMode::LegacyRoles => {
            let mut ordered = charts.to_vec();
            ordered.sort_by_key(|c| c.role.map(|r| r.position()).unwrap_or(usize::MAX));
            ordered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::fixtures::chart;
    use crate::cascade::ChartRole;

    fn with_role(interval: &str, role: ChartRole) -> ChartInfo {
        let mut c = chart(interval);
        c.role = Some(role);
        c
    }

    #[test]
    fn test_sorted_mode_orders_by_duration() {
        let charts = vec![chart("15m"), chart("1D"), chart("4h")];
        let mode = ordering_mode(&charts, false);
        assert_eq!(mode, OrderingMode::Sorted);

        let ordered: Vec<_> = order_charts(&charts, mode).into_iter().map(|c| c.interval).collect();
        assert_eq!(ordered, vec!["1D", "4h", "15m"]);
    }

    #[test]
    fn test_legacy_roles_skip_sorting() {
        // roles deliberately disagree with durations
        let charts = vec![
            with_role("1D", ChartRole::Ltf),
            with_role("15m", ChartRole::Htf),
            with_role("4h", ChartRole::Etf),
        ];
        let mode = ordering_mode(&charts, false);
        assert_eq!(mode, OrderingMode::LegacyRoles);

        let ordered: Vec<_> = order_charts(&charts, mode).into_iter().map(|c| c.interval).collect();
        assert_eq!(ordered, vec!["15m", "4h", "1D"]);
    }

    #[test]
    fn test_flexible_overrides_roles() {
        let charts = vec![
            with_role("15m", ChartRole::Htf),
            with_role("4h", ChartRole::Etf),
            with_role("1D", ChartRole::Ltf),
        ];
        assert_eq!(ordering_mode(&charts, true), OrderingMode::Sorted);
    }

    #[test]
    fn test_partial_or_duplicate_roles_fall_back_to_sorting() {
        let partial = vec![with_role("15m", ChartRole::Htf), chart("4h"), with_role("1D", ChartRole::Ltf)];
        assert_eq!(ordering_mode(&partial, false), OrderingMode::Sorted);

        let duplicate = vec![
            with_role("15m", ChartRole::Htf),
            with_role("4h", ChartRole::Htf),
            with_role("1D", ChartRole::Ltf),
        ];
        assert_eq!(ordering_mode(&duplicate, false), OrderingMode::Sorted);

        let four = vec![
            with_role("15m", ChartRole::Htf),
            with_role("4h", ChartRole::Etf),
            with_role("1D", ChartRole::Ltf),
            with_role("1W", ChartRole::Ltf),
        ];
        assert_eq!(ordering_mode(&four, false), OrderingMode::Sorted);
    }
}
