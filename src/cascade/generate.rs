use chrono::Utc;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{ChartInfo, ChartRegistryStore};
use crate::interval;
use crate::upstream::{ChartApiClient, ChartApiError, ChartApiResult, ChartRequest, ChartSpec};

/// Renders one chart per interval and registers them for a request.
///
/// Generation fans out concurrently; the token budget inside the client still
/// serializes admission.
pub struct ChartGenerator {
    client: Arc<ChartApiClient>,
    registries: Arc<ChartRegistryStore>,
}

impl ChartGenerator {
    pub fn new(client: Arc<ChartApiClient>, registries: Arc<ChartRegistryStore>) -> Self {
        Self { client, registries }
    }

    /// Render `intervals` for `symbol` and register them under `request_id`.
    ///
    /// Fails as a whole if any chart fails; charts rendered before the failure
    /// are not registered.
    pub async fn generate(
        &self,
        request_id: &str,
        symbol: &str,
        intervals: &[String],
        studies: &[String],
    ) -> ChartApiResult<Vec<ChartInfo>> {
        let mut seen = std::collections::HashSet::new();
        let intervals: Vec<String> = intervals
            .iter()
            .map(|i| interval::normalize(i))
            .filter(|i| seen.insert(i.clone()))
            .collect();

        info!(
            request_id,
            symbol,
            intervals = ?intervals,
            "Generating {} charts",
            intervals.len()
        );

        let charts = try_join_all(
            intervals
                .iter()
                .map(|interval| self.render_one(symbol, interval, studies)),
        )
        .await?;

        let registry = self.registries.create(request_id);
        for chart in &charts {
            registry.register(chart.clone());
        }

        Ok(charts)
    }

    async fn render_one(&self, symbol: &str, interval: &str, studies: &[String]) -> ChartApiResult<ChartInfo> {
        let spec = ChartSpec::new(symbol, interval).with_studies(studies.iter().cloned());
        let request = ChartRequest::AdvancedChart {
            spec: spec.clone(),
            storage: true,
        };

        let response = self.client.invoke(request.into()).await?;
        let image_url = response
            .stored_url()
            .ok_or_else(|| ChartApiError::parse_error("Storage endpoint returned no image URL"))?
            .to_string();

        Ok(ChartInfo {
            id: Uuid::new_v4().to_string(),
            role: None,
            image_url,
            symbol: spec.symbol,
            interval: spec.interval,
            indicators: spec.studies.into_iter().map(|s| s.name).collect(),
            generated_at: Utc::now(),
        })
    }
}
