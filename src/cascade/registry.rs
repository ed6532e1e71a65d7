//! Request-scoped chart registries
//! Chart generation registers rendered charts under a request id; the cascade
//! engine resolves them from here

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use super::ChartInfo;

/// Charts collected for one request
pub trait ChartRegistry: Send + Sync {
    fn get_all_charts(&self) -> Vec<ChartInfo>;
}

/// Resolves a request id to its registry, if one exists
pub trait RegistryLookup: Send + Sync {
    fn get_registry(&self, request_id: &str) -> Option<Arc<dyn ChartRegistry>>;
}

#[derive(Debug)]
pub struct RequestChartRegistry {
    request_id: String,
    created_at: DateTime<Utc>,
    charts: RwLock<Vec<ChartInfo>>,
}

impl RequestChartRegistry {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            created_at: Utc::now(),
            charts: RwLock::new(Vec::new()),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Add a chart; a chart with the same id replaces the earlier one
    pub fn register(&self, chart: ChartInfo) {
        let mut charts = match self.charts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        charts.retain(|c| c.id != chart.id);
        charts.push(chart);
    }

    pub fn len(&self) -> usize {
        self.get_all_charts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChartRegistry for RequestChartRegistry {
    fn get_all_charts(&self) -> Vec<ChartInfo> {
        match self.charts.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Process-wide store of request registries
#[derive(Debug, Default)]
pub struct ChartRegistryStore {
    registries: DashMap<String, Arc<RequestChartRegistry>>,
}

impl ChartRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for `request_id`, created on first use
    pub fn create(&self, request_id: &str) -> Arc<RequestChartRegistry> {
        self.registries
            .entry(request_id.to_string())
            .or_insert_with(|| {
                debug!("Creating chart registry for request {}", request_id);
                Arc::new(RequestChartRegistry::new(request_id))
            })
            .clone()
    }

    pub fn remove(&self, request_id: &str) -> Option<Arc<RequestChartRegistry>> {
        self.registries.remove(request_id).map(|(_, registry)| registry)
    }

    /// Drop registries older than `max_age`; returns how many were removed
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.registries.len();
        self.registries.retain(|_, registry| registry.created_at() >= cutoff);
        let purged = before.saturating_sub(self.registries.len());
        if purged > 0 {
            info!("Purged {} stale chart registries", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

impl RegistryLookup for ChartRegistryStore {
    fn get_registry(&self, request_id: &str) -> Option<Arc<dyn ChartRegistry>> {
        self.registries
            .get(request_id)
            .map(|entry| Arc::clone(entry.value()) as Arc<dyn ChartRegistry>)
    }
}
