use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    retry_with_backoff, ChartApiError, ChartApiResult, ChartRequest, ChartResponse, ChartTransport,
    EndpointKind, HttpTransport, RequestDescriptor, ResponseCache, RetryPolicy, TokenBudget,
};
use crate::config::ChartApiConfig;

/// Per-endpoint timeouts and cache lifetimes
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub chart_timeout: Duration,
    pub reference_timeout: Duration,
    pub exchange_cache_ttl: Duration,
    pub symbol_cache_ttl: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            chart_timeout: Duration::from_secs(30),
            reference_timeout: Duration::from_secs(10),
            exchange_cache_ttl: Duration::from_secs(24 * 60 * 60),
            symbol_cache_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl ClientSettings {
    fn timeout_for(&self, kind: EndpointKind) -> Duration {
        match kind {
            EndpointKind::Chart => self.chart_timeout,
            EndpointKind::Reference => self.reference_timeout,
        }
    }

    fn ttl_for(&self, request: &ChartRequest) -> Duration {
        match request {
            ChartRequest::ExchangeList => self.exchange_cache_ttl,
            _ => self.symbol_cache_ttl,
        }
    }
}

/// Resilient client for the charting API.
///
/// Each call is served from cache when possible, otherwise admitted by the
/// token budget and retried with exponential backoff on retryable failures.
/// The budget is re-checked on every attempt.
pub struct ChartApiClient {
    transport: Arc<dyn ChartTransport>,
    budget: Arc<TokenBudget>,
    cache: ResponseCache<ChartResponse>,
    retry_policy: RetryPolicy,
    settings: ClientSettings,
}

impl ChartApiClient {
    pub fn new(
        transport: Arc<dyn ChartTransport>,
        budget: Arc<TokenBudget>,
        retry_policy: RetryPolicy,
        settings: ClientSettings,
    ) -> Self {
        Self {
            transport,
            budget,
            cache: ResponseCache::new(),
            retry_policy,
            settings,
        }
    }

    /// Create an HTTP-backed client from config::ChartApiConfig
    pub fn from_config(config: &ChartApiConfig) -> ChartApiResult<Self> {
        let transport = HttpTransport::new(&config.base_url, config.api_key.clone())?;
        let budget = TokenBudget::new(config.rate_limit());

        Ok(Self::new(
            Arc::new(transport),
            Arc::new(budget),
            config.retry_policy(),
            config.client_settings(),
        ))
    }

    pub fn budget(&self) -> &Arc<TokenBudget> {
        &self.budget
    }

    pub fn cache(&self) -> &ResponseCache<ChartResponse> {
        &self.cache
    }

    /// Execute one request against the upstream
    pub async fn invoke(&self, descriptor: RequestDescriptor) -> ChartApiResult<ChartResponse> {
        let RequestDescriptor { request, force_refresh } = descriptor;
        request.validate()?;

        let cache_key = request.cache_key();
        if let (Some(key), false) = (&cache_key, force_refresh) {
            if let Some(cached) = self.cache.get(key) {
                debug!("Chart API cache hit: {}", key);
                return Ok(cached);
            }
            debug!("Chart API cache miss: {}", key);
        }

        let timeout = self.settings.timeout_for(request.kind());
        let attempts = AtomicU32::new(0);

        let response = retry_with_backoff(
            || self.attempt(&request, timeout, &attempts),
            &self.retry_policy,
        )
        .await?;

        let retries = attempts.load(Ordering::SeqCst).saturating_sub(1);
        if retries > 0 {
            info!("Chart API call {} succeeded after {} retries", request.path(), retries);
        }

        if let Some(key) = cache_key {
            self.cache.set(key, response.clone(), self.settings.ttl_for(&request));
        }

        Ok(response)
    }

    /// `invoke` bounded by an overall deadline covering budget waits and retries
    pub async fn invoke_within(
        &self,
        descriptor: RequestDescriptor,
        deadline: Duration,
    ) -> ChartApiResult<ChartResponse> {
        tokio::time::timeout(deadline, self.invoke(descriptor))
            .await
            .map_err(|_| ChartApiError::DeadlineExceeded {
                deadline_ms: deadline.as_millis() as u64,
            })?
    }

    async fn attempt(
        &self,
        request: &ChartRequest,
        timeout: Duration,
        attempts: &AtomicU32,
    ) -> ChartApiResult<ChartResponse> {
        // Quota exhaustion surfaces from here and is never retried
        self.budget.admit().await?;

        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(attempt, path = %request.path(), "Calling chart API");

        match tokio::time::timeout(timeout, self.transport.send(request, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ChartApiError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
