//! Caller-facing entry point tying orchestration and caching together.

use std::sync::Arc;
use tracing::info;

use ashare_common::Config;

use super::cache::{CacheStats, ResultCache};
use super::eastmoney::EastmoneyAdapter;
use super::normalizer::SchemaRegistry;
use super::orchestrator::{FetchOptions, FetchOrchestrator, FetchOutcome};
use super::provider::{EndpointAdapter, FetchError};
use super::router::{AdapterInfo, AdapterRouter};
use super::tushare::TushareAdapter;
use super::DataRequest;

/// Fetches market data through one adapter with a shared result cache.
pub struct MarketDataClient {
    orchestrator: FetchOrchestrator,
    options: FetchOptions,
    cache: ResultCache,
    providers: Vec<AdapterInfo>,
}

impl MarketDataClient {
    pub fn new(
        adapter: Arc<dyn EndpointAdapter>,
        options: FetchOptions,
        cache_capacity: usize,
    ) -> Self {
        let providers = vec![AdapterInfo {
            name: adapter.name().to_string(),
            priority: adapter.priority(),
            kinds: adapter.capabilities().kinds,
        }];

        Self {
            orchestrator: FetchOrchestrator::new(adapter),
            options,
            cache: ResultCache::new(cache_capacity),
            providers,
        }
    }

    /// Build a client from configuration, registering every enabled provider.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let router = Self::router_from_config(config);
        if router.is_empty() {
            return Err(FetchError::InvalidRequest("no data provider is enabled".into()));
        }

        let providers = router.adapters_info();
        info!(
            providers = ?providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            cache_capacity = config.data.cache_capacity,
            policy = %config.data.on_partial_failure,
            "Market data client ready"
        );

        Ok(Self {
            orchestrator: FetchOrchestrator::new(Arc::new(router)),
            options: FetchOptions::from(&config.data),
            cache: ResultCache::new(config.data.cache_capacity),
            providers,
        })
    }

    /// The adapter router configuration would produce.
    pub fn router_from_config(config: &Config) -> AdapterRouter {
        let mut router = AdapterRouter::new();

        if let Some(eastmoney) = EastmoneyAdapter::from_config(&config.providers.eastmoney) {
            router.register(Arc::new(eastmoney));
        }
        if let Some(tushare) = TushareAdapter::from_config(&config.providers.tushare) {
            router.register(Arc::new(tushare));
        }

        router
    }

    /// Replace the schema registry, e.g. to add aliases for a new provider.
    pub fn with_registry(mut self, registry: SchemaRegistry) -> Self {
        let adapter = self.orchestrator.adapter().clone();
        self.orchestrator = FetchOrchestrator::with_registry(adapter, Arc::new(registry));
        self.cache.clear();
        self
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    pub fn providers(&self) -> &[AdapterInfo] {
        &self.providers
    }

    /// Fetch one request, serving repeated closed-range requests from cache.
    pub async fn fetch(&self, request: &DataRequest) -> Result<FetchOutcome, FetchError> {
        self.cache
            .get_or_fetch(request, || self.orchestrator.run(request, &self.options))
            .await
    }

    /// Fetch several identifiers of one kind as a single multi-leg run.
    ///
    /// Batches are not cached; fetch requests one by one to reuse entries.
    pub async fn fetch_batch(&self, requests: &[DataRequest]) -> Result<FetchOutcome, FetchError> {
        self.orchestrator.run_batch(requests, &self.options).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn invalidate(&self, request: &DataRequest) -> bool {
        self.cache.invalidate(request)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataKind;

    #[test]
    fn test_from_config_registers_enabled_providers() {
        let mut config = Config::default();
        let client = MarketDataClient::from_config(&config).unwrap();
        let names: Vec<&str> = client.providers().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["eastmoney"]);

        config.providers.tushare.enabled = true;
        config.providers.tushare.token = Some("token".into());
        let client = MarketDataClient::from_config(&config).unwrap();
        assert_eq!(client.providers().len(), 2);
        assert_eq!(client.options().max_retries, config.data.max_retries);
    }

    #[test]
    fn test_from_config_without_providers() {
        let mut config = Config::default();
        config.providers.eastmoney.enabled = false;
        assert!(matches!(
            MarketDataClient::from_config(&config),
            Err(FetchError::InvalidRequest(_))
        ));

        // Enabled without a token is skipped
        config.providers.tushare.enabled = true;
        let router = MarketDataClient::router_from_config(&config);
        assert!(router.is_empty());
        assert!(!router.supports(DataKind::IndexBar));
    }
}
