//! Priority routing across endpoint adapters.
//!
//! Each request goes to the highest-priority adapter that serves its kind.
//! There is no failover here: a failed call is reported as-is so the
//! orchestrator can apply its retry policy.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::provider::{DataCapabilities, EndpointAdapter, FetchError};
use super::raw::RawTable;
use super::{DataKind, DataRequest};

/// Registered adapter summary.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    pub name: String,
    pub priority: u8,
    pub kinds: Vec<DataKind>,
}

/// Dispatches requests to registered adapters by kind and priority.
#[derive(Default)]
pub struct AdapterRouter {
    /// Sorted by priority (lower = higher priority)
    adapters: Vec<Arc<dyn EndpointAdapter>>,
}

impl AdapterRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, keeping the list sorted by priority.
    pub fn register(&mut self, adapter: Arc<dyn EndpointAdapter>) {
        info!(
            provider = adapter.name(),
            priority = adapter.priority(),
            "Registered endpoint adapter"
        );
        self.adapters.push(adapter);
        // Stable sort keeps registration order among equal priorities
        self.adapters.sort_by_key(|a| a.priority());
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_adapter(mut self, adapter: Arc<dyn EndpointAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// The adapter that will serve `kind`.
    pub fn route(&self, kind: DataKind) -> Option<&Arc<dyn EndpointAdapter>> {
        self.adapters.iter().find(|a| a.supports(kind))
    }

    pub fn adapters_info(&self) -> Vec<AdapterInfo> {
        self.adapters
            .iter()
            .map(|a| AdapterInfo {
                name: a.name().to_string(),
                priority: a.priority(),
                kinds: a.capabilities().kinds,
            })
            .collect()
    }
}

#[async_trait]
impl EndpointAdapter for AdapterRouter {
    fn name(&self) -> &str {
        "router"
    }

    fn priority(&self) -> u8 {
        self.adapters.first().map(|a| a.priority()).unwrap_or(u8::MAX)
    }

    fn capabilities(&self) -> DataCapabilities {
        let mut kinds: Vec<DataKind> = DataKind::ALL
            .into_iter()
            .filter(|k| self.route(*k).is_some())
            .collect();
        kinds.sort();

        let max_span_days = kinds
            .iter()
            .filter_map(|k| self.max_span_days(*k).map(|days| (*k, days)))
            .collect();

        DataCapabilities {
            kinds,
            max_span_days,
            rate_limit_rpm: None,
        }
    }

    fn supports(&self, kind: DataKind) -> bool {
        self.route(kind).is_some()
    }

    fn max_span_days(&self, kind: DataKind) -> Option<u32> {
        self.route(kind).and_then(|a| a.max_span_days(kind))
    }

    async fn fetch(&self, request: &DataRequest) -> Result<RawTable, FetchError> {
        let adapter = self
            .route(request.kind())
            .ok_or(FetchError::Unsupported(request.kind()))?;

        debug!(provider = adapter.name(), request = %request, "Routing request");
        adapter.fetch(request).await
    }
}
