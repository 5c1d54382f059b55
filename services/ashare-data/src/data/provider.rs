//! Endpoint adapter abstraction.
//!
//! Defines the `EndpointAdapter` trait every upstream source implements and
//! the error taxonomy adapters report. Adapters neither cache nor retry;
//! both concerns belong to the layers above.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::raw::RawTable;
use super::{DataKind, DataRequest};

// ============================================================================
// Adapter Capabilities
// ============================================================================

/// What an adapter can serve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataCapabilities {
    /// Supported data kinds
    pub kinds: Vec<DataKind>,
    /// Longest date range one call may cover, per kind. Missing = unlimited.
    pub max_span_days: Vec<(DataKind, u32)>,
    /// Rate limit (requests per minute)
    pub rate_limit_rpm: Option<u32>,
}

impl DataCapabilities {
    pub fn supports(&self, kind: DataKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Span limit for a kind, if any.
    pub fn span_limit(&self, kind: DataKind) -> Option<u32> {
        self.max_span_days
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, days)| *days)
    }
}

// ============================================================================
// Fetch Error
// ============================================================================

/// Errors raised while fetching from an upstream source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Transient: transport failure, timeout, 5xx, rate limiting
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Structural: the provider changed its output shape
    #[error("upstream schema changed ({provider}/{kind}): missing {}", .missing.join(", "))]
    UpstreamSchemaChanged {
        provider: String,
        kind: DataKind,
        missing: Vec<String>,
    },

    /// The request cannot be expressed for this source
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No registered source serves this kind
    #[error("unsupported data kind: {0}")]
    Unsupported(DataKind),
}

impl FetchError {
    /// Only transient failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }

    pub fn is_schema_change(&self) -> bool {
        matches!(self, Self::UpstreamSchemaChanged { .. })
    }

    pub(crate) fn schema_changed(provider: &str, kind: DataKind, missing: &[&str]) -> Self {
        Self::UpstreamSchemaChanged {
            provider: provider.to_string(),
            kind,
            missing: missing.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::UpstreamUnavailable(e.to_string())
    }
}

// ============================================================================
// Endpoint Adapter Trait
// ============================================================================

/// A single upstream data source.
///
/// Implementations translate a [`DataRequest`] into one provider call and
/// return the provider's table untouched.
#[async_trait]
pub trait EndpointAdapter: Send + Sync {
    /// Provider name (e.g., "eastmoney", "tushare")
    fn name(&self) -> &str;

    /// Priority (lower = higher priority)
    fn priority(&self) -> u8 {
        10
    }

    fn capabilities(&self) -> DataCapabilities;

    fn supports(&self, kind: DataKind) -> bool {
        self.capabilities().supports(kind)
    }

    /// Longest range one call may cover for `kind`.
    fn max_span_days(&self, kind: DataKind) -> Option<u32> {
        self.capabilities().span_limit(kind)
    }

    /// Perform one upstream call.
    async fn fetch(&self, request: &DataRequest) -> Result<RawTable, FetchError>;
}
