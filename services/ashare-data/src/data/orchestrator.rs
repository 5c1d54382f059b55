//! Fetch orchestration: leg planning, retries and partial failure policy.
//!
//! The orchestrator is the only place that retries. A request is cut into
//! legs (one per identifier, and one per sub-range when a range exceeds the
//! adapter's span limit); each leg is fetched with its own retry budget,
//! then all successful legs are normalized in leg order and validated once.

use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use ashare_common::config::{DataConfig, PartialFailurePolicy};

use super::normalizer::SchemaRegistry;
use super::provider::{EndpointAdapter, FetchError};
use super::raw::RawTable;
use super::validator::{validate, ValidationReport};
use super::{DataRequest, RequestRange};

// ============================================================================
// Options
// ============================================================================

/// Exponential backoff with a fixed base: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl RetryBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// No waiting between attempts.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Per-run fetch options.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Retries per leg after the first attempt
    pub max_retries: u32,
    pub retry_backoff: RetryBackoff,
    pub timeout_per_call: Duration,
    pub on_partial_failure: PartialFailurePolicy,
    /// Legs in flight at once under best-effort
    pub concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&DataConfig::default())
    }
}

impl From<&DataConfig> for FetchOptions {
    fn from(config: &DataConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff: RetryBackoff::new(config.retry_backoff(), config.retry_backoff_max()),
            timeout_per_call: config.timeout_per_call(),
            on_partial_failure: config.on_partial_failure,
            concurrency: config.concurrency.max(1),
        }
    }
}

impl FetchOptions {
    pub fn with_policy(mut self, policy: PartialFailurePolicy) -> Self {
        self.on_partial_failure = policy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_call = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

// ============================================================================
// Legs & Outcomes
// ============================================================================

/// One independent upstream call of a run, numbered from 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub number: usize,
    pub request: DataRequest,
}

/// Split requests into legs honouring the adapter's span limits.
pub fn plan_legs(requests: &[DataRequest], adapter: &dyn EndpointAdapter) -> Vec<Leg> {
    let mut legs = Vec::new();

    for request in requests {
        let pieces = match (request.range(), adapter.max_span_days(request.kind())) {
            (RequestRange::Between(range), Some(span)) => range
                .split(span)
                .into_iter()
                .map(|piece| request.with_range(piece))
                .collect(),
            _ => vec![request.clone()],
        };

        for request in pieces {
            legs.push(Leg {
                number: legs.len() + 1,
                request,
            });
        }
    }

    legs
}

/// A leg that exhausted its attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialFailure {
    pub leg: usize,
    pub identifier: String,
    pub range: RequestRange,
    pub reason: FetchError,
    pub attempts: u32,
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "leg {} ({} {}) failed after {} attempt(s): {}",
            self.leg, self.identifier, self.range, self.attempts, self.reason
        )
    }
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub report: ValidationReport,
    /// In leg order
    pub failures: Vec<PartialFailure>,
    /// Retries issued across all legs
    pub retries: u32,
    /// Legs planned
    pub legs: usize,
    pub from_cache: bool,
}

impl FetchOutcome {
    /// True when every planned leg succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

enum LegResult {
    Fetched { table: RawTable, retries: u32 },
    Failed { failure: PartialFailure, retries: u32 },
    SchemaBroken(FetchError),
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs requests against one adapter.
pub struct FetchOrchestrator {
    adapter: Arc<dyn EndpointAdapter>,
    registry: Arc<SchemaRegistry>,
}

impl FetchOrchestrator {
    /// Orchestrator with the built-in schema registry.
    pub fn new(adapter: Arc<dyn EndpointAdapter>) -> Self {
        Self::with_registry(adapter, Arc::new(SchemaRegistry::builtin()))
    }

    pub fn with_registry(adapter: Arc<dyn EndpointAdapter>, registry: Arc<SchemaRegistry>) -> Self {
        Self { adapter, registry }
    }

    pub fn adapter(&self) -> &Arc<dyn EndpointAdapter> {
        &self.adapter
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Fetch one request.
    pub async fn run(
        &self,
        request: &DataRequest,
        options: &FetchOptions,
    ) -> Result<FetchOutcome, FetchError> {
        self.run_batch(std::slice::from_ref(request), options).await
    }

    /// Fetch a batch of requests of the same kind as one multi-leg run.
    ///
    /// Fails with `UpstreamSchemaChanged` as soon as any leg reports it, and
    /// with `UpstreamUnavailable` when every planned leg was attempted and
    /// failed. A fail-fast run that stops early reports its failed leg in
    /// `failures` instead.
    pub async fn run_batch(
        &self,
        requests: &[DataRequest],
        options: &FetchOptions,
    ) -> Result<FetchOutcome, FetchError> {
        let kind = match requests.first() {
            Some(first) => first.kind(),
            None => return Err(FetchError::InvalidRequest("empty batch".into())),
        };
        if let Some(other) = requests.iter().find(|r| r.kind() != kind) {
            return Err(FetchError::InvalidRequest(format!(
                "batch mixes {kind} with {}",
                other.kind()
            )));
        }

        let legs = plan_legs(requests, self.adapter.as_ref());
        debug!(
            kind = %kind,
            legs = legs.len(),
            policy = %options.on_partial_failure,
            "Planned fetch"
        );

        let mut tables = Vec::new();
        let mut failures = Vec::new();
        let mut retries = 0;

        match options.on_partial_failure {
            PartialFailurePolicy::BestEffort => {
                let mut results = stream::iter(&legs)
                    .map(|leg| self.fetch_leg(leg, options))
                    .buffered(options.concurrency.max(1));

                while let Some(result) = results.next().await {
                    match result {
                        LegResult::Fetched { table, retries: r } => {
                            retries += r;
                            tables.push(table);
                        }
                        LegResult::Failed { failure, retries: r } => {
                            retries += r;
                            failures.push(failure);
                        }
                        LegResult::SchemaBroken(e) => return Err(e),
                    }
                }
            }
            PartialFailurePolicy::FailFast => {
                for leg in &legs {
                    match self.fetch_leg(leg, options).await {
                        LegResult::Fetched { table, retries: r } => {
                            retries += r;
                            tables.push(table);
                        }
                        LegResult::Failed { failure, retries: r } => {
                            retries += r;
                            failures.push(failure);
                            break;
                        }
                        LegResult::SchemaBroken(e) => return Err(e),
                    }
                }
            }
        }

        if !failures.is_empty() && failures.len() == legs.len() {
            let summary: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
            warn!(kind = %kind, failed = failures.len(), "No leg succeeded");
            return Err(FetchError::UpstreamUnavailable(summary.join("; ")));
        }

        let report = self.merge(kind, &tables);
        info!(
            kind = %kind,
            legs = legs.len(),
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            failed_legs = failures.len(),
            retries,
            "Fetch completed"
        );

        Ok(FetchOutcome {
            report,
            failures,
            retries,
            legs: legs.len(),
            from_cache: false,
        })
    }

    /// Normalize tables in leg order and validate them as one sequence.
    fn merge(&self, kind: super::DataKind, tables: &[RawTable]) -> ValidationReport {
        let mut candidates = Vec::new();
        for table in tables {
            let offset = candidates.len();
            candidates.extend(self.registry.normalize(kind, table).into_iter().map(|mut c| {
                c.row_index += offset;
                c
            }));
        }
        validate(kind, candidates)
    }

    async fn fetch_leg(&self, leg: &Leg, options: &FetchOptions) -> LegResult {
        let kind = leg.request.kind();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let result =
                match tokio::time::timeout(options.timeout_per_call, self.adapter.fetch(&leg.request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::UpstreamUnavailable(format!(
                        "call timed out after {:?}",
                        options.timeout_per_call
                    ))),
                }
                .and_then(|table| {
                    self.registry.check(kind, &table)?;
                    Ok(table)
                });

            match result {
                Ok(table) => {
                    debug!(
                        leg = leg.number,
                        request = %leg.request,
                        rows = table.len(),
                        attempt,
                        "Leg fetched"
                    );
                    return LegResult::Fetched {
                        table,
                        retries: attempt - 1,
                    };
                }
                Err(e) if e.is_schema_change() => {
                    warn!(leg = leg.number, error = %e, "Upstream schema changed, aborting run");
                    return LegResult::SchemaBroken(e);
                }
                Err(e) if e.is_retryable() && attempt <= options.max_retries => {
                    let delay = options.retry_backoff.delay(attempt - 1);
                    warn!(
                        leg = leg.number,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Leg failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(leg = leg.number, attempts = attempt, error = %e, "Leg exhausted");
                    return LegResult::Failed {
                        failure: PartialFailure {
                            leg: leg.number,
                            identifier: leg.request.identifier().to_string(),
                            range: leg.request.range(),
                            reason: e,
                            attempts: attempt,
                        },
                        retries: attempt - 1,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::DataCapabilities;
    use crate::data::DataKind;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct SpanAdapter;

    #[async_trait]
    impl EndpointAdapter for SpanAdapter {
        fn name(&self) -> &str {
            "span"
        }

        fn capabilities(&self) -> DataCapabilities {
            DataCapabilities {
                kinds: vec![DataKind::IndexBar],
                max_span_days: vec![(DataKind::IndexBar, 10)],
                rate_limit_rpm: None,
            }
        }

        async fn fetch(&self, request: &DataRequest) -> Result<RawTable, FetchError> {
            Ok(RawTable::new("span", request.kind(), request.identifier(), Vec::new()))
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = RetryBackoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(500));
        assert_eq!(backoff.delay(40), Duration::from_millis(500));
        assert_eq!(RetryBackoff::none().delay(3), Duration::ZERO);
    }

    #[test]
    fn test_options_from_config() {
        let config = DataConfig {
            max_retries: 4,
            concurrency: 0,
            on_partial_failure: PartialFailurePolicy::FailFast,
            ..Default::default()
        };
        let options = FetchOptions::from(&config);
        assert_eq!(options.max_retries, 4);
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.timeout_per_call, Duration::from_secs(10));
        assert_eq!(options.retry_backoff.base, Duration::from_millis(500));
        assert_eq!(options.on_partial_failure, PartialFailurePolicy::FailFast);
    }

    #[test]
    fn test_plan_legs_splits_long_ranges() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let requests = vec![
            DataRequest::between(DataKind::IndexBar, "000001", d(1, 1), d(1, 25)).unwrap(),
            DataRequest::latest(DataKind::IndexBar, "399001", 30).unwrap(),
        ];

        let legs = plan_legs(&requests, &SpanAdapter);
        let numbers: Vec<usize> = legs.iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(legs[0].request.identifier(), "000001");
        assert_eq!(legs[2].request.range().to_string(), "2024-01-21..=2024-01-25");
        assert_eq!(legs[3].request.range(), RequestRange::Latest(30));
    }

    #[tokio::test]
    async fn test_mixed_kind_batch_rejected() {
        let orchestrator = FetchOrchestrator::new(Arc::new(SpanAdapter));
        let requests = vec![
            DataRequest::latest(DataKind::IndexBar, "000001", 5).unwrap(),
            DataRequest::latest(DataKind::Tick, "600519", 5).unwrap(),
        ];

        let err = orchestrator
            .run_batch(&requests, &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));

        let empty = orchestrator.run_batch(&[], &FetchOptions::default()).await;
        assert!(empty.is_err());
    }

    #[tokio::test]
    async fn test_empty_tables_give_empty_report() {
        let orchestrator = FetchOrchestrator::new(Arc::new(SpanAdapter));
        let request = DataRequest::latest(DataKind::IndexBar, "000001", 5).unwrap();
        let outcome = orchestrator
            .run(&request, &FetchOptions::default())
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.legs, 1);
        assert_eq!(outcome.report.total(), 0);
    }
}
