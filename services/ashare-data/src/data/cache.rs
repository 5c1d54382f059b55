//! Result cache for completed fetches.
//!
//! Keys are exact [`DataRequest`]s; entries are evicted least-recently-used.
//! Only complete outcomes for ranges that ended before the current market
//! day are stored, so an entry never goes stale. Concurrent callers asking
//! for the same key share one upstream fetch, whatever its result; partial
//! and failed results reach the callers already queued but are not kept.

use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::orchestrator::FetchOutcome;
use super::provider::FetchError;
use super::{market_today, DataRequest, RequestRange};

type Slot = Arc<tokio::sync::Mutex<SlotState>>;

enum SlotState {
    /// No fetch has finished for this slot yet
    Pending,
    /// Complete outcome kept for later callers
    Retained(FetchOutcome),
    /// Result handed to callers that queued during the fetch; the slot is
    /// already out of the LRU
    Shared(Result<FetchOutcome, FetchError>),
}

/// LRU cache of fetch outcomes with per-key single flight.
pub struct ResultCache {
    /// `None` when caching is disabled
    slots: Option<Mutex<LruCache<DataRequest, Slot>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    /// A cache holding at most `capacity` entries. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.slots.is_some()
    }

    /// Whether a request's result may be kept, judged against `today`.
    ///
    /// Latest-N requests move with every session and are never kept; a range
    /// is kept only once it has fully closed.
    pub fn is_cacheable_on(request: &DataRequest, today: chrono::NaiveDate) -> bool {
        match request.range() {
            RequestRange::Between(range) => range.end() < today,
            RequestRange::Latest(_) => false,
        }
    }

    /// Return the cached outcome for `request`, or run `fetch` and keep its
    /// result when it is complete.
    ///
    /// Errors and partial outcomes are not kept. Callers that were already
    /// waiting on the same key receive them too, without fetching again.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        request: &DataRequest,
        fetch: F,
    ) -> Result<FetchOutcome, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchOutcome, FetchError>>,
    {
        let slots = match &self.slots {
            Some(slots) if Self::is_cacheable_on(request, market_today()) => slots,
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return fetch().await;
            }
        };

        let slot = {
            let mut cache = slots.lock().unwrap_or_else(|e| e.into_inner());
            match cache.get(request) {
                Some(slot) => slot.clone(),
                None => {
                    let slot: Slot = Arc::new(tokio::sync::Mutex::new(SlotState::Pending));
                    cache.put(request.clone(), slot.clone());
                    slot
                }
            }
        };

        // Holding the slot lock across the fetch makes other callers for the
        // same key wait for this result.
        let mut entry = slot.lock().await;
        match &*entry {
            SlotState::Retained(outcome) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(request = %request, "Cache hit");
                return Ok(served(outcome));
            }
            SlotState::Shared(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(request = %request, "Joined in-flight fetch");
                return result.as_ref().map(served).map_err(|e| e.clone());
            }
            SlotState::Pending => {}
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = fetch().await;

        match &result {
            Ok(outcome) if outcome.is_complete() => {
                *entry = SlotState::Retained(outcome.clone());
                debug!(request = %request, "Cached fetch outcome");
            }
            _ => {
                *entry = SlotState::Shared(result.clone());
                drop(entry);
                self.release(slots, request, &slot);
            }
        }

        result
    }

    /// Take a slot holding a transient result out of the LRU, so the next
    /// caller fetches afresh.
    fn release(
        &self,
        slots: &Mutex<LruCache<DataRequest, Slot>>,
        request: &DataRequest,
        slot: &Slot,
    ) {
        let mut cache = slots.lock().unwrap_or_else(|e| e.into_inner());
        if cache.peek(request).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            cache.pop(request);
        }
    }

    /// Remove one entry. Returns whether it was present.
    pub fn invalidate(&self, request: &DataRequest) -> bool {
        match &self.slots {
            Some(slots) => slots
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop(request)
                .is_some(),
            None => false,
        }
    }

    pub fn clear(&self) {
        if let Some(slots) = &self.slots {
            slots.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .slots
            .as_ref()
            .map(|slots| slots.lock().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0);

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
            capacity: self.capacity,
        }
    }
}

fn served(outcome: &FetchOutcome) -> FetchOutcome {
    let mut outcome = outcome.clone();
    outcome.from_cache = true;
    outcome
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    /// Lookups that went upstream, including uncacheable requests
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::orchestrator::PartialFailure;
    use crate::data::validator::ValidationReport;
    use crate::data::DataKind;
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn past_request(identifier: &str) -> DataRequest {
        DataRequest::between(DataKind::IndexBar, identifier, d(1, 1), d(1, 31)).unwrap()
    }

    fn outcome(complete: bool) -> FetchOutcome {
        let failures = if complete {
            Vec::new()
        } else {
            vec![PartialFailure {
                leg: 2,
                identifier: "000001".into(),
                range: RequestRange::Latest(1),
                reason: FetchError::UpstreamUnavailable("503".into()),
                attempts: 3,
            }]
        };
        FetchOutcome {
            report: ValidationReport::default(),
            failures,
            retries: 0,
            legs: 2,
            from_cache: false,
        }
    }

    #[test]
    fn test_cacheability() {
        let today = d(2, 1);
        assert!(ResultCache::is_cacheable_on(&past_request("000001"), today));

        let open = DataRequest::between(DataKind::IndexBar, "000001", d(1, 1), d(2, 1)).unwrap();
        assert!(!ResultCache::is_cacheable_on(&open, today));

        let latest = DataRequest::latest(DataKind::IndexBar, "000001", 5).unwrap();
        assert!(!ResultCache::is_cacheable_on(&latest, today));
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let cache = ResultCache::new(8);
        let calls = &AtomicU32::new(0);
        let request = past_request("000001");

        for _ in 0..2 {
            let result = cache
                .get_or_fetch(&request, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(outcome(true))
                })
                .await
                .unwrap();
            assert!(result.is_complete());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_partial_and_failed_results_are_not_kept() {
        let cache = ResultCache::new(8);
        let calls = &AtomicU32::new(0);
        let request = past_request("000001");

        let partial = cache
            .get_or_fetch(&request, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(outcome(false))
            })
            .await
            .unwrap();
        assert!(!partial.from_cache);

        let failed = cache
            .get_or_fetch(&request, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::UpstreamUnavailable("down".into()))
            })
            .await;
        assert!(failed.is_err());

        let fresh = cache
            .get_or_fetch(&request, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(outcome(true))
            })
            .await
            .unwrap();
        assert!(!fresh.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_fetches() {
        let cache = ResultCache::disabled();
        let calls = &AtomicU32::new(0);
        let request = past_request("000001");

        for _ in 0..3 {
            cache
                .get_or_fetch(&request, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(outcome(true))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!cache.is_enabled());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = ResultCache::new(1);
        let a = past_request("000001");
        let b = past_request("399001");

        cache.get_or_fetch(&a, || async { Ok(outcome(true)) }).await.unwrap();
        cache.get_or_fetch(&b, || async { Ok(outcome(true)) }).await.unwrap();

        let again = cache
            .get_or_fetch(&a, || async { Ok(outcome(true)) })
            .await
            .unwrap();
        assert!(!again.from_cache);
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = ResultCache::new(8);
        let calls = &AtomicU32::new(0);
        let request = past_request("000001");

        let fetch = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(outcome(true))
        };

        let (first, second) = tokio::join!(
            cache.get_or_fetch(&request, fetch),
            cache.get_or_fetch(&request, fetch)
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(first.unwrap().from_cache != second.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_queued_callers_share_partial_result_without_keeping_it() {
        let cache = ResultCache::new(8);
        let calls = &AtomicU32::new(0);
        let request = past_request("000001");

        let fetch = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(outcome(false))
        };

        let (first, second) = tokio::join!(
            cache.get_or_fetch(&request, fetch),
            cache.get_or_fetch(&request, fetch)
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(!first.is_complete());
        assert_eq!(first.failures, second.failures);
        assert_eq!(cache.stats().entries, 0);

        cache.get_or_fetch(&request, fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_queued_callers_share_error() {
        let cache = ResultCache::new(8);
        let calls = &AtomicU32::new(0);
        let request = past_request("000001");

        let fetch = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(FetchError::UpstreamUnavailable("down".into()))
        };

        let (first, second) = tokio::join!(
            cache.get_or_fetch(&request, fetch),
            cache.get_or_fetch(&request, fetch)
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.unwrap_err(), second.unwrap_err());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = ResultCache::new(8);
        let request = past_request("000001");
        cache
            .get_or_fetch(&request, || async { Ok(outcome(true)) })
            .await
            .unwrap();

        assert!(cache.invalidate(&request));
        assert!(!cache.invalidate(&request));

        cache
            .get_or_fetch(&request, || async { Ok(outcome(true)) })
            .await
            .unwrap();
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }
}
