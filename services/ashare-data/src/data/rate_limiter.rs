//! Token bucket rate limiter for upstream calls.
//!
//! Each adapter owns one limiter; every HTTP call takes a token first so the
//! provider's published per-minute quota is never exceeded.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket refilled continuously at `requests_per_minute / 60` per second.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    /// Burst size: one second worth of requests, at least 1
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_minute` calls.
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        let rpm = f64::from(requests_per_minute.max(1));
        let capacity = (rpm / 60.0).ceil().max(1.0);

        Self {
            name: name.into(),
            capacity,
            refill_per_sec: rpm / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token without waiting. Returns how long to wait when none is left.
    fn take(&self) -> Result<(), Duration> {
        let Ok(mut bucket) = self.bucket.lock() else {
            // A poisoned bucket only means another caller panicked mid-update.
            return Ok(());
        };

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    /// Try to acquire a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Acquire a token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            match self.take() {
                Ok(()) => return,
                Err(wait) => {
                    let wait = wait.clamp(Duration::from_millis(5), Duration::from_secs(1));
                    debug!(
                        limiter = %self.name,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited, waiting for token"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Tokens currently available (for diagnostics).
    pub fn available(&self) -> f64 {
        self.bucket.lock().map(|b| b.tokens).unwrap_or(0.0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_one_second_of_quota() {
        let limiter = RateLimiter::new("test", 120);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_low_quota_still_allows_one() {
        let limiter = RateLimiter::new("slow", 10);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new("fast", 6000); // 100/s
        while limiter.try_acquire() {}

        let acquired =
            tokio::time::timeout(Duration::from_secs(2), limiter.acquire()).await;
        assert!(acquired.is_ok());
        assert_eq!(limiter.name(), "fast");
    }
}
