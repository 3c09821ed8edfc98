//! Header-driven rate limiting
//!
//! Bybit reports the remaining request quota in `X-Bapi-Limit-Status` and
//! the window reset time (epoch ms) in `X-Bapi-Limit-Reset-Timestamp`. When
//! the remaining quota drops to the threshold, the next request waits until
//! the reset time.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

pub const HEADER_LIMIT_STATUS: &str = "x-bapi-limit-status";
pub const HEADER_LIMIT_RESET: &str = "x-bapi-limit-reset-timestamp";

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Pause when the remaining quota is at or below this
    pub min_remaining: u32,
    /// Upper bound on a single pause
    pub max_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_remaining: 2,
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_min_remaining(mut self, min_remaining: u32) -> Self {
        self.min_remaining = min_remaining;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Quota snapshot parsed from one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitStatus {
    pub remaining: u32,
    pub reset_at_ms: i64,
}

impl LimitStatus {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| headers.get(name)?.to_str().ok()?.trim().parse::<i64>().ok();
        let remaining = read(HEADER_LIMIT_STATUS)?;
        let reset_at_ms = read(HEADER_LIMIT_RESET)?;
        Some(Self {
            remaining: u32::try_from(remaining.max(0)).unwrap_or(u32::MAX),
            reset_at_ms,
        })
    }
}

/// Shared limiter; clones observe the same quota
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    blocked_until: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            blocked_until: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimiterConfig::default())
    }

    /// Wait out a pending pause, if any
    pub async fn acquire(&self) {
        let until = self.blocked_until.lock().await.take();
        if let Some(until) = until {
            tokio::time::sleep_until(until).await;
        }
    }

    /// Pause required by `status` observed at `now_ms`
    pub fn pause_for(&self, status: LimitStatus, now_ms: i64) -> Option<Duration> {
        if status.remaining > self.config.min_remaining {
            return None;
        }
        let wait_ms = (status.reset_at_ms - now_ms).max(0) as u64;
        Some(Duration::from_millis(wait_ms).min(self.config.max_wait))
    }

    /// Record the quota from a response's headers
    pub async fn observe(&self, headers: &HeaderMap) {
        let Some(status) = LimitStatus::from_headers(headers) else {
            return;
        };
        let now_ms = chrono::Utc::now().timestamp_millis();
        if let Some(wait) = self.pause_for(status, now_ms) {
            warn!(
                remaining = status.remaining,
                wait_ms = wait.as_millis() as u64,
                "Rate limit nearly exhausted, pausing until reset"
            );
            *self.blocked_until.lock().await = Some(Instant::now() + wait);
        }
    }

    pub async fn is_blocked(&self) -> bool {
        self.blocked_until.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(remaining: &str, reset: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(HEADER_LIMIT_STATUS, HeaderValue::from_str(remaining).unwrap());
        h.insert(HEADER_LIMIT_RESET, HeaderValue::from_str(reset).unwrap());
        h
    }

    #[test]
    fn test_parse_headers() {
        let status = LimitStatus::from_headers(&headers("7", "1700000000123")).unwrap();
        assert_eq!(status.remaining, 7);
        assert_eq!(status.reset_at_ms, 1_700_000_000_123);
        assert!(LimitStatus::from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_pause_only_near_exhaustion() {
        let limiter = RateLimiter::with_defaults();
        let status = |remaining| LimitStatus {
            remaining,
            reset_at_ms: 10_500,
        };
        assert_eq!(limiter.pause_for(status(3), 10_000), None);
        assert_eq!(
            limiter.pause_for(status(2), 10_000),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            limiter.pause_for(status(0), 11_000),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_pause_is_capped() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::default().with_max_wait(Duration::from_secs(1)),
        );
        let status = LimitStatus {
            remaining: 1,
            reset_at_ms: 60_000,
        };
        assert_eq!(limiter.pause_for(status, 0), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_observe_blocks_and_acquire_clears() {
        let limiter = RateLimiter::with_defaults();
        let clone = limiter.clone();
        let now = chrono::Utc::now().timestamp_millis();

        limiter.observe(&headers("1", &(now + 20).to_string())).await;
        assert!(clone.is_blocked().await);

        clone.acquire().await;
        assert!(!limiter.is_blocked().await);

        limiter.observe(&headers("50", &(now + 20).to_string())).await;
        assert!(!limiter.is_blocked().await);
    }
}
