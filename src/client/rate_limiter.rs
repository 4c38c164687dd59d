//! Pacing and adaptive backoff for the enrichment API.
//!
//! Epistemic foundation:
//! - K_i: Perplexity answers each request with rate limit headers
//! - K_i: 429 errors require exponential backoff
//! - I^R: Minimum spacing between calls is user-configurable
//! - I^B: Exact account limits unknowable until headers received

use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Longest backoff applied after repeated 429s.
const MAX_BACKOFF_SECS: f64 = 60.0;

/// Rate limit state for the single endpoint.
#[derive(Debug, Default)]
struct LimitState {
    /// When the previous request was sent
    last_request_at: Option<Instant>,
    /// Remaining requests in current interval
    remaining_requests: Option<u32>,
    /// When the request limit resets
    reset_requests_at: Option<Instant>,
    /// Consecutive 429 errors (for backoff)
    consecutive_429s: u32,
    /// Backoff until this time
    backoff_until: Option<Instant>,
}

impl LimitState {
    fn wait_time(&self, min_interval: Duration, now: Instant) -> Duration {
        let mut max_wait = Duration::ZERO;

        if let Some(last) = self.last_request_at {
            let next_allowed = last + min_interval;
            if next_allowed > now {
                max_wait = max_wait.max(next_allowed - now);
            }
        }

        if let Some(until) = self.backoff_until.filter(|&t| t > now) {
            max_wait = max_wait.max(until - now);
        }

        if self.remaining_requests == Some(0) {
            if let Some(reset_at) = self.reset_requests_at.filter(|&t| t > now) {
                max_wait = max_wait.max(reset_at - now);
            }
        }

        max_wait
    }

    fn record_429(&mut self, now: Instant) {
        self.consecutive_429s += 1;
        let backoff_secs = 2.0_f64.powi(self.consecutive_429s as i32).min(MAX_BACKOFF_SECS);
        self.backoff_until = Some(now + Duration::from_secs_f64(backoff_secs));
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs, "Rate limited (429), backing off"
        );
    }

    fn record_success(&mut self) {
        self.consecutive_429s = 0;
        self.backoff_until = None;
    }

    fn update_from_headers(&mut self, headers: &HeaderMap, now: Instant) {
        let header = |key: &str| headers.get(key)?.to_str().ok().map(str::to_string);

        if let Some(remaining) = header("x-ratelimit-remaining-requests") {
            self.remaining_requests = remaining.parse().ok();
        }
        if let Some(secs) =
            header("x-ratelimit-reset-requests").and_then(|s| s.parse::<f64>().ok())
        {
            if secs.is_finite() && secs >= 0.0 {
                self.reset_requests_at = Some(now + Duration::from_secs_f64(secs));
            }
        }
    }
}

/// Keeps calls to one API at least `min_interval` apart and backs off on 429s.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    state: Mutex<LimitState>,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(LimitState::default()),
            total_requests: AtomicU64::new(0),
            total_429s: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait if necessary before the next request, then reserve its slot.
    ///
    /// Returns the duration waited.
    pub async fn wait_if_needed(&self) -> Duration {
        let wait_time = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.wait_time(self.min_interval, Instant::now())
        };

        if wait_time > Duration::ZERO {
            debug!(wait_ms = wait_time.as_millis() as u64, "Waiting for rate limit");
            self.total_wait_ms
                .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait_time).await;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_request_at = Some(Instant::now());
        wait_time
    }

    /// Record a response status and its rate limit headers.
    pub fn record_request(&self, status: u16, headers: &HeaderMap) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.update_from_headers(headers, now);

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            state.record_429(now);
        } else if status < 400 {
            state.record_success();
        }
    }

    /// Get statistics.
    pub fn stats(&self) -> RateLimiterStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_429s = self.total_429s.load(Ordering::Relaxed);
        let total_wait_ms = self.total_wait_ms.load(Ordering::Relaxed);

        RateLimiterStats {
            total_requests,
            total_429s,
            total_wait_secs: total_wait_ms as f64 / 1000.0,
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[tokio::test]
    async fn test_first_request_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        assert_eq!(limiter.wait_if_needed().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_second_request_is_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        limiter.wait_if_needed().await;

        let start = Instant::now();
        let waited = limiter.wait_if_needed().await;
        assert!(waited > Duration::ZERO);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        for _ in 0..3 {
            assert_eq!(limiter.wait_if_needed().await, Duration::ZERO);
            limiter.record_request(200, &HeaderMap::new());
        }
        assert_eq!(limiter.stats().total_requests, 3);
    }

    #[test]
    fn test_429_backoff_grows_and_resets() {
        let mut state = LimitState::default();
        let now = Instant::now();

        state.record_429(now);
        assert_eq!(state.wait_time(Duration::ZERO, now), Duration::from_secs(2));
        state.record_429(now);
        assert_eq!(state.wait_time(Duration::ZERO, now), Duration::from_secs(4));

        state.record_success();
        assert_eq!(state.wait_time(Duration::ZERO, now), Duration::ZERO);
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut state = LimitState::default();
        let now = Instant::now();
        for _ in 0..10 {
            state.record_429(now);
        }
        assert_eq!(state.wait_time(Duration::ZERO, now), Duration::from_secs(60));
    }

    #[test]
    fn test_exhausted_quota_waits_for_reset() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset-requests", HeaderValue::from_static("3"));

        let mut state = LimitState::default();
        let now = Instant::now();
        state.update_from_headers(&headers, now);
        assert_eq!(state.wait_time(Duration::ZERO, now), Duration::from_secs(3));

        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("10"));
        state.update_from_headers(&headers, now);
        assert_eq!(state.wait_time(Duration::ZERO, now), Duration::ZERO);
    }

    #[test]
    fn test_stats_count_429s() {
        let limiter = RateLimiter::new(Duration::ZERO);
        limiter.record_request(429, &HeaderMap::new());
        limiter.record_request(200, &HeaderMap::new());

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_429s, 1);
    }
}
