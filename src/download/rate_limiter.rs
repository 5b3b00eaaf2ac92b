//! Process-wide courtesy rate limiting for remote requests.
//!
//! arXiv asks bulk clients to space *all* requests, so a single
//! [`RateLimiter`] is shared by every worker of a run (and by the harvest
//! loop). Requests are serialized through one slot: each caller waits until
//! `interval` has passed since the previous request started, and for any
//! server-mandated `Retry-After` pause.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mirror_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_secs(3)));
//!
//! // First request proceeds immediately.
//! limiter.acquire().await;
//! // Second waits ~3s, whichever task makes it.
//! Arc::clone(&limiter).acquire().await;
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// arXiv's published courtesy interval between requests.
pub const DEFAULT_RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(3);

/// Cumulative delay after which a warning is logged.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(300);

/// Maximum honoured Retry-After.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
struct Slot {
    /// Start of the previous request; `None` before the first.
    last_request: Option<Instant>,
    /// Earliest start allowed by a server `Retry-After`.
    not_before: Option<Instant>,
}

/// Global minimum-interval gate shared across tasks via `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    slot: Mutex<Slot>,
    cumulative_delay_ms: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_INTERVAL)
    }
}

impl RateLimiter {
    /// Creates a limiter spacing requests by `interval`. Zero disables spacing
    /// but still honours `Retry-After`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        debug!(interval_ms = interval.as_millis(), "creating rate limiter");
        Self {
            interval,
            slot: Mutex::new(Slot::default()),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Returns the configured interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Total time callers have spent waiting.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    /// Waits for the next request slot, then claims it.
    ///
    /// The slot lock is held across the sleep so concurrent callers queue in
    /// arrival order. Dropping the future releases the slot without claiming it.
    #[instrument(level = "debug", skip(self))]
    pub async fn acquire(&self) {
        let mut slot = self.slot.lock().await;

        let mut ready_at = slot.last_request.map(|last| last + self.interval);
        if let Some(not_before) = slot.not_before {
            ready_at = Some(ready_at.map_or(not_before, |at| at.max(not_before)));
        }

        if let Some(ready_at) = ready_at {
            let now = Instant::now();
            if ready_at > now {
                let delay = ready_at - now;
                self.record_delay(delay);
                debug!(delay_ms = delay.as_millis(), "applying rate limit delay");
                tokio::time::sleep_until(ready_at).await;
            }
        }

        slot.last_request = Some(Instant::now());
        slot.not_before = None;
    }

    /// Pushes the next slot back by a server-mandated `delay`.
    #[instrument(level = "debug", skip(self))]
    pub async fn record_rate_limit(&self, delay: Duration) {
        let until = Instant::now() + delay.min(MAX_RETRY_AFTER);
        let mut slot = self.slot.lock().await;
        slot.not_before = Some(slot.not_before.map_or(until, |current| current.max(until)));
        debug!(delay_ms = delay.as_millis(), "recorded server rate limit");
    }

    #[allow(clippy::cast_possible_truncation)]
    fn record_delay(&self, delay: Duration) {
        let delay_ms = delay.as_millis() as u64;
        let total = self.cumulative_delay_ms.fetch_add(delay_ms, Ordering::SeqCst) + delay_ms;
        let total = Duration::from_millis(total);
        if total >= CUMULATIVE_DELAY_WARNING_THRESHOLD
            && total.saturating_sub(Duration::from_millis(delay_ms))
                < CUMULATIVE_DELAY_WARNING_THRESHOLD
        {
            warn!(
                cumulative_delay_secs = total.as_secs(),
                "rate limiting has delayed this run by over five minutes"
            );
        }
    }
}

/// Parses a `Retry-After` header value (RFC 7231).
///
/// Accepts integer seconds or an HTTP-date. Negative or unparseable values
/// yield `None`; past dates yield zero; anything over one hour is capped.
///
/// ```
/// use std::time::Duration;
/// use mirror_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        let duration = Duration::from_secs(seconds);
        if duration > MAX_RETRY_AFTER {
            warn!(seconds, "Retry-After exceeds maximum, capping at 1 hour");
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        Err(_) => Some(Duration::ZERO),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_requests_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert!(limiter.cumulative_delay() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_tasks_share_one_budget() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(3)));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_four_workers_ten_requests_take_at_least_three_intervals() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(3)));
        let remaining = Arc::new(std::sync::atomic::AtomicUsize::new(10));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            let remaining = Arc::clone(&remaining);
            handles.push(tokio::spawn(async move {
                while remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    limiter.acquire().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // ceil(10 / 4) * 3s; the shared slot actually serializes all ten.
        assert!(start.elapsed() >= Duration::from_secs(9));
        assert!(start.elapsed() >= Duration::from_secs(27));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_pushes_next_slot() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.acquire().await;
        limiter.record_rate_limit(Duration::from_secs(10)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_does_not_wait() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("99999"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_dates() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        let future = std::time::SystemTime::now() + Duration::from_secs(120);
        let value = httpdate::fmt_http_date(future);
        let parsed = parse_retry_after(&value).unwrap();
        assert!(parsed <= Duration::from_secs(120));
        assert!(parsed >= Duration::from_secs(100));
        assert_eq!(parse_retry_after("not a date"), None);
    }
}
