//! Per-provider rate limiting for outbound provider calls.
//!
//! [`RateLimiter::acquire`] blocks until at least the provider's minimum
//! interval has elapsed since that provider's previous `acquire` returned.
//! Each provider key has its own lock, so a slow provider never holds up
//! callers of another one.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use enricher_core::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(
//!     RateLimiter::new(Duration::from_millis(500))
//!         .with_interval("arxiv", Duration::from_secs(3)),
//! );
//!
//! // First call for a key proceeds immediately
//! limiter.acquire("arxiv").await;
//!
//! // Second call waits until 3 seconds have passed
//! limiter.acquire("arxiv").await;
//!
//! // Other keys are independent
//! limiter.acquire("crossref").await;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay per provider key (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value honoured (1 hour).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-provider minimum-interval gate.
///
/// Designed to be wrapped in `Arc` and shared by every worker of a run. Uses
/// `DashMap` for concurrent access to per-key state and a `tokio::sync::Mutex`
/// per key for the read-wait-update sequence.
#[derive(Debug)]
pub struct RateLimiter {
    /// Interval for keys without an explicit entry.
    default_interval: Duration,

    /// Explicit per-key intervals.
    intervals: HashMap<String, Duration>,

    /// Per-key state. Arc lets `acquire` clone the state out and release the
    /// `DashMap` shard lock before awaiting on the inner mutex.
    keys: DashMap<String, Arc<KeyState>>,
}

#[derive(Debug)]
struct KeyState {
    /// `None` until the first `acquire` for this key returns.
    last_call: Mutex<Option<Instant>>,

    /// Total time callers spent waiting on this key, in milliseconds.
    cumulative_delay_ms: AtomicU64,
}

impl KeyState {
    fn new() -> Self {
        Self {
            last_call: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a limiter applying `default_interval` to every key.
    #[must_use]
    #[instrument(skip_all, fields(default_interval_ms = default_interval.as_millis()))]
    pub fn new(default_interval: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            default_interval,
            intervals: HashMap::new(),
            keys: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Sets the minimum interval for one provider key.
    #[must_use]
    pub fn with_interval(mut self, key: impl Into<String>, interval: Duration) -> Self {
        self.intervals.insert(key.into(), interval);
        self
    }

    /// Returns the minimum interval applied to `key`.
    #[must_use]
    pub fn interval_for(&self, key: &str) -> Duration {
        self.intervals
            .get(key)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Returns the total time callers have waited on `key` so far.
    #[must_use]
    pub fn cumulative_delay(&self, key: &str) -> Duration {
        self.keys.get(key).map_or(Duration::ZERO, |state| {
            Duration::from_millis(state.cumulative_delay_ms.load(Ordering::SeqCst))
        })
    }

    /// Waits until `key` may be called again, then records the call time.
    ///
    /// The first call for a key returns immediately. Dropping the returned
    /// future while it waits (for example on cancellation) leaves the key's
    /// last-call time untouched.
    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str) {
        let interval = self.interval_for(key);
        if interval.is_zero() {
            return;
        }

        // Clone the Arc so the DashMap shard lock is released before awaiting
        let state = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(KeyState::new()))
            .clone();

        let mut last_call = state.last_call.lock().await;

        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                let delay = interval.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    key,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        key,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - consider fewer records or a lower concurrency"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        } else {
            debug!(key, "first call for provider - no delay");
        }

        *last_call = Some(Instant::now());
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and HTTP-dates (RFC 7231). Returns `None` for
/// unparseable or negative values; caps at one hour; dates in the past map
/// to zero.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use enricher_core::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .map_or(Duration::ZERO, |d| d.min(MAX_RETRY_AFTER)),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
