//! Per-source rate limiting for listing requests.
//!
//! This module provides the [`RateLimiter`] struct which enforces a minimum
//! interval between consecutive requests attributed to the same source.
//!
//! # Overview
//!
//! Each source owns one "last request time". It lives behind an async mutex
//! so concurrent pagination calls for one source queue up instead of
//! bursting. Different sources never wait on each other.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::net::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new();
//!
//! // First request for a source proceeds immediately
//! limiter.acquire("lite-cnn", Duration::from_secs(1)).await;
//!
//! // Second request for the same source waits out the interval
//! limiter.acquire("lite-cnn", Duration::from_secs(1)).await;
//!
//! // Another source is independent
//! limiter.acquire("npr-text", Duration::from_secs(1)).await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Per-source rate limiter.
///
/// Designed to be wrapped in `Arc` and shared across Tokio tasks. `DashMap`
/// holds per-source state; the state itself is cloned out as an `Arc` so the
/// map shard lock is never held across an await.
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// When set, no delays are applied (tests, `--no-rate-limit`).
    disabled: bool,

    sources: DashMap<String, Arc<SourceState>>,
}

#[derive(Debug)]
struct SourceState {
    /// Protected by an async mutex for atomic read-update across awaits.
    timing: Mutex<Timing>,

    /// Cumulative delay applied to this source (in milliseconds).
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct Timing {
    /// `None` until the first request (first request is immediate).
    last_request: Option<Instant>,
    /// Server-mandated earliest time for the next request (Retry-After).
    not_before: Option<Instant>,
}

impl SourceState {
    fn new() -> Self {
        Self {
            timing: Mutex::new(Timing::default()),
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
    /// Creates an enabled rate limiter with no sources tracked yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            disabled: true,
            sources: DashMap::new(),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn state(&self, source_id: &str) -> Arc<SourceState> {
        self.sources
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(SourceState::new()))
            .clone()
    }

    /// Waits until a request for `source_id` is allowed, then records it.
    ///
    /// The first request for a source proceeds immediately. Later requests
    /// wait until `interval` has elapsed since the previous one, or until a
    /// server-mandated Retry-After deadline, whichever is later.
    #[instrument(skip(self), fields(interval_ms = interval.as_millis()))]
    pub async fn acquire(&self, source_id: &str, interval: Duration) {
        if self.disabled {
            return;
        }

        let state = self.state(source_id);
        let mut timing = state.timing.lock().await;

        let now = Instant::now();
        let interval_deadline = timing.last_request.map(|last| last + interval);
        let deadline = match (interval_deadline, timing.not_before) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        match deadline {
            Some(deadline) if deadline > now => {
                let delay = deadline - now;
                let cumulative = state.add_cumulative_delay(delay);
                debug!(
                    source_id,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        source_id,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - consider requesting fewer items from this source"
                    );
                }
                tokio::time::sleep_until(deadline).await;
            }
            Some(_) => {}
            None => debug!(source_id, "first request for source - no delay"),
        }

        timing.last_request = Some(Instant::now());
        timing.not_before = None;
    }

    /// Records a server-mandated delay (Retry-After) for a source.
    ///
    /// The next [`acquire`](Self::acquire) for the source will not return
    /// before `delay` has elapsed from now.
    #[instrument(skip(self))]
    pub async fn record_rate_limit(&self, source_id: &str, delay: Duration) {
        let state = self.state(source_id);
        let cumulative = state.add_cumulative_delay(delay);
        let deadline = Instant::now() + delay.min(MAX_RETRY_AFTER);
        {
            let mut timing = state.timing.lock().await;
            timing.not_before = Some(timing.not_before.map_or(deadline, |d| d.max(deadline)));
        }
        debug!(
            source_id,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                source_id,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - source may be under heavy load"
            );
        }
    }

    /// Returns the total delay applied to a source so far.
    #[must_use]
    pub fn cumulative_delay(&self, source_id: &str) -> Duration {
        self.sources.get(source_id).map_or(Duration::ZERO, |s| {
            Duration::from_millis(s.cumulative_delay_ms.load(Ordering::SeqCst))
        })
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and HTTP-date (RFC 7231). Returns `None` if the
/// value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use harvester_core::net::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
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
