//! Retry policy for article fetches.
//!
//! A failed fetch is classified into a [`FailureType`]; the [`RetryPolicy`]
//! then decides whether another attempt is allowed and how long to back off.
//!
//! # Example
//!
//! ```
//! use harvester_core::net::{FetchError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = FetchError::timeout("https://example.com/story");
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("Not retrying: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::FetchError;

/// Default attempts per article (the initial attempt plus one retry).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;
const MAX_JITTER: Duration = Duration::from_millis(250);

/// Classification of fetch failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Timeout, connection refused, DNS failure, 5xx.
    Transient,

    /// 4xx (except 429), invalid URL, undecodable payload.
    Permanent,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

/// Decision on whether to retry a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Exponential backoff configuration.
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: true,
        }
    }

    /// Creates a policy with custom max attempts, using defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Zero backoff and no jitter; keeps retry tests fast and deterministic.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[must_use]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            delay: self.calculate_delay(attempt),
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter {
            let max = MAX_JITTER.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=max))
        } else {
            Duration::ZERO
        };

        Duration::from_millis(capped_ms as u64) + jitter
    }
}

/// Classifies a fetch error for retry purposes.
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::Network { .. } | FetchError::Timeout { .. } => FailureType::Transient,
        FetchError::HttpStatus { status: 429, .. } => FailureType::RateLimited,
        FetchError::HttpStatus { status, .. } if *status >= 500 => FailureType::Transient,
        FetchError::HttpStatus { .. }
        | FetchError::InvalidUrl { .. }
        | FetchError::Parse { .. }
        | FetchError::Io { .. } => FailureType::Permanent,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_allows_one_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 2);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_permanent_failures_never_retry() {
        let policy = RetryPolicy::with_max_attempts(5);
        assert!(matches!(
            policy.should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(300),
            2.0,
        );
        let RetryDecision::Retry { delay: first, .. } =
            policy.should_retry(FailureType::Transient, 1)
        else {
            panic!("expected retry");
        };
        let RetryDecision::Retry { delay: late, .. } =
            policy.should_retry(FailureType::Transient, 6)
        else {
            panic!("expected retry");
        };
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(100) + MAX_JITTER);
        assert!(late <= Duration::from_millis(300) + MAX_JITTER);
    }

    #[test]
    fn test_immediate_policy_has_zero_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(
            policy.should_retry(FailureType::RateLimited, 1),
            RetryDecision::Retry {
                delay: Duration::ZERO,
                attempt: 2
            }
        );
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_classify_error() {
        assert_eq!(
            classify_error(&FetchError::timeout("https://a.example")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&FetchError::http_status("https://a.example", 503, None)),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&FetchError::http_status("https://a.example", 429, None)),
            FailureType::RateLimited
        );
        assert_eq!(
            classify_error(&FetchError::http_status("https://a.example", 404, None)),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&FetchError::parse("https://a.example", "bad")),
            FailureType::Permanent
        );
    }
}
