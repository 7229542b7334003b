//! Network layer shared by every component.
//!
//! - [`ConnectionPool`] - the single process-wide HTTP client
//! - [`RateLimiter`] - per-source spacing of listing requests
//! - [`RetryPolicy`] - attempt budget and backoff for article fetches
//! - [`FetchError`] - structured network errors

pub mod constants;
mod error;
mod pool;
mod rate_limiter;
mod retry;

pub use error::FetchError;
pub use pool::{ConnectionPool, TextResponse};
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use retry::{DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error};
