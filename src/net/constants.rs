//! Constants for the network layer (timeouts, rate limiting).

use std::time::Duration;

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default HTTP read timeout (30 seconds). Media downloads share it.
pub const READ_TIMEOUT_SECS: u64 = 30;

/// Idle connections kept per host once the pool is warm.
pub const POOL_MAX_IDLE_PER_HOST: usize = 16;

/// How long an idle pooled connection is kept before being closed.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Warning threshold for cumulative rate limit delay per source (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
