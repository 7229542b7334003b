//! Error types for network operations.
//!
//! [`FetchError`] covers everything that can go wrong between issuing a
//! request through the [`ConnectionPool`](super::ConnectionPool) and holding
//! a decoded body: connect/read failures, timeouts, error statuses, and
//! payloads that cannot be decoded.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching a remote resource.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Response body could not be decoded (malformed feed, JSON, etc.)
    #[error("could not decode response from {url}: {message}")]
    Parse {
        /// The URL whose payload failed to decode.
        url: String,
        /// What went wrong.
        message: String,
    },

    /// File system error while streaming a body to disk.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error with an optional Retry-After header value.
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a payload decoding error.
    pub fn parse(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for connect/read failures that a second attempt may fix.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// Returns true when another attempt could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidUrl { .. } | Self::Parse { .. } | Self::Io { .. } => false,
        }
    }

    /// Returns the Retry-After header value carried by an HTTP status error.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_timeout_display() {
        let error = FetchError::timeout("https://example.com/story");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://example.com/story"));
    }

    #[test]
    fn test_fetch_error_http_status_display() {
        let error = FetchError::http_status("https://example.com/story", 503, None);
        let msg = error.to_string();
        assert!(msg.contains("503"), "Expected '503' in: {msg}");
        assert!(msg.contains("https://example.com/story"));
    }

    #[test]
    fn test_fetch_error_parse_display() {
        let error = FetchError::parse("https://example.com/feed", "missing <channel>");
        let msg = error.to_string();
        assert!(msg.contains("could not decode"));
        assert!(msg.contains("missing <channel>"));
    }

    #[test]
    fn test_connection_failure_classification() {
        assert!(FetchError::timeout("https://example.com").is_connection_failure());
        assert!(!FetchError::http_status("https://example.com", 404, None).is_connection_failure());
        assert!(!FetchError::invalid_url("nope").is_connection_failure());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(FetchError::http_status("https://example.com", 429, None).is_retryable());
        assert!(FetchError::http_status("https://example.com", 502, None).is_retryable());
        assert!(!FetchError::http_status("https://example.com", 403, None).is_retryable());
        assert!(!FetchError::parse("https://example.com", "bad").is_retryable());
    }

    #[test]
    fn test_retry_after_accessor() {
        let error = FetchError::http_status("https://example.com", 429, Some("7".to_string()));
        assert_eq!(error.retry_after(), Some("7"));
        assert_eq!(FetchError::timeout("https://example.com").retry_after(), None);
    }
}
