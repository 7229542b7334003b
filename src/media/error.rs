//! Error types for media processing.
//!
//! A `MediaError` describes one asset; the pipeline collects them alongside
//! the assets that did succeed and never aborts the article.

use std::path::PathBuf;

use thiserror::Error;

use crate::net::FetchError;

/// Failure to store one media asset.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Size check or download failed.
    #[error("failed to download media {url}: {source}")]
    Download {
        /// Asset URL.
        url: String,
        /// Underlying fetch error.
        #[source]
        source: FetchError,
    },

    /// The asset is smaller than the configured minimum.
    #[error("media {url} is {bytes} bytes, below the minimum of {min_bytes}")]
    BelowMinimumSize {
        /// Asset URL.
        url: String,
        /// Observed size.
        bytes: u64,
        /// Configured minimum.
        min_bytes: u64,
    },

    /// The download was cancelled by a skip request.
    #[error("download of {url} was skipped")]
    Skipped {
        /// Asset URL.
        url: String,
    },

    /// Writing the asset to disk failed.
    #[error("IO error writing media to {path}: {source}")]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl MediaError {
    /// Creates a download error.
    pub fn download(url: impl Into<String>, source: FetchError) -> Self {
        Self::Download {
            url: url.into(),
            source,
        }
    }

    /// Creates a below-minimum-size error.
    pub fn below_minimum(url: impl Into<String>, bytes: u64, min_bytes: u64) -> Self {
        Self::BelowMinimumSize {
            url: url.into(),
            bytes,
            min_bytes,
        }
    }

    /// Creates a skipped error.
    pub fn skipped(url: impl Into<String>) -> Self {
        Self::Skipped { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// URL of the asset, when the error concerns a specific download.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Download { url, .. }
            | Self::BelowMinimumSize { url, .. }
            | Self::Skipped { url } => Some(url),
            Self::Io { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_minimum_display() {
        let error = MediaError::below_minimum("https://cdn.example/a.gif", 43, 1024);
        assert_eq!(
            error.to_string(),
            "media https://cdn.example/a.gif is 43 bytes, below the minimum of 1024"
        );
        assert_eq!(error.url(), Some("https://cdn.example/a.gif"));
    }

    #[test]
    fn test_io_has_no_url() {
        let error = MediaError::io("/tmp/x", std::io::Error::other("disk full"));
        assert!(error.url().is_none());
        assert!(error.to_string().contains("disk full"));
    }
}
