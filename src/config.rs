//! Run configuration.
//!
//! [`HarvestConfig`] gathers every tunable of a run. All fields default, so
//! a JSON file only needs the keys it changes:
//!
//! ```
//! use harvester_core::HarvestConfig;
//!
//! let config: HarvestConfig = serde_json::from_str(r#"{ "concurrency": 4 }"#).unwrap();
//! assert_eq!(config.concurrency, 4);
//! assert_eq!(config.page_cap, 10);
//! assert!(config.validate().is_ok());
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::ExtractionThresholds;
use crate::media::MediaConfig;
use crate::net::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::net::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use crate::{monitor, pagination};

/// Default worker-pool size.
pub const DEFAULT_CONCURRENCY: usize = 8;
const MAX_CONCURRENCY: usize = 64;
const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_PAGE_CAP: u32 = 100;

/// Errors loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for this schema.
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u64,
        /// Inclusive minimum.
        min: u64,
        /// Inclusive maximum.
        max: u64,
    },
}

/// Every tunable of a harvest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestConfig {
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Per-request read timeout in seconds.
    pub read_timeout_secs: u64,
    /// Worker-pool size shared by all sources.
    pub concurrency: usize,
    /// Listing pages per source per run.
    pub page_cap: u32,
    /// Consecutive failures that skip a source for the run.
    pub failure_threshold: u32,
    /// Fetch attempts per article (first try included).
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling, in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Minimum visible characters of an article body.
    pub min_text_chars: usize,
    /// Minimum characters of a fallback text block.
    pub min_block_chars: usize,
    /// Primary media candidates below which the fallback scan runs.
    pub min_media_candidates: usize,
    /// Minimum declared width/height of fallback images.
    pub min_pixel_dimension: u32,
    /// Maximum media assets per article.
    pub max_media_items: usize,
    /// Minimum media asset size in bytes.
    pub min_media_bytes: u64,
    /// Check media size with HEAD before downloading.
    pub check_media_size: bool,
    /// Download video, audio and documents too.
    pub include_non_image_media: bool,
    /// Apply per-source listing intervals.
    pub rate_limit: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        let thresholds = ExtractionThresholds::default();
        let media = MediaConfig::default();
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
            page_cap: pagination::DEFAULT_PAGE_CAP,
            failure_threshold: monitor::DEFAULT_FAILURE_THRESHOLD,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
            min_text_chars: thresholds.min_text_chars,
            min_block_chars: thresholds.min_block_chars,
            min_media_candidates: thresholds.min_media_candidates,
            min_pixel_dimension: thresholds.min_pixel_dimension,
            max_media_items: media.max_items,
            min_media_bytes: media.min_bytes,
            check_media_size: media.check_size,
            include_non_image_media: media.include_non_image,
            rate_limit: true,
        }
    }
}

fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

impl HarvestConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`]; the result is
    /// not validated.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::OutOfRange`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("concurrency", to_u64(self.concurrency), 1, to_u64(MAX_CONCURRENCY))?;
        check_range("connect_timeout_secs", self.connect_timeout_secs, 1, MAX_TIMEOUT_SECS)?;
        check_range("read_timeout_secs", self.read_timeout_secs, 1, MAX_TIMEOUT_SECS)?;
        check_range("page_cap", u64::from(self.page_cap), 1, u64::from(MAX_PAGE_CAP))?;
        check_range("failure_threshold", u64::from(self.failure_threshold), 1, u64::from(u32::MAX))?;
        check_range("max_attempts", u64::from(self.max_attempts), 1, 10)?;
        check_range(
            "retry_base_delay_ms",
            self.retry_base_delay_ms,
            0,
            self.retry_max_delay_ms,
        )?;
        check_range("max_media_items", to_u64(self.max_media_items), 0, 1000)?;
        Ok(())
    }

    /// Extraction thresholds.
    #[must_use]
    pub fn extraction_thresholds(&self) -> ExtractionThresholds {
        ExtractionThresholds {
            min_text_chars: self.min_text_chars,
            min_block_chars: self.min_block_chars,
            min_media_candidates: self.min_media_candidates,
            min_pixel_dimension: self.min_pixel_dimension,
        }
    }

    /// Media pipeline settings.
    #[must_use]
    pub fn media_config(&self) -> MediaConfig {
        MediaConfig {
            max_items: self.max_media_items,
            min_bytes: self.min_media_bytes,
            check_size: self.check_media_size,
            include_non_image: self.include_non_image_media,
        }
    }

    /// Per-article retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            2.0,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HarvestConfig::default();
        config.validate().unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.read_timeout_secs, 30);
        assert_eq!(config.retry_policy().max_attempts(), 2);
    }

    #[test]
    fn test_out_of_range_values() {
        let config = HarvestConfig {
            concurrency: 0,
            ..HarvestConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "concurrency must be between 1 and 64, got 0");

        let config = HarvestConfig {
            page_cap: 101,
            ..HarvestConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "page_cap", .. })
        ));

        let config = HarvestConfig {
            retry_base_delay_ms: 9_000,
            ..HarvestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.json");
        std::fs::write(&path, r#"{"page_cap": 3, "include_non_image_media": true}"#).unwrap();
        let config = HarvestConfig::from_json_file(&path).unwrap();
        assert_eq!(config.page_cap, 3);
        assert!(config.media_config().include_non_image);
        assert_eq!(config.min_text_chars, 200);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"concurency": 3}"#).unwrap();
        assert!(matches!(
            HarvestConfig::from_json_file(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            HarvestConfig::from_json_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
