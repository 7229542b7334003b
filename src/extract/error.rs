//! Error types for content extraction.

use thiserror::Error;

/// Neither the selector chain nor the fallback scan produced enough text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// Best effort stayed below the minimum text length.
    #[error("extracted {chars} characters from {url}, below the minimum of {min}")]
    BelowThreshold {
        /// Page URL.
        url: String,
        /// Characters of the best attempt.
        chars: usize,
        /// Required minimum.
        min: usize,
    },
}

impl ExtractionError {
    /// Creates a below-threshold error.
    pub fn below_threshold(url: impl Into<String>, chars: usize, min: usize) -> Self {
        Self::BelowThreshold {
            url: url.into(),
            chars,
            min,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_threshold_display() {
        let error = ExtractionError::below_threshold("https://n.example/a", 12, 200);
        let msg = error.to_string();
        assert!(msg.contains("12 characters"));
        assert!(msg.contains("minimum of 200"));
    }
}
