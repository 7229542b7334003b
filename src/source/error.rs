//! Error types for source descriptors and the registry.

use std::path::PathBuf;

use thiserror::Error;

/// A malformed or incomplete source descriptor.
///
/// Raised at registry-load time and isolated to the one descriptor: the
/// registry logs it and keeps registering the remaining sources.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A required field is missing or blank.
    #[error("source '{source_id}': missing required field '{field}'")]
    MissingField {
        /// Offending source id (or `<unnamed>` when the id itself is missing).
        source_id: String,
        /// Field name.
        field: &'static str,
    },

    /// The base URL (or page template) is not a well-formed http(s) URL.
    #[error("source '{source_id}': invalid URL '{url}'")]
    InvalidUrl {
        /// Offending source id.
        source_id: String,
        /// The rejected URL.
        url: String,
    },

    /// A selector chain the discovery method needs is empty.
    #[error("source '{source_id}': selector chain '{chain}' is empty")]
    EmptySelectorChain {
        /// Offending source id.
        source_id: String,
        /// Which chain.
        chain: &'static str,
    },

    /// A selector or pattern does not compile.
    #[error("source '{source_id}': invalid {kind} '{value}': {reason}")]
    InvalidSelector {
        /// Offending source id.
        source_id: String,
        /// "selector" or "pattern".
        kind: &'static str,
        /// The rejected selector text.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// Another descriptor already registered this id.
    #[error("source '{source_id}': duplicate id")]
    DuplicateId {
        /// The duplicated id.
        source_id: String,
    },

    /// The descriptor names a custom handler that is not compiled in.
    #[error("source '{source_id}': unknown custom handler '{handler}'")]
    UnknownCustomHandler {
        /// Offending source id.
        source_id: String,
        /// The handler id that has no constructor.
        handler: String,
    },

    /// A requested source id or group name is not registered.
    #[error("unknown source or group '{name}'")]
    UnknownSource {
        /// The requested name.
        name: String,
    },

    /// A descriptor file is not valid JSON for the descriptor schema.
    #[error("descriptor file {path}: {message}")]
    Parse {
        /// Path of the descriptor file.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// A descriptor file or directory could not be read.
    #[error("descriptor path {path}: {message}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// IO error message.
        message: String,
    },
}

impl ConfigurationError {
    /// Creates a missing-field error.
    pub fn missing_field(source_id: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            source_id: source_id.into(),
            field,
        }
    }

    /// Creates an invalid-URL error.
    pub fn invalid_url(source_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::InvalidUrl {
            source_id: source_id.into(),
            url: url.into(),
        }
    }

    /// Creates an empty-chain error.
    pub fn empty_chain(source_id: impl Into<String>, chain: &'static str) -> Self {
        Self::EmptySelectorChain {
            source_id: source_id.into(),
            chain,
        }
    }

    /// Creates an invalid selector error.
    pub fn invalid_selector(
        source_id: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSelector {
            source_id: source_id.into(),
            kind: "selector",
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid regex pattern error.
    pub fn invalid_pattern(
        source_id: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSelector {
            source_id: source_id.into(),
            kind: "pattern",
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates a duplicate id error.
    pub fn duplicate_id(source_id: impl Into<String>) -> Self {
        Self::DuplicateId {
            source_id: source_id.into(),
        }
    }

    /// Creates an unknown custom handler error.
    pub fn unknown_handler(source_id: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::UnknownCustomHandler {
            source_id: source_id.into(),
            handler: handler.into(),
        }
    }

    /// Creates an unknown source error.
    pub fn unknown_source(name: impl Into<String>) -> Self {
        Self::UnknownSource { name: name.into() }
    }

    /// Creates a descriptor file parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a descriptor IO error.
    pub fn io(path: impl Into<PathBuf>, source: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }
}
