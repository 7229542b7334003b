//! Harvester Core Library
//!
//! This library acquires articles, their media and discussion threads from
//! heterogeneous news sources and writes each article as a self-contained
//! bundle on disk.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`net`] - Shared HTTP connection pool, rate limiting and retry policy
//! - [`source`] - Source descriptors, handlers, factory and registry
//! - [`pagination`] - Multi-page article discovery
//! - [`extract`] - Content extraction with heuristic fallback
//! - [`media`] - Media filtering, download, deduplication and relinking
//! - [`orchestrator`] - Bounded worker pool running whole harvests
//! - [`monitor`] - Per-source metrics, the consecutive-failure skip and
//!   cross-run metrics history
//! - [`config`] - Run configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod extract;
pub mod media;
pub mod monitor;
pub mod net;
pub mod orchestrator;
pub mod pagination;
pub mod source;
mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, DEFAULT_CONCURRENCY, HarvestConfig};
pub use extract::{ContentExtractor, ExtractionError};
pub use media::{MediaAsset, MediaError, MediaPipeline};
pub use monitor::{HistoryError, MetricsHistory, PerformanceMonitor};
pub use net::{ConnectionPool, FetchError};
pub use orchestrator::{
    FetchOrchestrator, FetchResult, FetchStatus, OrchestratorError, RunReport, SourceStatus,
};
pub use pagination::{PaginationController, SourceExhausted};
pub use source::{
    Article, ConfigurationError, SourceDescriptor, SourceHandler, SourceRegistry,
    build_default_source_registry,
};
