//! Run coordination across sources.
//!
//! [`FetchOrchestrator::run`] expands the requested ids, discovers each
//! source's articles through the [`PaginationController`], and feeds every
//! article to a worker pool bounded by one semaphore shared by all sources.
//! Each worker fetches, extracts, embeds media and writes a bundle (see
//! [`output`]).
//!
//! # Cancellation
//!
//! The run-scoped flag returned by [`FetchOrchestrator::cancellation_flag`]
//! stops dispatch: articles not yet handed to a worker are reported as
//! skipped while in-flight workers drain and commit their bundles.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use harvester_core::HarvestConfig;
//! use harvester_core::net::ConnectionPool;
//! use harvester_core::orchestrator::FetchOrchestrator;
//! use harvester_core::source::build_default_source_registry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(build_default_source_registry(ConnectionPool::with_defaults()?));
//! let orchestrator = FetchOrchestrator::new(registry, &HarvestConfig::default())?;
//! let report = orchestrator.run(&["hackernews"], 5, Path::new("./out")).await?;
//! println!("{} saved, {} failed", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

pub mod output;
mod task;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use self::task::{WorkerContext, process_article};
use crate::config::HarvestConfig;
use crate::extract::ContentExtractor;
use crate::media::{MediaAsset, MediaPipeline};
use crate::monitor::{MonitorReport, PerformanceMonitor};
use crate::net::{RateLimiter, RetryPolicy};
use crate::pagination::{PaginationController, SourceExhausted};
use crate::source::{Article, ConfigurationError, SourceRegistry};

const MIN_CONCURRENCY: usize = 1;
const MAX_CONCURRENCY: usize = 64;

const REASON_CANCELLED: &str = "cancelled";
const REASON_SOURCE_SKIPPED: &str = "source skipped after consecutive failures";

/// Fatal errors that stop a run before any article is processed.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The output root cannot be created or read.
    #[error("cannot prepare output root {path}: {source}")]
    OutputRoot {
        /// Output root.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// A requested name is neither a source id nor a group.
    #[error("unknown source or group: {name}")]
    UnknownSource {
        /// The requested name.
        name: String,
    },

    /// Source configuration could not be resolved.
    #[error(transparent)]
    Configuration(ConfigurationError),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

impl From<ConfigurationError> for OrchestratorError {
    fn from(error: ConfigurationError) -> Self {
        match error {
            ConfigurationError::UnknownSource { name } => Self::UnknownSource { name },
            other => Self::Configuration(other),
        }
    }
}

/// Outcome of one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    /// Bundle written.
    Success,
    /// Not attempted (source skipped or run cancelled).
    Skipped,
    /// Fetch or extraction failed.
    Failed,
}

/// Per-article record, also written to the bundle as `result.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    /// The article, with title and summary filled in from the page when the
    /// listing had none.
    pub article: Article,
    /// Outcome.
    pub status: FetchStatus,
    /// Bundle directory, for successes.
    pub output_path: Option<PathBuf>,
    /// Stored media assets.
    pub media: Vec<MediaAsset>,
    /// Per-asset failures that did not fail the article.
    pub media_errors: Vec<String>,
    /// Number of discussion comments saved.
    pub comment_count: usize,
    /// Fetch attempts made.
    pub attempts: u32,
    /// Whether the article text came from the fallback scan.
    pub text_fallback_used: bool,
    /// Whether the fallback media scan ran.
    pub media_fallback_used: bool,
    /// Failure or skip reason.
    pub error: Option<String>,
}

impl FetchResult {
    fn base(article: Article, status: FetchStatus) -> Self {
        Self {
            article,
            status,
            output_path: None,
            media: Vec::new(),
            media_errors: Vec::new(),
            comment_count: 0,
            attempts: 0,
            text_fallback_used: false,
            media_fallback_used: false,
            error: None,
        }
    }

    /// A written bundle.
    #[must_use]
    pub fn success(article: Article, output_path: PathBuf, media: Vec<MediaAsset>) -> Self {
        Self {
            output_path: Some(output_path),
            media,
            ..Self::base(article, FetchStatus::Success)
        }
    }

    /// An article that was not attempted.
    #[must_use]
    pub fn skipped(article: Article, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::base(article, FetchStatus::Skipped)
        }
    }

    /// An article that failed after `attempts` fetch attempts.
    #[must_use]
    pub fn failed(article: Article, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            error: Some(error.into()),
            attempts,
            ..Self::base(article, FetchStatus::Failed)
        }
    }

    #[must_use]
    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub(crate) fn with_media_errors(mut self, errors: Vec<String>) -> Self {
        self.media_errors = errors;
        self
    }

    #[must_use]
    pub(crate) fn with_comment_count(mut self, count: usize) -> Self {
        self.comment_count = count;
        self
    }
}

/// How a source fared over the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    /// Discovery succeeded and its articles were processed.
    Completed,
    /// Skipped before discovery, or tripped during the run.
    Skipped,
    /// Discovery failed.
    Failed,
}

/// Per-source line of the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Source id.
    pub source_id: String,
    /// Outcome.
    pub status: SourceStatus,
    /// Articles requested.
    pub requested: usize,
    /// Articles discovered.
    pub discovered: usize,
    /// Bundles written.
    pub succeeded: usize,
    /// Articles failed.
    pub failed: usize,
    /// Articles not attempted.
    pub skipped: usize,
    /// Listing requests issued.
    pub pages_fetched: u32,
    /// Set when discovery delivered fewer articles than requested.
    pub exhausted: Option<SourceExhausted>,
    /// Skip or failure reason.
    pub reason: Option<String>,
}

impl SourceSummary {
    fn new(source_id: &str, status: SourceStatus, requested: usize) -> Self {
        Self {
            source_id: source_id.to_string(),
            status,
            requested,
            discovered: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            pages_fetched: 0,
            exhausted: None,
            reason: None,
        }
    }

    fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Failed outright, or skipped because of consecutive failures.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        match self.status {
            SourceStatus::Failed => true,
            SourceStatus::Skipped => self.reason.as_deref() == Some(REASON_SOURCE_SKIPPED),
            SourceStatus::Completed => false,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier, used as the metrics history key.
    pub run_id: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: DateTime<Utc>,
    /// Whether cancellation stopped dispatch.
    pub interrupted: bool,
    /// Per-article results, grouped by source in request order, each group
    /// in discovery order.
    pub results: Vec<FetchResult>,
    /// Per-source summaries in request order.
    pub sources: Vec<SourceSummary>,
    /// Monitor counters at the end of the run.
    pub metrics: MonitorReport,
}

impl RunReport {
    /// Articles saved.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(FetchStatus::Success)
    }

    /// Articles failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(FetchStatus::Failed)
    }

    /// Articles not attempted.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(FetchStatus::Skipped)
    }

    /// True when any article failed, or a source failed or was skipped after
    /// consecutive failures.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed() > 0 || self.sources.iter().any(SourceSummary::is_unhealthy)
    }

    /// Process exit code: 0 for a clean run, 2 for partial failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() { 2 } else { 0 }
    }

    fn count(&self, status: FetchStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

/// Coordinates discovery and the bounded worker pool.
#[derive(Debug)]
pub struct FetchOrchestrator {
    registry: Arc<SourceRegistry>,
    pagination: PaginationController,
    extractor: ContentExtractor,
    media: MediaPipeline,
    monitor: Arc<PerformanceMonitor>,
    retry_policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    cancel: Arc<AtomicBool>,
}

impl FetchOrchestrator {
    /// Creates an orchestrator from a registry and run configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConcurrency`] if the worker-pool
    /// size is outside `1..=64`.
    pub fn new(registry: Arc<SourceRegistry>, config: &HarvestConfig) -> Result<Self, OrchestratorError> {
        let concurrency = config.concurrency;
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(OrchestratorError::InvalidConcurrency { value: concurrency });
        }
        let limiter = if config.rate_limit {
            RateLimiter::new()
        } else {
            RateLimiter::disabled()
        };
        let pool = registry.factory().pool().clone();

        debug!(concurrency, page_cap = config.page_cap, "creating orchestrator");

        Ok(Self {
            pagination: PaginationController::new(config.page_cap, Arc::new(limiter)),
            extractor: ContentExtractor::new(config.extraction_thresholds()),
            media: MediaPipeline::new(pool, config.media_config()),
            monitor: Arc::new(PerformanceMonitor::new(config.failure_threshold)),
            retry_policy: config.retry_policy(),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            cancel: Arc::new(AtomicBool::new(false)),
            registry,
        })
    }

    /// Replaces the monitor, e.g. to share one across runs.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Uses an externally owned cancellation flag.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replaces the per-article retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// The run-scoped cancellation flag.
    #[must_use]
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Stops dispatch of new articles; in-flight work drains.
    pub fn cancel(&self) {
        info!("cancellation requested, draining in-flight work");
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// The monitor updated by this orchestrator.
    #[must_use]
    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// The media pipeline, for per-download skips.
    #[must_use]
    pub fn media(&self) -> &MediaPipeline {
        &self.media
    }

    /// Worker-pool size.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Fetches up to `count` articles from each requested source or group
    /// into `output_root`.
    ///
    /// Sources run concurrently and share the worker pool. Per-article and
    /// per-source failures are reported in the [`RunReport`], never as
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownSource`] for an unrecognised name
    /// and [`OrchestratorError::OutputRoot`] if the output root cannot be
    /// prepared. Nothing is fetched in either case.
    #[instrument(skip(self, source_ids), fields(output_root = %output_root.display()))]
    pub async fn run<S: AsRef<str>>(
        &self,
        source_ids: &[S],
        count: usize,
        output_root: &Path,
    ) -> Result<RunReport, OrchestratorError> {
        let ids = self.registry.expand(source_ids)?;
        output::prepare_root(output_root)
            .await
            .map_err(|source| OrchestratorError::OutputRoot {
                path: output_root.to_path_buf(),
                source,
            })?;

        let started_at = Utc::now();
        let run_id = started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string();
        info!(run_id, sources = ids.len(), count, concurrency = self.concurrency, "starting run");

        let ctx = Arc::new(WorkerContext {
            extractor: self.extractor.clone(),
            media: self.media.clone(),
            monitor: Arc::clone(&self.monitor),
            retry_policy: self.retry_policy.clone(),
            output_root: output_root.to_path_buf(),
        });

        let outcomes = join_all(
            ids.iter()
                .map(|id| self.run_source(id, count, Arc::clone(&ctx))),
        )
        .await;

        let mut results = Vec::new();
        let mut sources = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let (summary, source_results) = outcome?;
            sources.push(summary);
            results.extend(source_results);
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            interrupted: self.is_cancelled(),
            results,
            sources,
            metrics: self.monitor.report(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            interrupted = report.interrupted,
            "run complete"
        );
        Ok(report)
    }

    #[instrument(skip(self, ctx))]
    async fn run_source(
        &self,
        source_id: &str,
        count: usize,
        ctx: Arc<WorkerContext>,
    ) -> Result<(SourceSummary, Vec<FetchResult>), OrchestratorError> {
        if self.monitor.is_tripped(source_id) {
            info!(
                consecutive_failures = self.monitor.consecutive_failures(source_id),
                "source skipped before discovery"
            );
            let summary = SourceSummary::new(source_id, SourceStatus::Skipped, count)
                .with_reason(REASON_SOURCE_SKIPPED);
            return Ok((summary, Vec::new()));
        }
        if self.is_cancelled() {
            let summary = SourceSummary::new(source_id, SourceStatus::Skipped, count)
                .with_reason(REASON_CANCELLED);
            return Ok((summary, Vec::new()));
        }

        let handler = match self.registry.create_handler(source_id) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(error = %e, "cannot create handler");
                let summary = SourceSummary::new(source_id, SourceStatus::Failed, count)
                    .with_reason(e.to_string());
                return Ok((summary, Vec::new()));
            }
        };

        let started = Instant::now();
        let discovered = match self.pagination.collect(handler.as_ref(), count).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "discovery failed");
                self.monitor.record_attempt(source_id, false, started.elapsed());
                let summary = SourceSummary::new(source_id, SourceStatus::Failed, count)
                    .with_reason(e.to_string());
                return Ok((summary, Vec::new()));
            }
        };

        let mut summary = SourceSummary::new(source_id, SourceStatus::Completed, count);
        summary.discovered = discovered.articles.len();
        summary.pages_fetched = discovered.pages_fetched;
        summary.exhausted = discovered.exhausted;

        let mut handles = Vec::with_capacity(discovered.articles.len());
        let mut pending = discovered.articles.into_iter().enumerate();
        let mut stop_reason = None;
        for (index, article) in pending.by_ref() {
            // Checked after the permit: a cancel may land while waiting.
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| OrchestratorError::SemaphoreClosed)?;

            if self.is_cancelled() {
                stop_reason = Some(REASON_CANCELLED);
                handles.push(Dispatch::NotRun(FetchResult::skipped(article, REASON_CANCELLED)));
                break;
            }
            if self.monitor.is_tripped(source_id) {
                stop_reason = Some(REASON_SOURCE_SKIPPED);
                handles.push(Dispatch::NotRun(FetchResult::skipped(article, REASON_SOURCE_SKIPPED)));
                break;
            }

            debug!(index, url = %article.url, "dispatching article");
            let ctx = Arc::clone(&ctx);
            let handler = Arc::clone(&handler);
            let fallback = article.clone();
            handles.push(Dispatch::Spawned(
                tokio::spawn(async move {
                    let _permit = permit;
                    process_article(ctx, handler, index, article).await
                }),
                fallback,
            ));
        }
        if let Some(reason) = stop_reason {
            for (_, article) in pending {
                handles.push(Dispatch::NotRun(FetchResult::skipped(article, reason)));
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for dispatch in handles {
            let result = match dispatch {
                Dispatch::NotRun(result) => result,
                Dispatch::Spawned(handle, article) => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(url = %article.url, error = %e, "article task panicked");
                        FetchResult::failed(article, format!("worker task failed: {e}"), 0)
                    }
                },
            };
            match result.status {
                FetchStatus::Success => summary.succeeded += 1,
                FetchStatus::Failed => summary.failed += 1,
                FetchStatus::Skipped => summary.skipped += 1,
            }
            results.push(result);
        }

        if self.monitor.is_tripped(source_id) {
            summary.status = SourceStatus::Skipped;
            summary.reason = Some(REASON_SOURCE_SKIPPED.to_string());
        } else if stop_reason == Some(REASON_CANCELLED) {
            summary.reason = Some(REASON_CANCELLED.to_string());
        }
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "source finished"
        );
        Ok((summary, results))
    }
}

enum Dispatch {
    Spawned(tokio::task::JoinHandle<FetchResult>, Article),
    NotRun(FetchResult),
}
