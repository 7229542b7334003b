//! Listing-page walker that gathers article references up to a target count.
//!
//! Page 1 is requested immediately; each later page first waits out the
//! source's rate-limit interval through the shared [`RateLimiter`]. Walking
//! stops when the target is met, a page adds nothing new, the handler runs
//! out of pages, or the page cap is hit. Falling short is not an error: the
//! outcome carries a [`SourceExhausted`] note instead.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::net::{FetchError, RateLimiter, parse_retry_after};
use crate::source::{Article, SourceHandler};

/// Default hard cap on listing pages per source per run.
pub const DEFAULT_PAGE_CAP: u32 = 10;

/// Why a source delivered fewer articles than requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum ExhaustReason {
    /// The page cap was reached.
    PageCap,
    /// A page contributed no unseen articles.
    NoNewArticles,
    /// The handler has no further pages (feeds, unpaged listings).
    NoMorePages,
    /// A later page failed; earlier pages were kept.
    PageFailed {
        /// Error text.
        message: String,
    },
}

/// Shorter-than-requested pagination result. Reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceExhausted {
    /// Source id.
    pub source_id: String,
    /// Requested article count.
    pub requested: usize,
    /// Articles actually found.
    pub found: usize,
    /// Listing requests issued.
    pub pages_fetched: u32,
    /// Stop condition.
    #[serde(flatten)]
    pub reason: ExhaustReason,
}

impl fmt::Display for SourceExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: found {} of {} articles after {} page(s) (",
            self.source_id, self.found, self.requested, self.pages_fetched
        )?;
        match &self.reason {
            ExhaustReason::PageCap => write!(f, "page cap reached)"),
            ExhaustReason::NoNewArticles => write!(f, "no new articles)"),
            ExhaustReason::NoMorePages => write!(f, "no more pages)"),
            ExhaustReason::PageFailed { message } => write!(f, "page failed: {message})"),
        }
    }
}

/// Articles gathered for one source.
#[derive(Debug, Clone, Default)]
pub struct PaginationOutcome {
    /// At most the requested count, in discovery order.
    pub articles: Vec<Article>,
    /// Listing requests issued (including rate-limited retries).
    pub pages_fetched: u32,
    /// Set when fewer articles than requested were found.
    pub exhausted: Option<SourceExhausted>,
}

/// Walks listing pages of one source at a time.
#[derive(Debug, Clone)]
pub struct PaginationController {
    page_cap: u32,
    limiter: Arc<RateLimiter>,
}

impl PaginationController {
    /// Creates a controller with a page cap (at least 1) and a shared limiter.
    #[must_use]
    pub fn new(page_cap: u32, limiter: Arc<RateLimiter>) -> Self {
        Self {
            page_cap: page_cap.max(1),
            limiter,
        }
    }

    /// The page cap.
    #[must_use]
    pub fn page_cap(&self) -> u32 {
        self.page_cap
    }

    /// Collects up to `target` unique articles from `handler`.
    ///
    /// Issues at least one and at most `page_cap` listing requests. A 429
    /// with Retry-After defers the retry of the same page through the rate
    /// limiter; the retry counts as a request.
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] of the first page only; failures of later
    /// pages end the walk with an [`ExhaustReason::PageFailed`] note.
    #[instrument(skip(self, handler), fields(source_id = %handler.id()))]
    pub async fn collect(
        &self,
        handler: &dyn SourceHandler,
        target: usize,
    ) -> Result<PaginationOutcome, FetchError> {
        let source_id = handler.id().to_string();
        let interval = handler.descriptor().rate_limit_interval();
        let last_page = handler.max_pages().map_or(self.page_cap, |max| max.min(self.page_cap));

        let mut seen: HashSet<String> = HashSet::new();
        let mut articles: Vec<Article> = Vec::new();
        let mut requests: u32 = 0;
        let mut page: u32 = 1;

        let reason = loop {
            self.limiter.acquire(&source_id, interval).await;
            requests += 1;

            let discovered = match handler.discover_page(page).await {
                Ok(discovered) => discovered,
                Err(e) if requests < self.page_cap && is_rate_limited(&e) => {
                    let delay = e.retry_after().and_then(parse_retry_after).unwrap_or(interval);
                    warn!(page, delay_ms = delay.as_millis(), "listing rate limited, retrying page");
                    self.limiter.record_rate_limit(&source_id, delay).await;
                    continue;
                }
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    warn!(page, error = %e, "listing page failed, keeping earlier pages");
                    break Some(ExhaustReason::PageFailed {
                        message: e.to_string(),
                    });
                }
            };

            let before = articles.len();
            for article in discovered {
                if seen.insert(article.url.clone()) {
                    articles.push(article);
                }
            }
            let added = articles.len() - before;
            debug!(page, added, total = articles.len(), "listing page processed");

            if articles.len() >= target {
                break None;
            }
            if added == 0 {
                break Some(ExhaustReason::NoNewArticles);
            }
            if requests >= self.page_cap {
                break Some(ExhaustReason::PageCap);
            }
            if page >= last_page {
                break Some(if last_page < self.page_cap {
                    ExhaustReason::NoMorePages
                } else {
                    ExhaustReason::PageCap
                });
            }
            page += 1;
        };

        articles.truncate(target);
        let exhausted = reason.map(|reason| SourceExhausted {
            source_id: source_id.clone(),
            requested: target,
            found: articles.len(),
            pages_fetched: requests,
            reason,
        });
        if let Some(note) = &exhausted {
            info!(%note, "source exhausted before target");
        }

        Ok(PaginationOutcome {
            articles,
            pages_fetched: requests,
            exhausted,
        })
    }
}

fn is_rate_limited(error: &FetchError) -> bool {
    matches!(error, FetchError::HttpStatus { status: 429, .. })
}
