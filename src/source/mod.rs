//! Source plugins: descriptors, the registry, and runnable handlers.
//!
//! # Architecture
//!
//! - [`SourceDescriptor`] - structured record describing one remote source
//! - [`SourceHandler`] - async capability set every source implements
//! - [`DeclarativeHandler`] - handler driven entirely by a descriptor's selector chains
//! - [`HackerNewsHandler`] - compiled-in custom handler with discussion threads
//! - [`SourceFactory`] - pure mapping from descriptor to handler
//! - [`SourceRegistry`] - validated descriptor table with group expansion
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::net::ConnectionPool;
//! use harvester_core::source::build_default_source_registry;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ConnectionPool::with_defaults()?;
//! let registry = build_default_source_registry(pool);
//! for (id, descriptor) in registry.discover() {
//!     println!("{id}: {} ({})", descriptor.name, descriptor.category);
//! }
//! let handler = registry.create_handler("hackernews")?;
//! assert!(handler.descriptor().supports_comments);
//! # Ok(())
//! # }
//! ```

mod builtin;
mod declarative;
mod descriptor;
mod error;
mod factory;
mod hackernews;
mod registry;

pub use builtin::{build_default_source_registry, builtin_descriptors};
pub use declarative::DeclarativeHandler;
pub use descriptor::{
    ApiListing, DiscoveryMethod, HandlerKind, MediaRules, SelectorChains, SourceDescriptor,
};
pub use error::ConfigurationError;
pub use factory::{HandlerConstructor, SourceFactory};
pub use hackernews::{HACKERNEWS_HANDLER_ID, HackerNewsHandler};
pub use registry::SourceRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::net::FetchError;

/// A discovered article reference.
///
/// Created by pagination, consumed once per fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Owning source id.
    pub source_id: String,
    /// Canonical article URL.
    pub url: String,
    /// Title as shown on the listing (may be empty until extraction).
    pub title: String,
    /// Optional listing summary.
    pub summary: Option<String>,
    /// Discussion page, when it differs from the article URL.
    pub discussion_url: Option<String>,
    /// When pagination discovered the reference.
    pub discovered_at: DateTime<Utc>,
}

impl Article {
    /// Creates an article discovered now.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            url: url.into(),
            title: title.into(),
            summary: None,
            discussion_url: None,
            discovered_at: Utc::now(),
        }
    }

    /// Attaches a summary, ignoring blank text.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        let trimmed = summary.trim();
        self.summary = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Attaches a discussion page URL.
    #[must_use]
    pub fn with_discussion_url(mut self, url: impl Into<String>) -> Self {
        self.discussion_url = Some(url.into());
        self
    }

    /// URL whose thread `fetch_comments` should read.
    #[must_use]
    pub fn comments_url(&self) -> &str {
        self.discussion_url.as_deref().unwrap_or(&self.url)
    }
}

/// Raw page content handed to the extractor.
#[derive(Debug, Clone)]
pub struct RawContent {
    /// Final URL after redirects; relative references resolve against it.
    pub url: String,
    /// Content-Type, if known.
    pub content_type: Option<String>,
    /// Markup.
    pub body: String,
}

impl RawContent {
    /// Creates raw content from a URL and HTML body.
    #[must_use]
    pub fn html(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: Some("text/html".to_string()),
            body: body.into(),
        }
    }
}

/// One comment in a discussion thread, flattened in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Author handle.
    pub author: String,
    /// Comment text (plain text).
    pub text: String,
    /// Nesting depth, 0 for top-level replies.
    pub depth: usize,
    /// When the comment was posted, if known.
    pub posted_at: Option<DateTime<Utc>>,
}

/// Capability set every runnable source implements.
///
/// Discovery is paged: [`PaginationController`](crate::pagination::PaginationController)
/// calls [`discover_page`](Self::discover_page) until it has enough articles,
/// which is how a caller asks a source to "discover N articles".
///
/// # Object Safety
///
/// Uses `async_trait` so handlers can live behind `Arc<dyn SourceHandler>`.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    /// The descriptor this handler was created from.
    fn descriptor(&self) -> &SourceDescriptor;

    /// Source id (shorthand for `descriptor().id`).
    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Highest page this source can serve, if it is bounded (feeds have one).
    fn max_pages(&self) -> Option<u32> {
        None
    }

    /// Returns the article references on listing page `page` (1-indexed).
    ///
    /// An empty vector means the source has nothing more to offer.
    async fn discover_page(&self, page: u32) -> Result<Vec<Article>, FetchError>;

    /// Fetches one article's raw content.
    async fn fetch_content(&self, url: &str) -> Result<RawContent, FetchError>;

    /// Fetches the discussion thread for an article, if the source has one.
    async fn fetch_comments(&self, _url: &str) -> Result<Vec<Comment>, FetchError> {
        Ok(Vec::new())
    }
}
