//! Source descriptors: the structured record describing one remote source.
//!
//! Descriptors arrive either from the compiled-in table
//! ([`builtin_descriptors`](super::builtin_descriptors)) or from `*.json`
//! files. Every optional field has a serde default, so a file that omits a
//! required field still decodes and is then rejected by
//! [`SourceDescriptor::validate`] with a precise [`ConfigurationError`].

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::ConfigurationError;
use crate::media::SkipSelector;

const DEFAULT_CATEGORY: &str = "general";
const DEFAULT_RATE_LIMIT_MS: u64 = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const PAGE_PLACEHOLDER: &str = "{page}";

/// How a source's article references are discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMethod {
    /// HTML listing pages scraped with the article-link selector chain.
    #[default]
    ListingScrape,
    /// RSS 2.0 feed (single page).
    Feed,
    /// JSON listing endpoint.
    Api,
}

impl std::fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ListingScrape => "listing-scrape",
            Self::Feed => "feed",
            Self::Api => "api",
        };
        f.write_str(name)
    }
}

/// Which handler variant serves a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerKind {
    /// Driven entirely by the descriptor's selector chains.
    #[default]
    Declarative,
    /// Compiled-in handler looked up by id in the factory table.
    Custom {
        /// Handler id (e.g. `hackernews`).
        handler: String,
    },
}

/// Ordered selector chains. The first selector that yields a result wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorChains {
    /// Links to articles on a listing page.
    pub article_links: Vec<String>,
    /// Article body containers.
    pub content: Vec<String>,
    /// Media elements (or containers of media elements).
    pub media: Vec<String>,
}

/// Field mapping for the `api` discovery method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiListing {
    /// JSON pointer to the item array (empty = document root).
    pub items_pointer: String,
    /// Item field holding the article URL.
    pub url_field: String,
    /// Item field holding the title.
    pub title_field: String,
    /// Item field holding a summary, if the API has one.
    pub summary_field: Option<String>,
}

impl Default for ApiListing {
    fn default() -> Self {
        Self {
            items_pointer: String::new(),
            url_field: "url".to_string(),
            title_field: "title".to_string(),
            summary_field: None,
        }
    }
}

/// Media filtering rules applied by the media pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaRules {
    /// Regex allow-list over resolved media URLs. Empty accepts every http(s) URL.
    pub allow_patterns: Vec<String>,
    /// Containers whose media is dropped (`tag`, `.class`, `#id`, `tag.class`).
    pub skip_selectors: Vec<String>,
}

impl Default for MediaRules {
    fn default() -> Self {
        Self {
            allow_patterns: Vec::new(),
            skip_selectors: [
                "aside",
                "nav",
                "footer",
                ".related",
                ".related-articles",
                ".sidebar",
                ".navigation",
                ".recommended",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// Structured record describing how to discover and extract one source.
///
/// Immutable once registered; handlers hold their own clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDescriptor {
    /// Globally unique id within a registry.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Category; doubles as a named group.
    pub category: String,
    /// Listing / feed / API endpoint (page 1).
    pub base_url: String,
    /// Discovery method.
    pub discovery: DiscoveryMethod,
    /// URL for pages after the first; must contain `{page}`.
    pub page_url_template: Option<String>,
    /// Selector chains.
    pub selectors: SelectorChains,
    /// Field mapping for `api` discovery.
    pub api: Option<ApiListing>,
    /// Media filtering rules.
    pub media: MediaRules,
    /// Minimum spacing between listing requests, in milliseconds.
    pub rate_limit_ms: u64,
    /// Per-request timeout, in seconds.
    pub timeout_secs: u64,
    /// Whether the source exposes a discussion thread.
    pub supports_comments: bool,
    /// Handler variant.
    pub handler: HandlerKind,
}

impl Default for SourceDescriptor {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            category: DEFAULT_CATEGORY.to_string(),
            base_url: String::new(),
            discovery: DiscoveryMethod::default(),
            page_url_template: None,
            selectors: SelectorChains::default(),
            api: None,
            media: MediaRules::default(),
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            supports_comments: false,
            handler: HandlerKind::Declarative,
        }
    }
}

impl SourceDescriptor {
    /// Starts a declarative descriptor.
    #[must_use]
    pub fn declarative(
        id: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
        discovery: DiscoveryMethod,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_url: base_url.into(),
            discovery,
            ..Self::default()
        }
    }

    /// Starts a descriptor served by a compiled-in custom handler.
    #[must_use]
    pub fn custom(
        id: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
        handler: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_url: base_url.into(),
            discovery: DiscoveryMethod::Api,
            handler: HandlerKind::Custom {
                handler: handler.into(),
            },
            ..Self::default()
        }
    }

    /// Sets the category (group name).
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Sets the template for pages after the first.
    #[must_use]
    pub fn with_page_template(mut self, template: impl Into<String>) -> Self {
        self.page_url_template = Some(template.into());
        self
    }

    /// Sets the article-link selector chain.
    #[must_use]
    pub fn with_link_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors.article_links = selectors.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the content selector chain.
    #[must_use]
    pub fn with_content_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors.content = selectors.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the media selector chain.
    #[must_use]
    pub fn with_media_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors.media = selectors.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the API field mapping.
    #[must_use]
    pub fn with_api(mut self, api: ApiListing) -> Self {
        self.api = Some(api);
        self
    }

    /// Sets the listing rate-limit interval.
    #[must_use]
    pub fn with_rate_limit(mut self, interval: Duration) -> Self {
        self.rate_limit_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Marks the source as exposing a discussion thread.
    #[must_use]
    pub fn with_comments(mut self) -> Self {
        self.supports_comments = true;
        self
    }

    /// Minimum spacing between consecutive listing requests.
    #[must_use]
    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    /// Per-request timeout (at least one second).
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Returns the custom handler id, if this is a custom descriptor.
    #[must_use]
    pub fn custom_handler(&self) -> Option<&str> {
        match &self.handler {
            HandlerKind::Custom { handler } => Some(handler),
            HandlerKind::Declarative => None,
        }
    }

    /// URL of listing page `page` (1-indexed).
    ///
    /// Page 1 is the base URL. Later pages need a template; without one the
    /// source has a single page and `None` is returned.
    #[must_use]
    pub fn page_url(&self, page: u32) -> Option<String> {
        if page <= 1 {
            return Some(self.base_url.clone());
        }
        self.page_url_template
            .as_ref()
            .map(|template| template.replace(PAGE_PLACEHOLDER, &page.to_string()))
    }

    /// Loads one descriptor from a JSON file without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Io`] if the file cannot be read and
    /// [`ConfigurationError::Parse`] if it is not valid descriptor JSON.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigurationError> {
        let raw =
            std::fs::read_to_string(path).map_err(|e| ConfigurationError::io(path, &e))?;
        serde_json::from_str(&raw).map_err(|e| ConfigurationError::parse(path, e.to_string()))
    }

    /// Checks required fields, URLs, selector chains, and patterns.
    ///
    /// Custom handler ids are checked by the registry, which knows the
    /// factory's handler table.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.id.trim().is_empty() {
            return Err(ConfigurationError::missing_field("<unnamed>", "id"));
        }
        let id = self.id.as_str();
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::missing_field(id, "name"));
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigurationError::missing_field(id, "base_url"));
        }
        if !is_http_url(&self.base_url) {
            return Err(ConfigurationError::invalid_url(id, &self.base_url));
        }
        if let Some(template) = &self.page_url_template {
            let sample = template.replace(PAGE_PLACEHOLDER, "2");
            if !template.contains(PAGE_PLACEHOLDER) || !is_http_url(&sample) {
                return Err(ConfigurationError::invalid_url(id, template));
            }
        }

        match &self.handler {
            HandlerKind::Custom { handler } => {
                if handler.trim().is_empty() {
                    return Err(ConfigurationError::missing_field(id, "handler"));
                }
            }
            HandlerKind::Declarative => {
                match self.discovery {
                    DiscoveryMethod::ListingScrape if self.selectors.article_links.is_empty() => {
                        return Err(ConfigurationError::empty_chain(id, "article_links"));
                    }
                    DiscoveryMethod::Api => {
                        let api = self
                            .api
                            .as_ref()
                            .ok_or_else(|| ConfigurationError::missing_field(id, "api"))?;
                        if api.url_field.trim().is_empty() {
                            return Err(ConfigurationError::missing_field(id, "api.url_field"));
                        }
                    }
                    _ => {}
                }
                if self.selectors.content.is_empty() {
                    return Err(ConfigurationError::empty_chain(id, "content"));
                }
            }
        }

        for selector in self
            .selectors
            .article_links
            .iter()
            .chain(&self.selectors.content)
            .chain(&self.selectors.media)
        {
            Selector::parse(selector)
                .map_err(|e| ConfigurationError::invalid_selector(id, selector, e.to_string()))?;
        }
        for pattern in &self.media.allow_patterns {
            Regex::new(pattern)
                .map_err(|e| ConfigurationError::invalid_pattern(id, pattern, e.to_string()))?;
        }
        for selector in &self.media.skip_selectors {
            if SkipSelector::parse(selector).is_none() {
                return Err(ConfigurationError::invalid_selector(
                    id,
                    selector,
                    "skip selectors take the form tag, .class, #id or tag.class",
                ));
            }
        }
        Ok(())
    }
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}
