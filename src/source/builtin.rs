//! Compiled-in source table.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{
    ApiListing, DiscoveryMethod, HACKERNEWS_HANDLER_ID, HackerNewsHandler, SourceDescriptor,
    SourceFactory, SourceRegistry,
};
use crate::net::ConnectionPool;

/// Content chain for pages served by arbitrary sites (link aggregators).
const GENERIC_CONTENT_CHAIN: [&str; 4] = ["article", "main", "[role=main]", "#content"];

/// Descriptors shipped with the binary.
#[must_use]
pub fn builtin_descriptors() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor::declarative(
            "lite-cnn",
            "CNN Lite",
            "https://lite.cnn.com/",
            DiscoveryMethod::ListingScrape,
        )
        .with_category("news")
        .with_link_selectors(["ul li.card--lite a", "ul li a"])
        .with_content_selectors(["article .article--lite", "article", "main"]),
        SourceDescriptor::declarative(
            "npr-text",
            "NPR Text-Only",
            "https://text.npr.org/",
            DiscoveryMethod::ListingScrape,
        )
        .with_category("news")
        .with_link_selectors(["ul li a.topic-title", "main ul li a"])
        .with_content_selectors(["article .paragraphs-container", "article", "main"]),
        SourceDescriptor::declarative(
            "bbc-news",
            "BBC News",
            "https://feeds.bbci.co.uk/news/rss.xml",
            DiscoveryMethod::Feed,
        )
        .with_category("news")
        .with_content_selectors(["article [data-component=text-block]", "article", "main"])
        .with_media_selectors(["article figure img", "article img"]),
        SourceDescriptor::declarative(
            "lobsters",
            "Lobsters",
            "https://lobste.rs/hottest.json",
            DiscoveryMethod::Api,
        )
        .with_category("tech")
        .with_page_template("https://lobste.rs/hottest.json?page={page}")
        .with_api(ApiListing {
            items_pointer: String::new(),
            url_field: "url".to_string(),
            title_field: "title".to_string(),
            summary_field: Some("description".to_string()),
        })
        .with_content_selectors(GENERIC_CONTENT_CHAIN)
        .with_rate_limit(Duration::from_secs(2)),
        SourceDescriptor::custom(
            "hackernews",
            "Hacker News",
            "https://hacker-news.firebaseio.com/v0",
            HACKERNEWS_HANDLER_ID,
        )
        .with_category("tech")
        .with_content_selectors(GENERIC_CONTENT_CHAIN)
        .with_rate_limit(Duration::from_millis(250))
        .with_comments(),
    ]
}

/// Builds the registry used by the CLI: the compiled-in handler table plus
/// the built-in descriptors.
#[must_use]
pub fn build_default_source_registry(pool: ConnectionPool) -> SourceRegistry {
    let mut factory = SourceFactory::new(pool);
    factory.register_custom(HACKERNEWS_HANDLER_ID, |descriptor, pool| {
        Arc::new(HackerNewsHandler::new(descriptor, pool))
    });

    let mut registry = SourceRegistry::new(factory);
    let accepted = registry.register_all(builtin_descriptors());
    info!(accepted, "registered built-in sources");
    registry
}
