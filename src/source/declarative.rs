//! Declarative source handler: everything comes from the descriptor.

use std::collections::HashSet;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{Article, DiscoveryMethod, RawContent, SourceDescriptor, SourceHandler};
use crate::extract::{collapse_whitespace, plain_text, resolve_link};
use crate::net::{ConnectionPool, FetchError};

/// Handler driven by a descriptor's discovery method and selector chains.
#[derive(Debug, Clone)]
pub struct DeclarativeHandler {
    descriptor: SourceDescriptor,
    pool: ConnectionPool,
}

impl DeclarativeHandler {
    /// Creates a handler. Performs no I/O.
    #[must_use]
    pub fn new(descriptor: SourceDescriptor, pool: ConnectionPool) -> Self {
        Self { descriptor, pool }
    }
}

#[async_trait]
impl SourceHandler for DeclarativeHandler {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn max_pages(&self) -> Option<u32> {
        match self.descriptor.discovery {
            DiscoveryMethod::Feed => Some(1),
            _ if self.descriptor.page_url_template.is_none() => Some(1),
            _ => None,
        }
    }

    #[instrument(skip(self), fields(source_id = %self.descriptor.id))]
    async fn discover_page(&self, page: u32) -> Result<Vec<Article>, FetchError> {
        if self.max_pages().is_some_and(|max| page > max) {
            return Ok(Vec::new());
        }
        let Some(url) = self.descriptor.page_url(page) else {
            return Ok(Vec::new());
        };
        let timeout = Some(self.descriptor.request_timeout());

        let articles = match self.descriptor.discovery {
            DiscoveryMethod::ListingScrape => {
                let response = self.pool.get_text_response(&url, timeout).await?;
                parse_listing(&self.descriptor, &response.final_url, &response.body)
            }
            DiscoveryMethod::Feed => {
                let response = self.pool.get_text_response(&url, timeout).await?;
                parse_feed(&self.descriptor, &response.final_url, &response.body)?
            }
            DiscoveryMethod::Api => {
                let value: Value = self.pool.get_json(&url, timeout).await?;
                parse_api(&self.descriptor, &url, &value)?
            }
        };
        debug!(page, count = articles.len(), "discovered listing page");
        Ok(articles)
    }

    #[instrument(skip(self), fields(source_id = %self.descriptor.id))]
    async fn fetch_content(&self, url: &str) -> Result<RawContent, FetchError> {
        let response = self
            .pool
            .get_text_response(url, Some(self.descriptor.request_timeout()))
            .await?;
        Ok(RawContent {
            url: response.final_url,
            content_type: response.content_type,
            body: response.body,
        })
    }
}

/// Applies the link selector chain; the first selector with any hit wins.
fn parse_listing(descriptor: &SourceDescriptor, page_url: &str, body: &str) -> Vec<Article> {
    let document = Html::parse_document(body);
    let base = Url::parse(page_url).ok();
    let link_selector = Selector::parse("a[href]").ok();

    for raw in &descriptor.selectors.article_links {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        let mut seen = HashSet::new();
        let mut articles = Vec::new();
        for element in document.select(&selector) {
            // The selector may point at a container rather than the anchor itself.
            let anchor = if element.value().attr("href").is_some() {
                Some(element)
            } else {
                link_selector
                    .as_ref()
                    .and_then(|s| element.select(s).next())
            };
            let Some(anchor) = anchor else {
                continue;
            };
            let Some(url) = anchor
                .value()
                .attr("href")
                .and_then(|href| resolve_link(base.as_ref(), href))
            else {
                continue;
            };
            if !seen.insert(url.clone()) {
                continue;
            }
            let mut title = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
            if title.is_empty() {
                title = anchor.value().attr("title").unwrap_or_default().to_string();
            }
            articles.push(Article::new(&descriptor.id, url, title));
        }
        if !articles.is_empty() {
            debug!(selector = %raw, count = articles.len(), "link selector matched");
            return articles;
        }
    }
    Vec::new()
}

fn parse_feed(
    descriptor: &SourceDescriptor,
    feed_url: &str,
    body: &str,
) -> Result<Vec<Article>, FetchError> {
    let channel = rss::Channel::read_from(body.as_bytes())
        .map_err(|e| FetchError::parse(feed_url, e.to_string()))?;
    let base = Url::parse(feed_url).ok();

    let mut seen = HashSet::new();
    let articles = channel
        .items()
        .iter()
        .filter_map(|item| {
            let url = resolve_link(base.as_ref(), item.link()?)?;
            if !seen.insert(url.clone()) {
                return None;
            }
            let title = item.title().map(collapse_whitespace).unwrap_or_default();
            let article = Article::new(&descriptor.id, url, title);
            Some(match item.description() {
                Some(description) => article.with_summary(plain_text(description)),
                None => article,
            })
        })
        .collect();
    Ok(articles)
}

fn parse_api(
    descriptor: &SourceDescriptor,
    endpoint: &str,
    value: &Value,
) -> Result<Vec<Article>, FetchError> {
    let mapping = descriptor.api.clone().unwrap_or_default();
    let items = value
        .pointer(&mapping.items_pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            FetchError::parse(
                endpoint,
                format!("no item array at pointer '{}'", mapping.items_pointer),
            )
        })?;
    let base = Url::parse(endpoint).ok();

    let mut seen = HashSet::new();
    let articles = items
        .iter()
        .filter_map(|item| {
            let raw_url = item.get(&mapping.url_field)?.as_str()?;
            let url = resolve_link(base.as_ref(), raw_url)?;
            if !seen.insert(url.clone()) {
                return None;
            }
            let title = item
                .get(&mapping.title_field)
                .and_then(Value::as_str)
                .map(collapse_whitespace)
                .unwrap_or_default();
            let article = Article::new(&descriptor.id, url, title);
            let summary = mapping
                .summary_field
                .as_ref()
                .and_then(|field| item.get(field))
                .and_then(Value::as_str);
            Some(match summary {
                Some(summary) => article.with_summary(plain_text(summary)),
                None => article,
            })
        })
        .collect();
    Ok(articles)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::ApiListing;

    fn listing() -> SourceDescriptor {
        SourceDescriptor::declarative(
            "lite",
            "Lite",
            "https://lite.example/",
            DiscoveryMethod::ListingScrape,
        )
        .with_link_selectors(["ul.stories li a", "a.headline"])
        .with_content_selectors(["article"])
    }

    #[test]
    fn test_parse_listing_first_matching_selector_wins() {
        let html = r#"<html><body>
            <a class="headline" href="/skip">Not used</a>
            <ul class="stories">
              <li><a href="/2024/01/one.html">  First
                 story </a></li>
              <li><a href="https://lite.example/two.html#top">Second</a></li>
              <li><a href="/2024/01/one.html">Duplicate</a></li>
              <li><a href="javascript:void(0)">Script</a></li>
            </ul></body></html>"#;
        let articles = parse_listing(&listing(), "https://lite.example/", html);
        let urls: Vec<_> = articles.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://lite.example/2024/01/one.html",
                "https://lite.example/two.html"
            ]
        );
        assert_eq!(articles[0].title, "First story");
        assert_eq!(articles[0].source_id, "lite");
    }

    #[test]
    fn test_parse_listing_falls_through_chain() {
        let html = r#"<div><a class="headline" href="/only">Only</a></div>"#;
        let articles = parse_listing(&listing(), "https://lite.example/", html);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://lite.example/only");
    }

    #[test]
    fn test_parse_listing_container_selector() {
        let descriptor = listing().with_link_selectors(["div.card"]);
        let html = r#"<div class="card"><h2>Card title</h2><a href="/c1">read</a></div>"#;
        let articles = parse_listing(&descriptor, "https://lite.example/", html);
        assert_eq!(articles[0].url, "https://lite.example/c1");
        assert_eq!(articles[0].title, "Card title read");
    }

    #[test]
    fn test_parse_feed() {
        let xml = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel><title>Feed</title><link>https://f.example</link>
            <description>d</description>
            <item><title>One</title><link>https://f.example/1</link>
              <description>&lt;p&gt;Summary &lt;b&gt;one&lt;/b&gt;&lt;/p&gt;</description></item>
            <item><title>No link</title></item>
            <item><title>Two</title><link>/2</link></item>
            </channel></rss>"#;
        let descriptor =
            SourceDescriptor::declarative("f", "F", "https://f.example/rss", DiscoveryMethod::Feed)
                .with_content_selectors(["article"]);
        let articles = parse_feed(&descriptor, "https://f.example/rss", xml).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].summary.as_deref(), Some("Summary one"));
        assert_eq!(articles[1].url, "https://f.example/2");
    }

    #[test]
    fn test_parse_feed_rejects_garbage() {
        let descriptor =
            SourceDescriptor::declarative("f", "F", "https://f.example/rss", DiscoveryMethod::Feed);
        let err = parse_feed(&descriptor, "https://f.example/rss", "not xml").unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
    }

    #[test]
    fn test_parse_api_with_pointer() {
        let descriptor = SourceDescriptor::declarative(
            "api",
            "API",
            "https://api.example/list",
            DiscoveryMethod::Api,
        )
        .with_api(ApiListing {
            items_pointer: "/data/items".to_string(),
            url_field: "link".to_string(),
            title_field: "headline".to_string(),
            summary_field: Some("blurb".to_string()),
        });
        let value = serde_json::json!({
            "data": { "items": [
                { "link": "https://api.example/a", "headline": "A", "blurb": "about a" },
                { "headline": "missing link" },
                { "link": "/b", "headline": "B" }
            ]}
        });
        let articles = parse_api(&descriptor, "https://api.example/list", &value).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].summary.as_deref(), Some("about a"));
        assert_eq!(articles[1].url, "https://api.example/b");
    }

    #[test]
    fn test_parse_api_missing_array_is_parse_error() {
        let descriptor = SourceDescriptor::declarative(
            "api",
            "API",
            "https://api.example/list",
            DiscoveryMethod::Api,
        )
        .with_api(ApiListing::default());
        let value = serde_json::json!({ "items": [] });
        assert!(parse_api(&descriptor, "https://api.example/list", &value).is_err());
    }

    #[test]
    fn test_max_pages() {
        let pool = ConnectionPool::with_defaults().unwrap();
        assert_eq!(DeclarativeHandler::new(listing(), pool.clone()).max_pages(), Some(1));
        let paged = listing().with_page_template("https://lite.example/?p={page}");
        assert_eq!(DeclarativeHandler::new(paged, pool).max_pages(), None);
    }
}
