//! Hacker News custom handler (Firebase JSON API).
//!
//! Discovery walks `topstories.json` thirty ids per page; each id is resolved
//! through `item/{id}.json`. Stories that link elsewhere are fetched from the
//! linked site, self posts (Ask HN and friends) are rendered from the API
//! payload. Every story carries its discussion page so comments can be
//! fetched regardless of where the story itself lives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{Article, Comment, RawContent, SourceDescriptor, SourceHandler};
use crate::extract::plain_text;
use crate::net::{ConnectionPool, FetchError};

/// Handler id used in descriptors (`{"kind": "custom", "handler": "hackernews"}`).
pub const HACKERNEWS_HANDLER_ID: &str = "hackernews";

const DEFAULT_SITE_URL: &str = "https://news.ycombinator.com";
const PAGE_SIZE: usize = 30;
const MAX_COMMENT_DEPTH: usize = 4;
const MAX_COMMENTS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
struct HnItem {
    id: u64,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    by: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    kids: Vec<u64>,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

impl HnItem {
    fn is_visible(&self) -> bool {
        !self.dead && !self.deleted
    }
}

/// Custom handler for Hacker News with discussion-thread support.
#[derive(Debug)]
pub struct HackerNewsHandler {
    descriptor: SourceDescriptor,
    pool: ConnectionPool,
    site_url: String,
    top_stories: OnceCell<Vec<u64>>,
}

impl HackerNewsHandler {
    /// Creates a handler whose API root is the descriptor's base URL.
    #[must_use]
    pub fn new(descriptor: SourceDescriptor, pool: ConnectionPool) -> Self {
        Self {
            descriptor,
            pool,
            site_url: DEFAULT_SITE_URL.to_string(),
            top_stories: OnceCell::new(),
        }
    }

    /// Overrides the site that hosts discussion pages.
    #[must_use]
    pub fn with_site_url(mut self, site_url: impl Into<String>) -> Self {
        self.site_url = site_url.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.descriptor.base_url.trim_end_matches('/'))
    }

    fn discussion_url(&self, id: u64) -> String {
        format!("{}/item?id={id}", self.site_url)
    }

    async fn item(&self, id: u64) -> Result<Option<HnItem>, FetchError> {
        let url = self.api_url(&format!("item/{id}.json"));
        self.pool
            .get_json(&url, Some(self.descriptor.request_timeout()))
            .await
    }

    async fn top_story_ids(&self) -> Result<&Vec<u64>, FetchError> {
        self.top_stories
            .get_or_try_init(|| async {
                let url = self.api_url("topstories.json");
                let ids: Vec<u64> = self
                    .pool
                    .get_json(&url, Some(self.descriptor.request_timeout()))
                    .await?;
                debug!(count = ids.len(), "loaded top story ids");
                Ok(ids)
            })
            .await
    }
}

/// Extracts the item id from a discussion URL (`.../item?id=123`).
fn item_id(url: &str) -> Option<u64> {
    let parsed = Url::parse(url).ok()?;
    if !parsed.path().ends_with("/item") {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(key, _)| key == "id")
        .and_then(|(_, value)| value.parse().ok())
}

fn timestamp(seconds: Option<i64>) -> Option<DateTime<Utc>> {
    seconds.and_then(|s| DateTime::from_timestamp(s, 0))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Renders a self post as a small HTML page the extractor understands.
fn render_self_post(item: &HnItem) -> String {
    let title = escape_html(item.title.as_deref().unwrap_or_default());
    let body = item.text.as_deref().unwrap_or_default();
    format!(
        "<html><head><title>{title}</title></head>\
         <body><article><h1>{title}</h1><div class=\"text\">{body}</div></article></body></html>"
    )
}

#[async_trait]
impl SourceHandler for HackerNewsHandler {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self), fields(source_id = %self.descriptor.id))]
    async fn discover_page(&self, page: u32) -> Result<Vec<Article>, FetchError> {
        let ids = self.top_story_ids().await?;
        let start = (page.max(1) as usize - 1) * PAGE_SIZE;
        if start >= ids.len() {
            return Ok(Vec::new());
        }
        let end = (start + PAGE_SIZE).min(ids.len());

        let fetches = ids[start..end].iter().map(|id| self.item(*id));
        let mut articles = Vec::new();
        for (id, result) in ids[start..end].iter().zip(join_all(fetches).await) {
            let item = match result {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(error) => {
                    warn!(id, error = %error, "skipping unreadable story");
                    continue;
                }
            };
            if !item.is_visible() || item.kind != "story" {
                continue;
            }
            let discussion = self.discussion_url(item.id);
            let url = item.url.clone().unwrap_or_else(|| discussion.clone());
            let title = item.title.clone().unwrap_or_default();
            let mut article = Article::new(&self.descriptor.id, url, title)
                .with_discussion_url(discussion);
            if let Some(text) = &item.text {
                article = article.with_summary(plain_text(text));
            }
            articles.push(article);
        }
        Ok(articles)
    }

    #[instrument(skip(self), fields(source_id = %self.descriptor.id))]
    async fn fetch_content(&self, url: &str) -> Result<RawContent, FetchError> {
        if let Some(id) = item_id(url) {
            let item = self
                .item(id)
                .await?
                .ok_or_else(|| FetchError::http_status(url, 404, None))?;
            return Ok(RawContent::html(url, render_self_post(&item)));
        }
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

    #[instrument(skip(self), fields(source_id = %self.descriptor.id))]
    async fn fetch_comments(&self, url: &str) -> Result<Vec<Comment>, FetchError> {
        let Some(id) = item_id(url) else {
            return Ok(Vec::new());
        };
        let Some(story) = self.item(id).await? else {
            return Ok(Vec::new());
        };

        // Depth-first, preserving thread order.
        let mut stack: Vec<(u64, usize)> = story.kids.iter().rev().map(|kid| (*kid, 0)).collect();
        let mut comments = Vec::new();
        while let Some((kid, depth)) = stack.pop() {
            if comments.len() >= MAX_COMMENTS {
                debug!(limit = MAX_COMMENTS, "comment limit reached");
                break;
            }
            let item = match self.item(kid).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(error) => {
                    warn!(id = kid, error = %error, "skipping unreadable comment");
                    continue;
                }
            };
            if !item.is_visible() {
                continue;
            }
            if depth + 1 < MAX_COMMENT_DEPTH {
                stack.extend(item.kids.iter().rev().map(|k| (*k, depth + 1)));
            }
            comments.push(Comment {
                author: item.by.clone().unwrap_or_else(|| "[unknown]".to_string()),
                text: plain_text(item.text.as_deref().unwrap_or_default()),
                depth,
                posted_at: timestamp(item.time),
            });
        }
        Ok(comments)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_from_discussion_url() {
        assert_eq!(
            item_id("https://news.ycombinator.com/item?id=4242"),
            Some(4242)
        );
        assert_eq!(item_id("https://example.com/story?id=1"), None);
        assert_eq!(item_id("https://news.ycombinator.com/item"), None);
    }

    #[test]
    fn test_render_self_post_escapes_title() {
        let item: HnItem = serde_json::from_value(serde_json::json!({
            "id": 1, "type": "story", "title": "Ask HN: <b>?</b>",
            "text": "<p>Body</p>"
        }))
        .unwrap();
        let html = render_self_post(&item);
        assert!(html.contains("Ask HN: &lt;b&gt;?&lt;/b&gt;"));
        assert!(html.contains("<p>Body</p>"));
    }

    #[test]
    fn test_hidden_items() {
        let item: HnItem =
            serde_json::from_value(serde_json::json!({ "id": 2, "deleted": true })).unwrap();
        assert!(!item.is_visible());
        assert_eq!(item.kind, "");
    }

    #[test]
    fn test_timestamp_conversion() {
        let ts = timestamp(Some(1_700_000_000)).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert!(timestamp(None).is_none());
    }
}
