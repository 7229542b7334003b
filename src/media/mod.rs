//! Media pipeline: filter, download, deduplicate and relink article media.
//!
//! Candidates from the extractor pass through, in order: URL resolution
//! (lazy-load attribute first), skip-selector exclusion, the allow-list,
//! the media-kind toggle, truncation to the item cap, an optional HEAD size
//! check, and finally a streamed download. Each download is hashed with
//! SHA-256; a second asset with a hash already stored for the article is
//! discarded and its references point at the first file.
//!
//! Per-asset failures are collected as [`MediaError`]s and never abort the
//! remaining assets.

mod error;
pub mod filename;
mod filter;

pub use error::MediaError;
pub use filter::{MediaFilter, SkipSelector};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use crate::extract::{MediaCandidate, MediaKind};
use crate::net::{ConnectionPool, FetchError};
use crate::source::SourceDescriptor;
use filename::{media_filename, resolve_unique_path};

/// Default maximum assets stored per article.
pub const DEFAULT_MAX_MEDIA_ITEMS: usize = 20;
/// Default minimum asset size in bytes.
pub const DEFAULT_MIN_MEDIA_BYTES: u64 = 1024;
/// Subdirectory of an article bundle holding its media.
pub const MEDIA_DIR: &str = "media";

/// Tunables for the media pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConfig {
    /// Maximum assets per article after filtering.
    pub max_items: usize,
    /// Assets smaller than this are dropped.
    pub min_bytes: u64,
    /// Issue a HEAD request before downloading to check the size.
    pub check_size: bool,
    /// Download video, audio and documents as well as images.
    pub include_non_image: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_MEDIA_ITEMS,
            min_bytes: DEFAULT_MIN_MEDIA_BYTES,
            check_size: true,
            include_non_image: false,
        }
    }
}

/// One stored media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Remote URL the asset was downloaded from.
    pub url: String,
    /// Path relative to the article directory (`media/<file>`).
    pub local_path: String,
    /// Size in bytes.
    pub bytes: u64,
    /// Lower-case hex SHA-256 of the content.
    pub content_hash: String,
    /// Media kind.
    pub kind: MediaKind,
}

/// Result of processing one article's media.
#[derive(Debug, Default)]
pub struct MediaOutcome {
    /// Stored assets, in candidate order.
    pub assets: Vec<MediaAsset>,
    /// Per-asset failures.
    pub errors: Vec<MediaError>,
    /// Candidates removed by filtering before any network access.
    pub filtered: usize,
    /// Downloads whose content duplicated an asset already stored.
    pub duplicates: usize,
}

/// Cancellation flag for one in-flight download.
#[derive(Debug, Default)]
struct SkipToken {
    skipped: AtomicBool,
    notify: Notify,
}

impl SkipToken {
    fn skip(&self) {
        self.skipped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_skipped(&self) -> bool {
        self.skipped.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_skipped() {
                return;
            }
            notified.await;
        }
    }
}

/// Discovers, filters, downloads and relinks article media.
///
/// Cheap to clone; clones share the in-flight download table, so a skip
/// issued through any clone reaches the worker performing the download.
/// Media rules are compiled once per source id and shared the same way.
#[derive(Debug, Clone)]
pub struct MediaPipeline {
    pool: ConnectionPool,
    config: MediaConfig,
    in_flight: Arc<DashMap<String, Arc<SkipToken>>>,
    filters: Arc<DashMap<String, Arc<MediaFilter>>>,
}

impl MediaPipeline {
    /// Creates a pipeline downloading through `pool`.
    #[must_use]
    pub fn new(pool: ConnectionPool, config: MediaConfig) -> Self {
        Self {
            pool,
            config,
            in_flight: Arc::new(DashMap::new()),
            filters: Arc::new(DashMap::new()),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Cancels the in-flight download of `url`. Sibling downloads continue.
    ///
    /// Returns false when no download of `url` is in flight.
    pub fn skip_download(&self, url: &str) -> bool {
        match self.in_flight.get(url) {
            Some(token) => {
                info!(url = %url, "skipping media download");
                token.skip();
                true
            }
            None => false,
        }
    }

    /// Cancels the download of `url` once `countdown` elapses, if it is
    /// still running by then.
    pub fn skip_download_after(
        &self,
        url: impl Into<String>,
        countdown: Duration,
    ) -> tokio::task::JoinHandle<bool> {
        let pipeline = self.clone();
        let url = url.into();
        tokio::spawn(async move {
            tokio::time::sleep(countdown).await;
            pipeline.skip_download(&url)
        })
    }

    /// Returns true while a download of `url` is running.
    #[must_use]
    pub fn is_downloading(&self, url: &str) -> bool {
        self.in_flight.contains_key(url)
    }

    /// Processes an article's media candidates into stored assets.
    ///
    /// Files land in `<article_dir>/media/`; every `](remote)` reference in
    /// `text` is rewritten to the asset's relative local path.
    #[instrument(skip(self, candidates, descriptor, text), fields(source_id = %descriptor.id, candidates = candidates.len()))]
    pub async fn process(
        &self,
        candidates: &[MediaCandidate],
        descriptor: &SourceDescriptor,
        article_dir: &Path,
        text: &mut String,
    ) -> MediaOutcome {
        let mut outcome = MediaOutcome::default();
        let selected = self.select(candidates, descriptor, &mut outcome);
        if selected.is_empty() {
            return outcome;
        }

        let media_dir = article_dir.join(MEDIA_DIR);
        if let Err(e) = fs::create_dir_all(&media_dir).await {
            outcome.errors.push(MediaError::io(&media_dir, e));
            return outcome;
        }

        let mut stored_by_hash: HashMap<String, String> = HashMap::new();
        for (index, (url, kind)) in selected.into_iter().enumerate() {
            match self.fetch_one(&url, kind, &media_dir, index, &stored_by_hash).await {
                Ok(Stored::New(asset)) => {
                    rewrite_reference(text, &url, &asset.local_path);
                    stored_by_hash.insert(asset.content_hash.clone(), asset.local_path.clone());
                    outcome.assets.push(asset);
                }
                Ok(Stored::Duplicate { local_path }) => {
                    debug!(url = %url, local_path = %local_path, "duplicate media content");
                    rewrite_reference(text, &url, &local_path);
                    outcome.duplicates += 1;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "media asset not stored");
                    outcome.errors.push(e);
                }
            }
        }

        if outcome.assets.is_empty() {
            // Best effort; an empty directory is harmless.
            let _ = fs::remove_dir(&media_dir).await;
        }
        outcome
    }

    /// The compiled rules for `descriptor`'s source, built on first use.
    fn filter_for(&self, descriptor: &SourceDescriptor) -> Arc<MediaFilter> {
        if let Some(filter) = self.filters.get(&descriptor.id) {
            return Arc::clone(&filter);
        }
        let filter = self
            .filters
            .entry(descriptor.id.clone())
            .or_insert_with(|| {
                debug!(source_id = %descriptor.id, "compiling media rules");
                Arc::new(MediaFilter::from_rules(&descriptor.media))
            });
        Arc::clone(&filter)
    }

    /// Steps 1-4: resolve, skip selectors, allow-list, kind toggle, cap.
    fn select(
        &self,
        candidates: &[MediaCandidate],
        descriptor: &SourceDescriptor,
        outcome: &mut MediaOutcome,
    ) -> Vec<(String, MediaKind)> {
        let filter = self.filter_for(descriptor);
        let mut seen = HashSet::new();
        let mut selected = Vec::new();

        for candidate in candidates {
            let Some(url) = candidate.resolved_url() else {
                outcome.filtered += 1;
                continue;
            };
            if let Some(selector) = filter.skipped_by(candidate) {
                debug!(url = %url, selector = %selector, "media inside skipped container");
                outcome.filtered += 1;
                continue;
            }
            if !filter.allows(&url) {
                debug!(url = %url, "media not on allow-list");
                outcome.filtered += 1;
                continue;
            }
            if candidate.kind.requires_media_toggle() && !self.config.include_non_image {
                debug!(url = %url, kind = ?candidate.kind, "non-image media disabled");
                outcome.filtered += 1;
                continue;
            }
            if !seen.insert(url.clone()) {
                continue;
            }
            selected.push((url, candidate.kind));
        }

        if selected.len() > self.config.max_items {
            outcome.filtered += selected.len() - self.config.max_items;
            selected.truncate(self.config.max_items);
        }
        selected
    }

    /// Steps 5-6 for one asset: size check, download, hash, store.
    async fn fetch_one(
        &self,
        url: &str,
        kind: MediaKind,
        media_dir: &Path,
        index: usize,
        stored_by_hash: &HashMap<String, String>,
    ) -> Result<Stored, MediaError> {
        if self.config.check_size {
            match self.pool.head_content_length(url).await {
                Ok(Some(length)) if length < self.config.min_bytes => {
                    return Err(MediaError::below_minimum(url, length, self.config.min_bytes));
                }
                Ok(_) => {}
                // Servers commonly reject HEAD; the GET decides.
                Err(e) => debug!(url = %url, error = %e, "size check failed"),
            }
        }

        let token = self
            .in_flight
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(SkipToken::default()))
            .clone();
        let temp_path = media_dir.join(format!(".download-{index}.part"));
        let result = self.download(url, &temp_path, &token).await;
        // Map entry plus our clone; anything more means another worker shares it.
        self.in_flight
            .remove_if(url, |_, held| Arc::strong_count(held) <= 2);
        drop(token);

        let download = match result {
            Ok(download) => download,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        if download.bytes < self.config.min_bytes {
            let _ = fs::remove_file(&temp_path).await;
            return Err(MediaError::below_minimum(url, download.bytes, self.config.min_bytes));
        }

        if let Some(existing) = stored_by_hash.get(&download.content_hash) {
            let _ = fs::remove_file(&temp_path).await;
            return Ok(Stored::Duplicate {
                local_path: existing.clone(),
            });
        }

        let file_name = media_filename(url, download.content_type.as_deref(), &download.content_hash);
        let final_path = resolve_unique_path(media_dir, &file_name);
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| MediaError::io(&final_path, e))?;

        let stored_name = final_path
            .file_name()
            .map_or(file_name, |n| n.to_string_lossy().into_owned());
        debug!(url = %url, bytes = download.bytes, file = %stored_name, "media stored");
        Ok(Stored::New(MediaAsset {
            url: url.to_string(),
            local_path: format!("{MEDIA_DIR}/{stored_name}"),
            bytes: download.bytes,
            content_hash: download.content_hash,
            kind,
        }))
    }

    /// Streams `url` into `temp_path`, hashing as it goes.
    async fn download(
        &self,
        url: &str,
        temp_path: &Path,
        token: &SkipToken,
    ) -> Result<Download, MediaError> {
        if token.is_skipped() {
            return Err(MediaError::skipped(url));
        }
        let response = tokio::select! {
            response = self.pool.get(url) => response.map_err(|e| MediaError::download(url, e))?,
            () = token.wait() => return Err(MediaError::skipped(url)),
        };
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let file = File::create(temp_path)
            .await
            .map_err(|e| MediaError::io(temp_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut bytes: u64 = 0;

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                () = token.wait() => return Err(MediaError::skipped(url)),
            };
            let Some(chunk) = chunk else { break };
            let chunk =
                chunk.map_err(|e| MediaError::download(url, FetchError::network(url, e)))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| MediaError::io(temp_path, e))?;
            hasher.update(&chunk);
            bytes += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| MediaError::io(temp_path, e))?;

        Ok(Download {
            bytes,
            content_hash: format!("{:x}", hasher.finalize()),
            content_type,
        })
    }
}

struct Download {
    bytes: u64,
    content_hash: String,
    content_type: Option<String>,
}

enum Stored {
    New(MediaAsset),
    Duplicate { local_path: String },
}

fn rewrite_reference(text: &mut String, url: &str, local_path: &str) {
    let remote = format!("]({url})");
    if text.contains(&remote) {
        *text = text.replace(&remote, &format!("]({local_path})"));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::extract::ElementSignature;
    use crate::source::DiscoveryMethod;

    fn descriptor() -> SourceDescriptor {
        SourceDescriptor::declarative(
            "news",
            "News",
            "https://news.example/",
            DiscoveryMethod::ListingScrape,
        )
        .with_content_selectors(["article"])
    }

    fn pipeline(config: MediaConfig) -> MediaPipeline {
        MediaPipeline::new(ConnectionPool::with_defaults().unwrap(), config)
    }

    fn candidate(url: &str, kind: MediaKind) -> MediaCandidate {
        MediaCandidate::new(url, "https://news.example/story", kind)
    }

    #[test]
    fn test_select_applies_filters_in_order() {
        let pipeline = pipeline(MediaConfig {
            max_items: 2,
            ..MediaConfig::default()
        });
        let mut related = candidate("/related.jpg", MediaKind::Image);
        related.ancestors = vec![ElementSignature::new("aside", None, &[])];
        let mut lazy = candidate("/placeholder.gif", MediaKind::Image);
        lazy.lazy_url = Some("/real.jpg".to_string());
        let candidates = vec![
            lazy,
            related,
            candidate("/clip.mp4", MediaKind::Video),
            candidate("/a.jpg", MediaKind::Image),
            candidate("/a.jpg", MediaKind::Image),
            candidate("/b.jpg", MediaKind::Image),
        ];

        let mut outcome = MediaOutcome::default();
        let selected = pipeline.select(&candidates, &descriptor(), &mut outcome);
        let urls: Vec<_> = selected.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://news.example/real.jpg", "https://news.example/a.jpg"]
        );
        // related, video, and b.jpg past the cap
        assert_eq!(outcome.filtered, 3);
    }

    #[test]
    fn test_select_allow_list_and_media_toggle() {
        let pipeline = pipeline(MediaConfig {
            include_non_image: true,
            ..MediaConfig::default()
        });
        let mut descriptor = descriptor();
        descriptor.media.allow_patterns = vec![r"^https://news\.example/media/".to_string()];
        let candidates = vec![
            candidate("/media/clip.mp4", MediaKind::Video),
            candidate("https://elsewhere.example/x.jpg", MediaKind::Image),
        ];
        let mut outcome = MediaOutcome::default();
        let selected = pipeline.select(&candidates, &descriptor, &mut outcome);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].1, MediaKind::Video);
    }

    #[test]
    fn test_media_rules_compiled_once_per_source() {
        let pipeline = pipeline(MediaConfig::default());
        let mut news = descriptor();
        news.media.allow_patterns = vec![r"^https://news\.example/".to_string()];
        let candidates = vec![candidate("/a.jpg", MediaKind::Image)];

        for _ in 0..3 {
            let mut outcome = MediaOutcome::default();
            assert_eq!(pipeline.select(&candidates, &news, &mut outcome).len(), 1);
        }
        let first = pipeline.filter_for(&news);
        let clone = pipeline.clone();
        assert!(Arc::ptr_eq(&first, &clone.filter_for(&news)));
        assert_eq!(pipeline.filters.len(), 1);

        let mut other = descriptor();
        other.id = "other".to_string();
        other.media.allow_patterns = vec![r"^https://cdn\.example/".to_string()];
        let mut outcome = MediaOutcome::default();
        let other_candidates = vec![MediaCandidate::new(
            "/a.jpg",
            "https://other.example/story",
            MediaKind::Image,
        )];
        assert!(pipeline.select(&other_candidates, &other, &mut outcome).is_empty());
        assert_eq!(pipeline.filters.len(), 2);
        assert!(!Arc::ptr_eq(&first, &pipeline.filter_for(&other)));
    }

    #[test]
    fn test_rewrite_reference() {
        let mut text = "Intro ![a](https://x.example/a.jpg) and ![b](https://x.example/a.jpg.webp)".to_string();
        rewrite_reference(&mut text, "https://x.example/a.jpg", "media/a.jpg");
        assert_eq!(
            text,
            "Intro ![a](media/a.jpg) and ![b](https://x.example/a.jpg.webp)"
        );
    }

    #[test]
    fn test_skip_download_without_in_flight_download() {
        let pipeline = pipeline(MediaConfig::default());
        assert!(!pipeline.skip_download("https://x.example/a.jpg"));
        assert!(!pipeline.is_downloading("https://x.example/a.jpg"));
    }

    #[tokio::test]
    async fn test_skip_token_wakes_waiter() {
        let token = Arc::new(SkipToken::default());
        let waiter = {
            let token = Arc::clone(&token);
            tokio::spawn(async move { token.wait().await })
        };
        tokio::task::yield_now().await;
        token.skip();
        waiter.await.unwrap();
        assert!(token.is_skipped());
    }
}
