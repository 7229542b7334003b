//! One article's fetch, extract, embed and write pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use super::output::{
    ARTICLE_FILE, COMMENTS_FILE, RESULT_FILE, StagedBundle, bundle_dir_name, render_article,
    render_comments,
};
use super::FetchResult;
use crate::extract::ContentExtractor;
use crate::media::MediaPipeline;
use crate::monitor::PerformanceMonitor;
use crate::net::{
    FailureType, FetchError, RetryDecision, RetryPolicy, classify_error, parse_retry_after,
};
use crate::source::{Article, Comment, RawContent, SourceHandler};

/// Shared state every worker needs, cloned once per run.
#[derive(Debug)]
pub(crate) struct WorkerContext {
    pub(crate) extractor: ContentExtractor,
    pub(crate) media: MediaPipeline,
    pub(crate) monitor: Arc<PerformanceMonitor>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) output_root: PathBuf,
}

/// Why fetching stopped without content.
enum FetchOutcome {
    Fetched { raw: RawContent, attempts: u32 },
    Failed { error: FetchError, attempts: u32 },
    SourceTripped,
}

/// Runs the full pipeline for the article at discovery `index`.
///
/// Never returns an error: every outcome becomes a [`FetchResult`].
#[instrument(skip(ctx, handler, article), fields(source_id = %article.source_id, url = %article.url))]
pub(crate) async fn process_article(
    ctx: Arc<WorkerContext>,
    handler: Arc<dyn SourceHandler>,
    index: usize,
    article: Article,
) -> FetchResult {
    let (raw, attempts) = match fetch_with_retry(&ctx, handler.as_ref(), &article).await {
        FetchOutcome::Fetched { raw, attempts } => (raw, attempts),
        FetchOutcome::Failed { error, attempts } => {
            warn!(attempts, error = %error, "article fetch failed");
            return FetchResult::failed(article, error.to_string(), attempts);
        }
        FetchOutcome::SourceTripped => {
            return FetchResult::skipped(article, super::REASON_SOURCE_SKIPPED);
        }
    };

    let extraction = match ctx.extractor.extract(&raw, handler.descriptor()) {
        Ok(extraction) => extraction,
        Err(e) => {
            warn!(error = %e, "extraction below threshold");
            return FetchResult::failed(article, e.to_string(), attempts);
        }
    };

    let mut article = article;
    if article.title.trim().is_empty() {
        article.title = extraction
            .title
            .clone()
            .unwrap_or_else(|| article.url.clone());
    }
    if article.summary.is_none()
        && let Some(summary) = extraction.summary.clone()
    {
        article = article.with_summary(summary);
    }

    let comments = if handler.descriptor().supports_comments {
        match handler.fetch_comments(article.comments_url()).await {
            Ok(comments) => comments,
            Err(e) => {
                warn!(error = %e, "comments unavailable");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let dir_name = bundle_dir_name(index, &article.title);
    let bundle = match StagedBundle::create(&ctx.output_root, &article.source_id, &dir_name).await {
        Ok(bundle) => bundle,
        Err(e) => return FetchResult::failed(article, format!("cannot stage bundle: {e}"), attempts),
    };

    let mut text = extraction.text;
    let media = ctx
        .media
        .process(&extraction.media, handler.descriptor(), bundle.staging_dir(), &mut text)
        .await;

    let mut result = FetchResult::success(article, bundle.final_path().to_path_buf(), media.assets)
        .with_attempts(attempts)
        .with_media_errors(media.errors.iter().map(ToString::to_string).collect())
        .with_comment_count(comments.len());
    result.text_fallback_used = extraction.text_fallback_used;
    result.media_fallback_used = extraction.media_fallback_used;

    if let Err(e) = write_bundle(&bundle, &result, &text, &comments).await {
        bundle.discard().await;
        let FetchResult { article, .. } = result;
        return FetchResult::failed(article, format!("cannot write bundle: {e}"), attempts);
    }
    match bundle.commit().await {
        Ok(path) => {
            info!(path = %path.display(), media = result.media.len(), "article saved");
            result
        }
        Err(e) => {
            let FetchResult { article, .. } = result;
            FetchResult::failed(article, format!("cannot commit bundle: {e}"), attempts)
        }
    }
}

async fn write_bundle(
    bundle: &StagedBundle,
    result: &FetchResult,
    text: &str,
    comments: &[Comment],
) -> std::io::Result<()> {
    bundle
        .write(ARTICLE_FILE, &render_article(&result.article, text, &result.media))
        .await?;
    if !comments.is_empty() {
        bundle
            .write(COMMENTS_FILE, &render_comments(&result.article, comments))
            .await?;
    }
    let json = serde_json::to_string_pretty(result).map_err(std::io::Error::other)?;
    bundle.write(RESULT_FILE, &json).await
}

/// Fetches raw content, retrying transient failures per the policy.
///
/// Each attempt holds a monitor reservation while the request runs. When the
/// source trips, an article that has not been tried yet is skipped and one
/// that has is failed with its last error.
async fn fetch_with_retry(
    ctx: &WorkerContext,
    handler: &dyn SourceHandler,
    article: &Article,
) -> FetchOutcome {
    let source_id = handler.id();
    let mut attempt = 0u32;
    let mut last_error = None;

    loop {
        let Some(reservation) = ctx.monitor.reserve_attempt(source_id).await else {
            debug!(attempt, "source tripped, not attempting");
            return match last_error {
                Some(error) => FetchOutcome::Failed {
                    error,
                    attempts: attempt,
                },
                None => FetchOutcome::SourceTripped,
            };
        };
        attempt += 1;
        let started = Instant::now();
        let error = match handler.fetch_content(&article.url).await {
            Ok(raw) => {
                reservation.finish(true, started.elapsed());
                return FetchOutcome::Fetched {
                    raw,
                    attempts: attempt,
                };
            }
            Err(error) => {
                reservation.finish(false, started.elapsed());
                error
            }
        };

        let failure_type = classify_error(&error);
        let retry_after = if failure_type == FailureType::RateLimited {
            error.retry_after().and_then(parse_retry_after)
        } else {
            None
        };
        match ctx.retry_policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next_attempt,
            } => {
                let delay = retry_after.unwrap_or(delay);
                info!(
                    attempt = next_attempt,
                    max_attempts = ctx.retry_policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying article fetch"
                );
                tokio::time::sleep(delay).await;
                last_error = Some(error);
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, "not retrying article fetch");
                return FetchOutcome::Failed {
                    error,
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::extract::ExtractionThresholds;
    use crate::orchestrator::FetchStatus;
    use crate::media::MediaConfig;
    use crate::net::ConnectionPool;
    use crate::source::{DiscoveryMethod, SourceDescriptor};

    struct ScriptedHandler {
        descriptor: SourceDescriptor,
        responses: Mutex<Vec<Result<RawContent, FetchError>>>,
        comments: Vec<Comment>,
    }

    #[async_trait]
    impl SourceHandler for ScriptedHandler {
        fn descriptor(&self) -> &SourceDescriptor {
            &self.descriptor
        }

        async fn discover_page(&self, _page: u32) -> Result<Vec<Article>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_content(&self, url: &str) -> Result<RawContent, FetchError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(FetchError::timeout(url)))
        }

        async fn fetch_comments(&self, _url: &str) -> Result<Vec<Comment>, FetchError> {
            Ok(self.comments.clone())
        }
    }

    fn body() -> String {
        format!(
            "<html><head><title>Harbour plan</title></head><body><article><p>{}</p></article></body></html>",
            "The council met to debate the harbour plan. ".repeat(8)
        )
    }

    fn handler(responses: Vec<Result<RawContent, FetchError>>) -> Arc<ScriptedHandler> {
        Arc::new(ScriptedHandler {
            descriptor: SourceDescriptor::declarative(
                "news",
                "News",
                "https://news.example/",
                DiscoveryMethod::ListingScrape,
            )
            .with_link_selectors(["a"])
            .with_content_selectors(["article"])
            .with_comments(),
            // popped from the back
            responses: Mutex::new(responses.into_iter().rev().collect()),
            comments: vec![Comment {
                author: "carol".to_string(),
                text: "Good piece".to_string(),
                depth: 0,
                posted_at: None,
            }],
        })
    }

    fn context(root: &std::path::Path) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            extractor: ContentExtractor::new(ExtractionThresholds::default()),
            media: MediaPipeline::new(ConnectionPool::with_defaults().unwrap(), MediaConfig::default()),
            monitor: Arc::new(PerformanceMonitor::default()),
            retry_policy: RetryPolicy::immediate(2),
            output_root: root.to_path_buf(),
        })
    }

    #[tokio::test]
    async fn test_success_writes_complete_bundle() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let handler = handler(vec![Ok(RawContent::html("https://news.example/a", body()))]);
        let article = Article::new("news", "https://news.example/a", "");

        let result = process_article(Arc::clone(&ctx), handler, 0, article).await;

        assert_eq!(result.status, FetchStatus::Success);
        assert_eq!(result.article.title, "Harbour plan");
        assert_eq!(result.comment_count, 1);
        let dir = result.output_path.clone().unwrap();
        assert_eq!(dir, root.path().join("news").join("001-harbour-plan"));
        assert!(dir.join(ARTICLE_FILE).exists());
        assert!(dir.join(COMMENTS_FILE).exists());
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join(RESULT_FILE)).unwrap()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(ctx.monitor.consecutive_failures("news"), 0);
    }

    #[tokio::test]
    async fn test_retry_once_then_succeed() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let handler = handler(vec![
            Err(FetchError::timeout("https://news.example/a")),
            Ok(RawContent::html("https://news.example/a", body())),
        ]);
        let article = Article::new("news", "https://news.example/a", "A");

        let result = process_article(Arc::clone(&ctx), handler, 0, article).await;
        assert_eq!(result.status, FetchStatus::Success);
        assert_eq!(result.attempts, 2);
        assert_eq!(ctx.monitor.metrics("news").unwrap().attempts, 2);
        assert_eq!(ctx.monitor.consecutive_failures("news"), 0);
    }

    #[tokio::test]
    async fn test_two_failures_fail_article_and_trip_source() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let handler = handler(Vec::new());

        let first = process_article(
            Arc::clone(&ctx),
            handler.clone(),
            0,
            Article::new("news", "https://news.example/a", "A"),
        )
        .await;
        assert_eq!(first.status, FetchStatus::Failed);
        assert_eq!(first.attempts, 2);
        assert!(ctx.monitor.is_tripped("news"));

        let second = process_article(
            Arc::clone(&ctx),
            handler,
            1,
            Article::new("news", "https://news.example/b", "B"),
        )
        .await;
        assert_eq!(second.status, FetchStatus::Skipped);
        assert_eq!(second.attempts, 0);
        assert_eq!(ctx.monitor.metrics("news").unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_trip_during_retry_fails_the_tried_article() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        // A sibling already failed once.
        ctx.monitor.record_attempt("news", false, std::time::Duration::ZERO);
        let handler = handler(Vec::new());

        let result = process_article(
            Arc::clone(&ctx),
            handler,
            0,
            Article::new("news", "https://news.example/a", "A"),
        )
        .await;

        assert_eq!(result.status, FetchStatus::Failed);
        assert_eq!(result.attempts, 1);
        assert!(result.error.is_some());
        assert!(ctx.monitor.is_tripped("news"));
        assert_eq!(ctx.monitor.metrics("news").unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let handler = handler(vec![Err(FetchError::http_status(
            "https://news.example/a",
            404,
            None,
        ))]);
        let result = process_article(
            Arc::clone(&ctx),
            handler,
            0,
            Article::new("news", "https://news.example/a", "A"),
        )
        .await;
        assert_eq!(result.status, FetchStatus::Failed);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_leaves_no_bundle() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let handler = handler(vec![Ok(RawContent::html(
            "https://news.example/a",
            "<article><p>teaser</p></article>",
        ))]);
        let result = process_article(
            Arc::clone(&ctx),
            handler,
            0,
            Article::new("news", "https://news.example/a", "A"),
        )
        .await;
        assert_eq!(result.status, FetchStatus::Failed);
        assert!(result.error.unwrap().contains("below the minimum"));
        assert!(!root.path().join("news").exists());
    }
}
