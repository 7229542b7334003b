//! Two-tier content extraction.
//!
//! The descriptor's content selector chain is tried first; the first
//! selector whose text clears the minimum length wins. When it falls short,
//! a full-document scan strips noise and keeps text blocks above a minimum
//! size. Media candidates follow the same pattern with their own threshold.
//!
//! # Example
//!
//! ```
//! use harvester_core::extract::{ContentExtractor, ExtractionThresholds};
//! use harvester_core::source::{DiscoveryMethod, RawContent, SourceDescriptor};
//!
//! let descriptor = SourceDescriptor::declarative(
//!     "demo", "Demo", "https://demo.example/", DiscoveryMethod::ListingScrape,
//! )
//! .with_content_selectors(["article"]);
//! let body = format!("<article><p>{}</p></article>", "word ".repeat(60));
//! let raw = RawContent::html("https://demo.example/story", body);
//!
//! let extractor = ContentExtractor::new(ExtractionThresholds::default());
//! let extraction = extractor.extract(&raw, &descriptor).unwrap();
//! assert!(!extraction.text_fallback_used);
//! ```

pub mod candidates;
mod error;
pub mod noise;
mod render;

pub use candidates::{ElementSignature, MediaCandidate, MediaKind};
pub use error::ExtractionError;
pub use render::RenderedText;

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use crate::source::{RawContent, SourceDescriptor};
use candidates::{candidate_from_element, collect_candidates};
use render::render_elements;

/// Default minimum visible characters for an article body.
pub const DEFAULT_MIN_TEXT_CHARS: usize = 200;
/// Default minimum characters for one fallback text block.
pub const DEFAULT_MIN_BLOCK_CHARS: usize = 80;
/// Default minimum media candidates before the fallback scan runs.
pub const DEFAULT_MIN_MEDIA_CANDIDATES: usize = 2;
/// Default minimum declared pixel dimension for fallback images.
pub const DEFAULT_MIN_PIXEL_DIMENSION: u32 = 100;

const FALLBACK_BLOCK_TAGS: [&str; 10] = [
    "p", "li", "blockquote", "pre", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Thresholds that decide when each tier wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionThresholds {
    /// Minimum visible characters for the article text.
    pub min_text_chars: usize,
    /// Minimum characters for a block kept by the fallback scan.
    pub min_block_chars: usize,
    /// Minimum primary media candidates before the fallback media scan runs.
    pub min_media_candidates: usize,
    /// Minimum declared width/height for fallback images.
    pub min_pixel_dimension: u32,
}

impl Default for ExtractionThresholds {
    fn default() -> Self {
        Self {
            min_text_chars: DEFAULT_MIN_TEXT_CHARS,
            min_block_chars: DEFAULT_MIN_BLOCK_CHARS,
            min_media_candidates: DEFAULT_MIN_MEDIA_CANDIDATES,
            min_pixel_dimension: DEFAULT_MIN_PIXEL_DIMENSION,
        }
    }
}

/// Result of extracting one page.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// `og:title`, `<title>` or first `<h1>`.
    pub title: Option<String>,
    /// `meta[name=description]` or `og:description`.
    pub summary: Option<String>,
    /// Article text with inline `![alt](url)` image markers.
    pub text: String,
    /// Visible characters in `text`.
    pub visible_chars: usize,
    /// Media candidates, primary first, without duplicate URLs.
    pub media: Vec<MediaCandidate>,
    /// Content selector that won, if the primary tier succeeded.
    pub content_selector: Option<String>,
    /// Whether the text came from the fallback scan.
    pub text_fallback_used: bool,
    /// Whether the fallback media scan ran.
    pub media_fallback_used: bool,
}

/// Applies selector chains with heuristic fallback.
#[derive(Debug, Clone, Default)]
pub struct ContentExtractor {
    thresholds: ExtractionThresholds,
}

impl ContentExtractor {
    /// Creates an extractor with the given thresholds.
    #[must_use]
    pub fn new(thresholds: ExtractionThresholds) -> Self {
        Self { thresholds }
    }

    /// The configured thresholds.
    #[must_use]
    pub fn thresholds(&self) -> &ExtractionThresholds {
        &self.thresholds
    }

    /// Extracts text and media candidates from one page.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::BelowThreshold`] when both the selector
    /// chain and the fallback scan stay below the minimum text length.
    #[instrument(skip(self, raw, descriptor), fields(source_id = %descriptor.id, url = %raw.url))]
    pub fn extract(
        &self,
        raw: &RawContent,
        descriptor: &SourceDescriptor,
    ) -> Result<Extraction, ExtractionError> {
        let document = Html::parse_document(&raw.body);
        let base_url = raw.url.as_str();
        let min_text = self.thresholds.min_text_chars;

        // Primary text tier.
        let mut best_chars = 0;
        let mut primary: Option<(String, RenderedText, Vec<ElementRef<'_>>)> = None;
        for raw_selector in &descriptor.selectors.content {
            let Ok(selector) = Selector::parse(raw_selector) else {
                continue;
            };
            let roots: Vec<ElementRef<'_>> = document.select(&selector).collect();
            if roots.is_empty() {
                continue;
            }
            let rendered = render_elements(roots.iter().copied(), base_url, false);
            best_chars = best_chars.max(rendered.visible_chars);
            if rendered.visible_chars >= min_text {
                debug!(selector = %raw_selector, chars = rendered.visible_chars, "content selector matched");
                primary = Some((raw_selector.clone(), rendered, roots));
                break;
            }
        }

        let (text, content_selector, roots, text_fallback_used) = match primary {
            Some((selector, rendered, roots)) => (rendered, Some(selector), roots, false),
            None => {
                let fallback = self.fallback_text(&document, base_url);
                debug!(
                    primary_chars = best_chars,
                    fallback_chars = fallback.visible_chars,
                    "text fallback scan"
                );
                if fallback.visible_chars < min_text {
                    return Err(ExtractionError::below_threshold(
                        base_url,
                        best_chars.max(fallback.visible_chars),
                        min_text,
                    ));
                }
                (fallback, None, Vec::new(), true)
            }
        };

        // Primary media tier: media chain, else media inside the winning content.
        let mut media = self.primary_media(&document, descriptor, base_url, &roots);
        let mut media_fallback_used = false;
        if media.len() < self.thresholds.min_media_candidates {
            media_fallback_used = true;
            let known: HashSet<String> = media.iter().filter_map(MediaCandidate::resolved_url).collect();
            let extra = self.fallback_media(&document, base_url, &known);
            debug!(primary = media.len(), fallback = extra.len(), "media fallback scan");
            media.extend(extra);
        }

        Ok(Extraction {
            title: page_title(&document),
            summary: page_summary(&document),
            text: text.text,
            visible_chars: text.visible_chars,
            media,
            content_selector,
            text_fallback_used,
            media_fallback_used,
        })
    }

    fn fallback_text(&self, document: &Html, base_url: &str) -> RenderedText {
        let Ok(selector) = Selector::parse(&FALLBACK_BLOCK_TAGS.join(", ")) else {
            return RenderedText::default();
        };
        let mut combined = RenderedText::default();
        for block in document.select(&selector) {
            // Nested blocks are rendered as part of their outermost block.
            let nested = block
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|a| FALLBACK_BLOCK_TAGS.contains(&a.value().name()));
            if nested || noise::in_noise_region(&block) {
                continue;
            }
            let rendered = render_elements([block], base_url, true);
            if rendered.visible_chars >= self.thresholds.min_block_chars {
                combined.append(rendered);
            }
        }
        combined
    }

    fn primary_media(
        &self,
        document: &Html,
        descriptor: &SourceDescriptor,
        base_url: &str,
        content_roots: &[ElementRef<'_>],
    ) -> Vec<MediaCandidate> {
        let mut found = Vec::new();
        for raw_selector in &descriptor.selectors.media {
            let Ok(selector) = Selector::parse(raw_selector) else {
                continue;
            };
            found = document
                .select(&selector)
                .flat_map(|element| collect_candidates(&element, base_url))
                .collect();
            if !found.is_empty() {
                break;
            }
        }
        if found.is_empty() {
            found = content_roots
                .iter()
                .flat_map(|root| collect_candidates(root, base_url))
                .collect();
        }
        dedupe_by_url(found)
    }

    fn fallback_media(
        &self,
        document: &Html,
        base_url: &str,
        known: &HashSet<String>,
    ) -> Vec<MediaCandidate> {
        let Ok(selector) = Selector::parse("img, video, audio, source") else {
            return Vec::new();
        };
        let candidates = document
            .select(&selector)
            .filter_map(|element| candidate_from_element(&element, base_url))
            .filter(|candidate| !noise::is_noise_candidate(candidate))
            .filter(|candidate| {
                candidate.kind != MediaKind::Image
                    || !candidate.is_smaller_than(self.thresholds.min_pixel_dimension)
            })
            .filter(|candidate| {
                candidate
                    .resolved_url()
                    .is_some_and(|url| !known.contains(&url))
            })
            .collect();
        dedupe_by_url(candidates)
    }
}

fn dedupe_by_url(candidates: Vec<MediaCandidate>) -> Vec<MediaCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| c.resolved_url().is_some_and(|url| seen.insert(url)))
        .collect()
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .find(|v| !v.is_empty())
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .find(|v| !v.is_empty())
}

fn page_title(document: &Html) -> Option<String> {
    meta_content(document, r#"meta[property="og:title"]"#)
        .or_else(|| first_text(document, "title"))
        .or_else(|| first_text(document, "h1"))
}

fn page_summary(document: &Html) -> Option<String> {
    meta_content(document, r#"meta[name="description"]"#)
        .or_else(|| meta_content(document, r#"meta[property="og:description"]"#))
}

/// Collapses every whitespace run to one space and trims the ends.
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Renders an HTML fragment to plain paragraphs.
#[must_use]
pub fn plain_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    render_elements([fragment.root_element()], "", false).text
}

/// Resolves a link against a base URL, keeping only http(s) targets.
///
/// Fragments are dropped; `javascript:`, `mailto:`, `tel:` and `data:`
/// links yield `None`.
#[must_use]
pub fn resolve_link(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}
