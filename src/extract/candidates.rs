//! Media candidates discovered in page markup.
//!
//! `scraper::Html` is not `Send`, so candidates capture everything later
//! pipeline stages need (raw URL attributes, dimensions, and a signature of
//! every ancestor element) while the document is still in scope.

use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use url::Url;

use super::resolve_link;
use crate::media::filename::extension_from_url;

/// Attributes that lazy-loading scripts read the real source from.
const LAZY_ATTRIBUTES: [&str; 4] = ["data-src", "data-lazy-src", "data-original", "data-lazy"];

const IMAGE_EXTENSIONS: [&str; 9] = [
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".svg", ".bmp", ".tiff",
];
const VIDEO_EXTENSIONS: [&str; 5] = [".mp4", ".webm", ".mov", ".m4v", ".ogv"];
const AUDIO_EXTENSIONS: [&str; 6] = [".mp3", ".m4a", ".ogg", ".wav", ".aac", ".flac"];
const DOCUMENT_EXTENSIONS: [&str; 9] = [
    ".pdf", ".doc", ".docx", ".epub", ".odt", ".ppt", ".pptx", ".xls", ".xlsx",
];

/// Kind of media asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Video file.
    Video,
    /// Audio file.
    Audio,
    /// Downloadable document (PDF, office formats, e-books).
    Document,
}

impl MediaKind {
    /// Guesses the kind from a URL's file extension.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let ext = extension_from_url(url)?;
        let ext = ext.as_str();
        if IMAGE_EXTENSIONS.contains(&ext) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Some(Self::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Some(Self::Audio)
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            Some(Self::Document)
        } else {
            None
        }
    }

    /// Non-image media is only fetched when the media toggle is on.
    #[must_use]
    pub fn requires_media_toggle(self) -> bool {
        self != Self::Image
    }
}

/// Tag, id and classes of one element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSignature {
    /// Lower-case tag name.
    pub tag: String,
    /// `id` attribute.
    pub id: Option<String>,
    /// `class` tokens.
    pub classes: Vec<String>,
}

impl ElementSignature {
    /// Captures the signature of a parsed element.
    #[must_use]
    pub fn of(element: &ElementRef<'_>) -> Self {
        let value = element.value();
        Self {
            tag: value.name().to_ascii_lowercase(),
            id: value.id().map(ToString::to_string),
            classes: value.classes().map(ToString::to_string).collect(),
        }
    }

    /// Builds a signature by hand (tests, synthetic markup).
    #[must_use]
    pub fn new(tag: &str, id: Option<&str>, classes: &[&str]) -> Self {
        Self {
            tag: tag.to_string(),
            id: id.map(ToString::to_string),
            classes: classes.iter().map(ToString::to_string).collect(),
        }
    }
}

/// One media reference found in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCandidate {
    /// Eager source attribute (`src` or `href`).
    pub eager_url: Option<String>,
    /// Lazy-load attribute value, if any.
    pub lazy_url: Option<String>,
    /// Page URL relative references resolve against.
    pub base_url: String,
    /// Media kind.
    pub kind: MediaKind,
    /// Alternative text or link text.
    pub alt: String,
    /// Declared width in pixels.
    pub width: Option<u32>,
    /// Declared height in pixels.
    pub height: Option<u32>,
    /// Ancestor elements, nearest first.
    pub ancestors: Vec<ElementSignature>,
}

impl MediaCandidate {
    /// Creates a candidate with only an eager URL (tests, custom handlers).
    #[must_use]
    pub fn new(url: impl Into<String>, base_url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            eager_url: Some(url.into()),
            lazy_url: None,
            base_url: base_url.into(),
            kind,
            alt: String::new(),
            width: None,
            height: None,
            ancestors: Vec::new(),
        }
    }

    /// Absolute URL to download, preferring the lazy-load value.
    #[must_use]
    pub fn resolved_url(&self) -> Option<String> {
        let base = Url::parse(&self.base_url).ok();
        self.lazy_url
            .iter()
            .chain(self.eager_url.iter())
            .filter(|raw| !raw.trim_start().starts_with("data:"))
            .find_map(|raw| resolve_link(base.as_ref(), raw))
    }

    /// Returns true when a declared dimension is below `min_pixels`.
    #[must_use]
    pub fn is_smaller_than(&self, min_pixels: u32) -> bool {
        self.width.is_some_and(|w| w < min_pixels) || self.height.is_some_and(|h| h < min_pixels)
    }
}

fn parse_dimension(value: Option<&str>) -> Option<u32> {
    let digits: String = value?
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn lazy_attribute(element: &ElementRef<'_>) -> Option<String> {
    LAZY_ATTRIBUTES
        .iter()
        .find_map(|name| element.value().attr(name))
        .filter(|v| !v.trim().is_empty())
        .map(ToString::to_string)
}

/// Builds a candidate for `element` if it is a media element.
///
/// Recognises `img`, `video`, `audio`, `source` (kind taken from its parent),
/// and `a` links to document files.
#[must_use]
pub fn candidate_from_element(element: &ElementRef<'_>, base_url: &str) -> Option<MediaCandidate> {
    let value = element.value();
    let tag = value.name().to_ascii_lowercase();
    let (kind, eager) = match tag.as_str() {
        "img" => (MediaKind::Image, value.attr("src")),
        "video" => (MediaKind::Video, value.attr("src")),
        "audio" => (MediaKind::Audio, value.attr("src")),
        "source" => {
            let parent = element.parent().and_then(ElementRef::wrap);
            let kind = match parent.map(|p| p.value().name().to_ascii_lowercase()).as_deref() {
                Some("audio") => MediaKind::Audio,
                Some("video") => MediaKind::Video,
                // <picture><source srcset> duplicates the <img> fallback.
                _ => return None,
            };
            (kind, value.attr("src"))
        }
        "a" => {
            let href = value.attr("href")?;
            let absolute = resolve_link(Url::parse(base_url).ok().as_ref(), href)?;
            if MediaKind::from_url(&absolute) != Some(MediaKind::Document) {
                return None;
            }
            (MediaKind::Document, Some(href))
        }
        _ => return None,
    };

    let lazy = lazy_attribute(element);
    if eager.is_none_or(|e| e.trim().is_empty()) && lazy.is_none() {
        return None;
    }
    let alt = match tag.as_str() {
        "a" => super::collapse_whitespace(&element.text().collect::<Vec<_>>().join(" ")),
        _ => value.attr("alt").or(value.attr("title")).unwrap_or_default().trim().to_string(),
    };

    Some(MediaCandidate {
        eager_url: eager.map(ToString::to_string),
        lazy_url: lazy,
        base_url: base_url.to_string(),
        kind,
        alt,
        width: parse_dimension(value.attr("width")),
        height: parse_dimension(value.attr("height")),
        ancestors: element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .map(|a| ElementSignature::of(&a))
            .collect(),
    })
}

/// Collects candidates from `root` and all of its descendants, in document order.
#[must_use]
pub fn collect_candidates(root: &ElementRef<'_>, base_url: &str) -> Vec<MediaCandidate> {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .filter_map(|element| candidate_from_element(&element, base_url))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use scraper::{Html, Selector};

    use super::*;

    const BASE: &str = "https://news.example/2024/story.html";

    fn candidates(html: &str) -> Vec<MediaCandidate> {
        let document = Html::parse_document(html);
        let body = document.select(&Selector::parse("body").unwrap()).next().unwrap();
        collect_candidates(&body, BASE)
    }

    #[test]
    fn test_lazy_attribute_preferred() {
        let found = candidates(
            r#"<body><img src="/placeholder.gif" data-src="/img/real.jpg" alt=" Real "></body>"#,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].resolved_url().unwrap(),
            "https://news.example/img/real.jpg"
        );
        assert_eq!(found[0].alt, "Real");
    }

    #[test]
    fn test_data_uri_falls_back_to_eager() {
        let found = candidates(
            r#"<body><img data-src="data:image/gif;base64,R0lGOD" src="photo.png"></body>"#,
        );
        assert_eq!(
            found[0].resolved_url().unwrap(),
            "https://news.example/2024/photo.png"
        );
    }

    #[test]
    fn test_media_kinds_and_documents() {
        let found = candidates(
            r#"<body>
                <video><source src="/v/clip.mp4"></video>
                <audio src="/a/pod.mp3"></audio>
                <a href="/files/report.pdf">Full report</a>
                <a href="/other-story.html">Not media</a>
                <picture><source srcset="/x.webp"><img src="/x.jpg"></picture>
            </body>"#,
        );
        let kinds: Vec<_> = found.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MediaKind::Video,
                MediaKind::Audio,
                MediaKind::Document,
                MediaKind::Image
            ]
        );
        assert_eq!(found[2].alt, "Full report");
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let found = candidates(
            r#"<body><aside class="related box"><figure id="f1"><img src="/a.jpg"></figure></aside></body>"#,
        );
        let tags: Vec<_> = found[0].ancestors.iter().map(|a| a.tag.as_str()).collect();
        assert_eq!(&tags[..3], &["figure", "aside", "body"]);
        assert_eq!(found[0].ancestors[0].id.as_deref(), Some("f1"));
        assert_eq!(found[0].ancestors[1].classes, vec!["related", "box"]);
    }

    #[test]
    fn test_dimensions() {
        let found = candidates(r#"<body><img src="/p.gif" width="1" height="1px"></body>"#);
        assert_eq!(found[0].width, Some(1));
        assert_eq!(found[0].height, Some(1));
        assert!(found[0].is_smaller_than(100));
        let sized = MediaCandidate::new("/a.jpg", BASE, MediaKind::Image);
        assert!(!sized.is_smaller_than(100));
    }

    #[test]
    fn test_kind_from_url() {
        assert_eq!(
            MediaKind::from_url("https://x.example/a/b.JPG?x=1"),
            Some(MediaKind::Image)
        );
        assert_eq!(MediaKind::from_url("https://x.example/a"), None);
        assert!(MediaKind::Video.requires_media_toggle());
        assert!(!MediaKind::Image.requires_media_toggle());
    }
}
