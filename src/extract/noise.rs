//! Noise patterns for the full-document fallback scan.
//!
//! Navigation, branding, advertising and tracking elements are recognised by
//! tag, by class/id tokens, by alt text, and by URL shape.

use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use super::candidates::{ElementSignature, MediaCandidate};

/// Tags whose whole subtree is never article content.
const NOISE_TAGS: [&str; 12] = [
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "iframe", "button",
    "svg", "template",
];

#[allow(clippy::expect_used)]
static NOISE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(nav|navbar|navigation|menu|logo|brand|banner|ad|ads|advert|advertisement|sponsor|sponsored|promo|tracking|tracker|pixel|beacon|spacer|share|social|cookie|newsletter|subscribe|sidebar|related|breadcrumbs?|masthead)\b",
    )
    .expect("noise token regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static NOISE_ALT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(logo|icon|avatar|tracking|pixel|advertisement|sponsored|spacer)\b")
        .expect("noise alt regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static NOISE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(pixel|tracking|beacon|spacer|1x1|/ads?/|doubleclick|/logos?[/._-]|favicon)")
        .expect("noise url regex is valid") // Static pattern, safe to panic
});

/// Returns true when the signature's tag, id or classes look like noise.
#[must_use]
pub fn is_noise_signature(signature: &ElementSignature) -> bool {
    if NOISE_TAGS.contains(&signature.tag.as_str()) {
        return true;
    }
    signature.id.as_deref().is_some_and(|id| NOISE_TOKEN.is_match(id))
        || signature.classes.iter().any(|class| NOISE_TOKEN.is_match(class))
}

/// Returns true when the element or any ancestor below `<body>` is noise.
#[must_use]
pub fn in_noise_region(element: &ElementRef<'_>) -> bool {
    std::iter::once(*element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .take_while(|el| !matches!(el.value().name(), "body" | "html"))
        .any(|el| is_noise_signature(&ElementSignature::of(&el)))
}

/// Returns true for alt text typical of logos, icons and tracking images.
#[must_use]
pub fn is_noise_alt(alt: &str) -> bool {
    NOISE_ALT.is_match(alt)
}

/// Returns true for URLs typical of trackers, spacers and logos.
#[must_use]
pub fn is_noise_url(url: &str) -> bool {
    NOISE_URL.is_match(url)
}

/// Full noise check for a fallback media candidate.
#[must_use]
pub fn is_noise_candidate(candidate: &MediaCandidate) -> bool {
    if is_noise_alt(&candidate.alt) {
        return true;
    }
    if candidate.resolved_url().is_some_and(|url| is_noise_url(&url)) {
        return true;
    }
    candidate
        .ancestors
        .iter()
        .take_while(|a| !matches!(a.tag.as_str(), "body" | "html"))
        .any(is_noise_signature)
}
