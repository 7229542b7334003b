//! Skip-selector and allow-list filtering of media candidates.

use std::fmt;

use regex::Regex;
use tracing::warn;

use crate::extract::{ElementSignature, MediaCandidate};
use crate::source::MediaRules;

/// A container pattern whose media is dropped.
///
/// Supports `tag`, `.class`, `#id`, `tag.class` and `tag#id`; anything more
/// elaborate is rejected at descriptor validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipSelector {
    tag: Option<String>,
    class: Option<String>,
    id: Option<String>,
}

fn is_ident(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl SkipSelector {
    /// Parses a skip selector, returning `None` for unsupported syntax.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let split = raw.find(['.', '#']);
        let (tag, rest) = match split {
            Some(pos) => (&raw[..pos], &raw[pos..]),
            None => (raw, ""),
        };
        if !tag.is_empty() && !is_ident(tag) {
            return None;
        }
        let tag = (!tag.is_empty()).then(|| tag.to_ascii_lowercase());

        let (class, id) = if let Some(class) = rest.strip_prefix('.') {
            (Some(class.to_string()), None)
        } else if let Some(id) = rest.strip_prefix('#') {
            (None, Some(id.to_string()))
        } else {
            (None, None)
        };
        if class.as_deref().is_some_and(|c| !is_ident(c)) || id.as_deref().is_some_and(|i| !is_ident(i)) {
            return None;
        }
        if tag.is_none() && class.is_none() && id.is_none() {
            return None;
        }
        Some(Self { tag, class, id })
    }

    /// Returns true when `signature` satisfies every part of the selector.
    #[must_use]
    pub fn matches(&self, signature: &ElementSignature) -> bool {
        self.tag.as_deref().is_none_or(|tag| signature.tag == tag)
            && self
                .class
                .as_deref()
                .is_none_or(|class| signature.classes.iter().any(|c| c == class))
            && self
                .id
                .as_deref()
                .is_none_or(|id| signature.id.as_deref() == Some(id))
    }
}

impl fmt::Display for SkipSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tag) = &self.tag {
            write!(f, "{tag}")?;
        }
        if let Some(class) = &self.class {
            write!(f, ".{class}")?;
        }
        if let Some(id) = &self.id {
            write!(f, "#{id}")?;
        }
        Ok(())
    }
}

/// Compiled media rules for one source.
#[derive(Debug, Clone, Default)]
pub struct MediaFilter {
    skip: Vec<SkipSelector>,
    allow: Vec<Regex>,
}

impl MediaFilter {
    /// Compiles descriptor rules. Entries that fail to compile are logged and
    /// ignored; registration already rejects such descriptors.
    #[must_use]
    pub fn from_rules(rules: &MediaRules) -> Self {
        let skip = rules
            .skip_selectors
            .iter()
            .filter_map(|raw| {
                let parsed = SkipSelector::parse(raw);
                if parsed.is_none() {
                    warn!(selector = %raw, "ignoring unsupported skip selector");
                }
                parsed
            })
            .collect();
        let allow = rules
            .allow_patterns
            .iter()
            .filter_map(|raw| match Regex::new(raw) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(pattern = %raw, error = %e, "ignoring invalid allow pattern");
                    None
                }
            })
            .collect();
        Self { skip, allow }
    }

    /// The skip selector matched by the nearest matching ancestor, if any.
    ///
    /// The walk stops at `<body>`.
    #[must_use]
    pub fn skipped_by(&self, candidate: &MediaCandidate) -> Option<&SkipSelector> {
        candidate
            .ancestors
            .iter()
            .take_while(|a| !matches!(a.tag.as_str(), "body" | "html"))
            .find_map(|ancestor| self.skip.iter().find(|s| s.matches(ancestor)))
    }

    /// Returns true when `url` passes the allow-list. An empty list allows all.
    #[must_use]
    pub fn allows(&self, url: &str) -> bool {
        self.allow.is_empty() || self.allow.iter().any(|regex| regex.is_match(url))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::extract::MediaKind;

    #[test]
    fn test_parse_supported_forms() {
        assert_eq!(SkipSelector::parse("aside").unwrap().to_string(), "aside");
        assert_eq!(SkipSelector::parse(".related").unwrap().to_string(), ".related");
        assert_eq!(SkipSelector::parse("#sidebar").unwrap().to_string(), "#sidebar");
        assert_eq!(SkipSelector::parse("DIV.promo").unwrap().to_string(), "div.promo");
        assert!(SkipSelector::parse("div > p").is_none());
        assert!(SkipSelector::parse(".a.b").is_none());
        assert!(SkipSelector::parse("").is_none());
        assert!(SkipSelector::parse(".").is_none());
    }

    #[test]
    fn test_matches_signature() {
        let selector = SkipSelector::parse("div.related").unwrap();
        assert!(selector.matches(&ElementSignature::new("div", None, &["box", "related"])));
        assert!(!selector.matches(&ElementSignature::new("section", None, &["related"])));
        assert!(!selector.matches(&ElementSignature::new("div", None, &["related-links"])));
    }

    #[test]
    fn test_skipped_by_nearest_ancestor() {
        let filter = MediaFilter::from_rules(&MediaRules::default());
        let mut candidate = MediaCandidate::new("/a.jpg", "https://n.example/", MediaKind::Image);
        candidate.ancestors = vec![
            ElementSignature::new("figure", None, &[]),
            ElementSignature::new("div", None, &["related"]),
            ElementSignature::new("article", None, &[]),
        ];
        assert_eq!(filter.skipped_by(&candidate).unwrap().to_string(), ".related");

        candidate.ancestors = vec![
            ElementSignature::new("figure", None, &[]),
            ElementSignature::new("body", None, &["sidebar"]),
        ];
        assert!(filter.skipped_by(&candidate).is_none());
    }

    #[test]
    fn test_allow_list() {
        let open = MediaFilter::from_rules(&MediaRules::default());
        assert!(open.allows("https://anything.example/x.jpg"));

        let rules = MediaRules {
            allow_patterns: vec![r"^https://cdn\.news\.example/".to_string()],
            ..MediaRules::default()
        };
        let filter = MediaFilter::from_rules(&rules);
        assert!(filter.allows("https://cdn.news.example/a.jpg"));
        assert!(!filter.allows("https://tracker.example/a.jpg"));
    }
}
