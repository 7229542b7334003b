//! Markup-to-text rendering.
//!
//! Produces paragraph-separated plain text with Markdown touches (`#`
//! headings, `-` list items) and inline `![alt](url)` markers where images
//! sit in the flow, so the media pipeline can later point them at local files.

use scraper::{ElementRef, Node};

use super::candidates::{ElementSignature, candidate_from_element};
use super::{collapse_whitespace, noise};

const SKIPPED_TAGS: [&str; 7] = [
    "script", "style", "noscript", "template", "svg", "iframe", "head",
];

const BLOCK_TAGS: [&str; 22] = [
    "p", "div", "section", "article", "blockquote", "ul", "ol", "pre", "figure", "figcaption",
    "table", "tr", "main", "header", "footer", "dl", "dt", "dd", "hr", "br", "aside", "nav",
];

/// Rendered text plus the number of visible characters (markers excluded).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedText {
    /// Paragraphs joined by blank lines.
    pub text: String,
    /// Characters of visible text, excluding image markers and prefixes.
    pub visible_chars: usize,
}

impl RenderedText {
    /// Appends another rendering as further paragraphs.
    pub fn append(&mut self, other: RenderedText) {
        if other.text.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push_str("\n\n");
        }
        self.text.push_str(&other.text);
        self.visible_chars += other.visible_chars;
    }
}

/// Walks element trees and accumulates rendered paragraphs.
pub struct TextRenderer<'a> {
    base_url: &'a str,
    skip_noise: bool,
    blocks: Vec<String>,
    current: String,
    visible_chars: usize,
}

impl<'a> TextRenderer<'a> {
    /// Creates a renderer. With `skip_noise`, noise subtrees are dropped.
    #[must_use]
    pub fn new(base_url: &'a str, skip_noise: bool) -> Self {
        Self {
            base_url,
            skip_noise,
            blocks: Vec::new(),
            current: String::new(),
            visible_chars: 0,
        }
    }

    /// Renders `element` and its subtree.
    pub fn render(&mut self, element: ElementRef<'_>) {
        self.visit(element);
        self.flush("");
    }

    /// Finishes rendering.
    #[must_use]
    pub fn finish(mut self) -> RenderedText {
        self.flush("");
        RenderedText {
            text: self.blocks.join("\n\n"),
            visible_chars: self.visible_chars,
        }
    }

    fn walk(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.push_text(text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.visit(child);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit(&mut self, element: ElementRef<'_>) {
        let tag = element.value().name().to_ascii_lowercase();
        if SKIPPED_TAGS.contains(&tag.as_str()) {
            return;
        }
        if self.skip_noise && noise::is_noise_signature(&ElementSignature::of(&element)) {
            return;
        }

        if tag == "img" {
            if let Some(marker) = candidate_from_element(&element, self.base_url)
                .and_then(|c| c.resolved_url().map(|url| (url, c.alt)))
                .map(|(url, alt)| format!(" ![{}]({url}) ", alt.replace(['[', ']'], "")))
            {
                self.current.push_str(&marker);
            }
            return;
        }

        if let Some(level) = heading_level(&tag) {
            self.flush("");
            self.walk(element);
            self.flush(&format!("{} ", "#".repeat(level)));
        } else if tag == "li" {
            self.flush("");
            self.walk(element);
            self.flush("- ");
        } else if BLOCK_TAGS.contains(&tag.as_str()) {
            self.flush("");
            self.walk(element);
            self.flush("");
        } else {
            self.walk(element);
        }
    }

    fn push_text(&mut self, text: &str) {
        let collapsed = collapse_whitespace(text);
        if collapsed.is_empty() {
            if !text.is_empty() {
                self.current.push(' ');
            }
            return;
        }
        self.visible_chars += collapsed.chars().count();
        if text.starts_with(char::is_whitespace) {
            self.current.push(' ');
        }
        self.current.push_str(&collapsed);
        if text.ends_with(char::is_whitespace) {
            self.current.push(' ');
        }
    }

    fn flush(&mut self, prefix: &str) {
        let line = collapse_whitespace(&self.current);
        self.current.clear();
        if !line.is_empty() {
            self.blocks.push(format!("{prefix}{line}"));
        }
    }
}

fn heading_level(tag: &str) -> Option<usize> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Renders a list of elements into one text.
#[must_use]
pub fn render_elements<'a, I>(elements: I, base_url: &str, skip_noise: bool) -> RenderedText
where
    I: IntoIterator<Item = ElementRef<'a>>,
{
    let mut renderer = TextRenderer::new(base_url, skip_noise);
    for element in elements {
        renderer.render(element);
    }
    renderer.finish()
}
