//! Pages, descriptors and configurations shared by harvest tests.

#![allow(dead_code)]

use harvester_core::net::ConnectionPool;
use harvester_core::source::{DiscoveryMethod, SourceFactory};
use harvester_core::{HarvestConfig, SourceDescriptor, SourceRegistry};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A sentence long enough that a few of them pass the text threshold.
pub const FILLER: &str = "The harbour authority published the revised plan for the eastern docks this week. ";

/// Listing page linking `links` (relative hrefs, anchor text).
pub fn listing_html(links: &[(String, String)]) -> String {
    let items: String = links
        .iter()
        .map(|(href, title)| format!("<li><a href=\"{href}\">{title}</a></li>"))
        .collect();
    format!(
        "<html><body><nav><a href=\"/about\">About</a></nav>\
         <ul class=\"stories\">{items}</ul></body></html>"
    )
}

/// Article page with a `<title>`, enough text and the given inline images.
pub fn article_html(title: &str, images: &[&str]) -> String {
    let figures: String = images
        .iter()
        .map(|src| format!("<figure><img src=\"{src}\" alt=\"photo\"></figure>"))
        .collect();
    format!(
        "<html><head><title>{title}</title>\
         <meta name=\"description\" content=\"Summary of {title}\"></head>\
         <body><header class=\"site-nav\">Menu</header>\
         <article><p>{}</p>{figures}<p>{}</p></article></body></html>",
        FILLER.repeat(3),
        FILLER.repeat(2)
    )
}

/// Declarative listing-scrape source at `<server>/<id>/`.
pub fn listing_descriptor(server: &MockServer, id: &str) -> SourceDescriptor {
    SourceDescriptor::declarative(
        id,
        format!("{id} news"),
        format!("{}/{id}/", server.uri()),
        DiscoveryMethod::ListingScrape,
    )
    .with_category("test")
    .with_link_selectors(["ul.stories li a"])
    .with_content_selectors(["article"])
}

/// Mounts a listing for `id` with `count` articles at `/<id>/a<N>` and
/// returns the article paths.
pub async fn mount_listing(server: &MockServer, id: &str, count: usize) -> Vec<String> {
    let paths: Vec<String> = (1..=count).map(|n| format!("/{id}/a{n}")).collect();
    let links: Vec<(String, String)> = paths
        .iter()
        .enumerate()
        .map(|(i, p)| (p.clone(), format!("Story {}", i + 1)))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/{id}/")))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&links)))
        .mount(server)
        .await;
    paths
}

/// Mounts a text article at `article_path`.
pub async fn mount_article(server: &MockServer, article_path: &str, title: &str) {
    Mock::given(method("GET"))
        .and(path(article_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(article_html(title, &[])))
        .mount(server)
        .await;
}

/// Registry holding only `descriptors`.
pub fn registry_with(descriptors: Vec<SourceDescriptor>) -> SourceRegistry {
    let pool = ConnectionPool::new(5, 5).unwrap();
    let mut registry = SourceRegistry::new(SourceFactory::new(pool));
    for descriptor in descriptors {
        registry.register(descriptor).unwrap();
    }
    registry
}

/// Fast configuration: no listing spacing, no retry backoff.
pub fn fast_config() -> HarvestConfig {
    HarvestConfig {
        rate_limit: false,
        retry_base_delay_ms: 0,
        retry_max_delay_ms: 0,
        ..HarvestConfig::default()
    }
}

/// Directory entries below `dir`, sorted, as file names.
pub fn entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
