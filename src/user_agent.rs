//! Shared User-Agent string for all outbound traffic.
//!
//! Single source for project URL and UA format so listing, article, and media
//! requests identify the tool the same way (good citizenship; RFC 9308).

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/harvester";

/// Default User-Agent for every request routed through the connection pool.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("harvester/{version} (article-archiver; +{PROJECT_UA_URL})")
}
