//! Filename derivation for media assets and article bundles.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use url::Url;

const MAX_STEM_CHARS: usize = 80;
const MAX_SLUG_CHARS: usize = 60;

/// Lower-case extension (with leading dot) of the URL's last path segment.
#[must_use]
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = &last_segment[dot_index..];
    if ext.len() <= 1 || ext.len() > 6 {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Guesses a file extension from a Content-Type header.
#[must_use]
pub fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/avif" => ".avif",
        "image/svg+xml" => ".svg",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "audio/mpeg" => ".mp3",
        "audio/ogg" => ".ogg",
        "audio/mp4" => ".m4a",
        "application/pdf" => ".pdf",
        "application/epub+zip" => ".epub",
        _ => ".bin",
    }
}

/// Replaces characters that are invalid on common filesystems.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Lower-case, dash-separated slug for directory names.
///
/// Returns `untitled` when nothing usable remains.
#[must_use]
pub fn slugify(title: &str) -> String {
    let mut out = String::new();
    let mut prev_dash = true;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
        if out.chars().count() >= MAX_SLUG_CHARS {
            break;
        }
    }
    let slug = out.trim_matches('-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// Local filename for a downloaded asset.
///
/// Uses the URL's decoded last path segment, with whitespace replaced so the
/// name stays a valid Markdown link target; when that has no extension, one
/// is taken from the Content-Type. Segment-less URLs fall back to
/// `asset-<hash prefix>`.
#[must_use]
pub fn media_filename(url: &str, content_type: Option<&str>, content_hash: &str) -> String {
    let segment = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(ToString::to_string))
            .filter(|last| !last.is_empty())
    });

    let name = match segment {
        Some(last) => {
            let decoded = urlencoding::decode(&last).map_or_else(
                |e| {
                    debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
                    last.clone()
                },
                std::borrow::Cow::into_owned,
            );
            sanitize_filename(&decoded).replace(char::is_whitespace, "-")
        }
        None => {
            let prefix: String = content_hash.chars().take(12).collect();
            format!("asset-{prefix}")
        }
    };

    let (stem, ext) = match name.rfind('.') {
        Some(pos) if pos > 0 && name.len() - pos <= 6 => (&name[..pos], name[pos..].to_lowercase()),
        _ => (
            name.as_str(),
            content_type
                .map_or(".bin", extension_from_content_type)
                .to_string(),
        ),
    };
    let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();
    format!("{stem}{ext}")
}

/// Resolves a unique file path, adding a numeric suffix if the file exists.
#[must_use]
pub fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = {
        let sanitized = sanitize_filename(filename);
        if sanitized.contains('/')
            || sanitized.contains('\\')
            || sanitized.trim_matches('_').is_empty()
        {
            "asset.bin".to_string()
        } else {
            sanitized
        }
    };
    let base_path = dir.join(&filename);
    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) => (&filename[..pos], &filename[pos..]),
        None => (filename.as_str(), ""),
    };
    for i in 1..1000 {
        let new_path = dir.join(format!("{stem}_{i}{ext}"));
        if !new_path.exists() {
            return new_path;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.jpg"), "file_name.jpg");
        assert_eq!(sanitize_filename("file<name>.jpg"), "file_name_.jpg");
        assert_eq!(sanitize_filename("file|name.jpg"), "file_name.jpg");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Storm hits the Coast: 5 things!  "), "storm-hits-the-coast-5-things");
        assert_eq!(slugify("???"), "untitled");
        assert_eq!(slugify("Ünïcode Titles"), "ünïcode-titles");
        assert!(slugify(&"long ".repeat(40)).chars().count() <= MAX_SLUG_CHARS);
    }

    #[test]
    fn test_media_filename_from_url() {
        assert_eq!(
            media_filename("https://cdn.example/photos/Harbour%20View.JPG?w=800", None, "abc"),
            "Harbour-View.jpg"
        );
    }

    #[test]
    fn test_media_filename_extension_from_content_type() {
        assert_eq!(
            media_filename("https://cdn.example/image/12345", Some("image/webp"), "abc"),
            "12345.webp"
        );
    }

    #[test]
    fn test_media_filename_without_segment() {
        assert_eq!(
            media_filename("https://cdn.example/", Some("image/png"), "0123456789abcdef"),
            "asset-0123456789ab.png"
        );
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(
            extension_from_url("https://x.example/a/b.PNG").as_deref(),
            Some(".png")
        );
        assert_eq!(extension_from_url("https://x.example/a/b"), None);
    }

    #[test]
    fn test_resolve_unique_path_with_conflict() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.jpg"), b"existing").unwrap();
        let path = resolve_unique_path(temp_dir.path(), "a.jpg");
        assert_eq!(path, temp_dir.path().join("a_1.jpg"));
    }

    #[test]
    fn test_resolve_unique_path_dot_segment_stays_under_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = resolve_unique_path(temp_dir.path(), "..");
        assert_eq!(path.parent().unwrap(), temp_dir.path());
    }
}
