//! Article bundle layout and staged writes.
//!
//! A bundle is built in a hidden `.<name>.partial` directory next to its
//! final location and renamed into place once every file is written, so an
//! interrupted run never leaves a half-written bundle behind.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::{debug, warn};

use crate::extract::MediaKind;
use crate::media::MediaAsset;
use crate::media::filename::slugify;
use crate::source::{Article, Comment};

/// Extracted article document.
pub const ARTICLE_FILE: &str = "article.md";
/// Discussion thread document.
pub const COMMENTS_FILE: &str = "comments.md";
/// Serialized fetch result.
pub const RESULT_FILE: &str = "result.json";

const PARTIAL_SUFFIX: &str = ".partial";

/// Directory name for the article at discovery `index` (0-based).
#[must_use]
pub fn bundle_dir_name(index: usize, title: &str) -> String {
    format!("{:03}-{}", index + 1, slugify(title))
}

/// Creates the output root and removes staging directories left by an
/// interrupted earlier run.
///
/// # Errors
///
/// Returns the IO error if the root cannot be created or read.
pub async fn prepare_root(root: &Path) -> io::Result<()> {
    fs::create_dir_all(root).await?;
    let mut sources = fs::read_dir(root).await?;
    while let Some(source_dir) = sources.next_entry().await? {
        if !source_dir.file_type().await?.is_dir() {
            continue;
        }
        let mut bundles = fs::read_dir(source_dir.path()).await?;
        while let Some(entry) = bundles.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(PARTIAL_SUFFIX) {
                warn!(path = %entry.path().display(), "removing stale partial bundle");
                fs::remove_dir_all(entry.path()).await?;
            }
        }
    }
    Ok(())
}

/// A bundle being written.
#[derive(Debug)]
pub struct StagedBundle {
    staging: PathBuf,
    final_path: PathBuf,
}

impl StagedBundle {
    /// Creates the staging directory for `<root>/<source_id>/<dir_name>`.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the directory cannot be created.
    pub async fn create(root: &Path, source_id: &str, dir_name: &str) -> io::Result<Self> {
        let source_dir = root.join(source_id);
        let staging = source_dir.join(format!(".{dir_name}{PARTIAL_SUFFIX}"));
        if fs::try_exists(&staging).await? {
            fs::remove_dir_all(&staging).await?;
        }
        fs::create_dir_all(&staging).await?;
        Ok(Self {
            staging,
            final_path: source_dir.join(dir_name),
        })
    }

    /// Directory files are written into until [`commit`](Self::commit).
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Where the bundle will live once committed.
    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Writes one file into the staging directory.
    ///
    /// # Errors
    ///
    /// Returns the IO error of the write.
    pub async fn write(&self, name: &str, contents: &str) -> io::Result<()> {
        fs::write(self.staging.join(name), contents).await
    }

    /// Moves the bundle into place, replacing an older bundle of the same name.
    ///
    /// # Errors
    ///
    /// Returns the IO error of the replace or rename.
    pub async fn commit(self) -> io::Result<PathBuf> {
        if fs::try_exists(&self.final_path).await? {
            fs::remove_dir_all(&self.final_path).await?;
        }
        fs::rename(&self.staging, &self.final_path).await?;
        debug!(path = %self.final_path.display(), "bundle committed");
        Ok(self.final_path)
    }

    /// Deletes the staging directory.
    pub async fn discard(self) {
        if let Err(e) = fs::remove_dir_all(&self.staging).await {
            warn!(path = %self.staging.display(), error = %e, "failed to remove partial bundle");
        }
    }
}

/// Renders `article.md`.
///
/// Assets whose reference was not found inline are listed in a trailing
/// media section.
#[must_use]
pub fn render_article(article: &Article, text: &str, assets: &[MediaAsset]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", article.title);
    let _ = writeln!(out, "Source: <{}>", article.url);
    if let Some(discussion) = &article.discussion_url {
        let _ = writeln!(out, "Discussion: <{discussion}>");
    }
    let _ = writeln!(out, "Fetched: {}\n", Utc::now().to_rfc3339());
    if let Some(summary) = &article.summary {
        let _ = writeln!(out, "> {summary}\n");
    }
    out.push_str(text.trim());
    out.push('\n');

    let unreferenced: Vec<_> = assets
        .iter()
        .filter(|asset| !text.contains(&format!("]({})", asset.local_path)))
        .collect();
    if !unreferenced.is_empty() {
        out.push_str("\n## Media\n\n");
        for asset in unreferenced {
            if asset.kind == MediaKind::Image {
                let _ = writeln!(out, "- ![]({})", asset.local_path);
            } else {
                let _ = writeln!(out, "- [{}]({})", asset.local_path, asset.local_path);
            }
        }
    }
    out
}

/// Renders `comments.md` as a nested list.
#[must_use]
pub fn render_comments(article: &Article, comments: &[Comment]) -> String {
    let mut out = format!("# Discussion: {}\n\n", article.title);
    for comment in comments {
        let indent = "  ".repeat(comment.depth);
        let posted = comment
            .posted_at
            .map(|at| format!(" ({})", at.format("%Y-%m-%d %H:%M UTC")))
            .unwrap_or_default();
        let body = comment
            .text
            .split('\n')
            .filter(|line| !line.trim().is_empty())
            .collect::<Vec<_>>()
            .join(&format!("\n{indent}  "));
        let _ = writeln!(out, "{indent}- **{}**{posted}: {body}", comment.author);
    }
    out
}
