//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Harvest articles, media and discussions from news sources.
///
/// Each article is written as a bundle under
/// `<output>/<source>/<NNN>-<slug>/` with `article.md`, `media/`,
/// `comments.md` and `result.json`.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Source ids or group names (repeatable, comma-separated allowed)
    #[arg(short = 's', long = "source", value_delimiter = ',')]
    pub sources: Vec<String>,

    /// Articles to fetch per source
    #[arg(short = 'n', long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub count: u16,

    /// Output root directory
    #[arg(short = 'o', long, default_value = "harvest")]
    pub output: PathBuf,

    /// Also download video, audio and documents (images are always fetched)
    #[arg(long)]
    pub media: bool,

    /// Worker-pool size (1-64); overrides the config file
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub concurrency: Option<u8>,

    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory of additional JSON source descriptors
    #[arg(long)]
    pub sources_dir: Option<PathBuf>,

    /// SQLite database recording per-source metrics across runs
    #[arg(long)]
    pub history_db: Option<PathBuf>,

    /// List registered sources and groups, then exit
    #[arg(long)]
    pub list_sources: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
