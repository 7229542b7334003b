//! CLI entry point for the harvester tool.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::{
    ConnectionPool, FetchOrchestrator, HarvestConfig, MetricsHistory, RunReport,
    SourceRegistry, build_default_source_registry,
};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries the JSON report
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = load_config(&args)?;
    let pool = ConnectionPool::new(config.connect_timeout_secs, config.read_timeout_secs)
        .context("cannot build HTTP client")?;

    let mut registry = build_default_source_registry(pool);
    if let Some(dir) = &args.sources_dir {
        let accepted = registry
            .register_descriptor_dir(dir)
            .with_context(|| format!("cannot read sources directory {}", dir.display()))?;
        info!(accepted, rejected = registry.rejected().len(), "loaded extra sources");
    }

    if args.list_sources {
        print_sources(&registry);
        return Ok(ExitCode::SUCCESS);
    }

    if args.sources.is_empty() {
        info!("No sources requested. Pass --source <id|group> or --list-sources.");
        info!("Example: harvester --source news --count 5");
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_signal = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight articles");
            cancel_signal.store(true, Ordering::SeqCst);
        }
    });

    let orchestrator =
        FetchOrchestrator::new(Arc::new(registry), &config)?.with_cancellation(cancel);

    info!("Harvester starting");
    let report = orchestrator
        .run(&args.sources, usize::from(args.count), &args.output)
        .await?;

    if let Some(path) = &args.history_db
        && let Err(e) = record_history(path, &report).await
    {
        warn!(error = %e, path = %path.display(), "failed to record metrics history");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped = report.skipped(),
        "Harvest complete"
    );

    Ok(ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1)))
}

fn load_config(args: &Args) -> Result<HarvestConfig> {
    let mut config = match &args.config {
        Some(path) => HarvestConfig::from_json_file(path)?,
        None => HarvestConfig::default(),
    };
    if let Some(concurrency) = args.concurrency {
        config.concurrency = usize::from(concurrency);
    }
    config.include_non_image_media |= args.media;
    config.validate()?;
    debug!(?config, "configuration loaded");
    Ok(config)
}

async fn record_history(path: &std::path::Path, report: &RunReport) -> Result<()> {
    let history = MetricsHistory::open(path).await?;
    let stored = history.record_run(&report.run_id, &report.metrics).await?;
    history.close().await;
    debug!(stored, "metrics history updated");
    Ok(())
}

fn print_sources(registry: &SourceRegistry) {
    println!("Sources:");
    for (id, descriptor) in registry.discover() {
        let comments = if descriptor.supports_comments {
            ", comments"
        } else {
            ""
        };
        println!(
            "  {id:<16} {} [{}, {}{comments}]",
            descriptor.name, descriptor.category, descriptor.discovery
        );
    }
    println!("Groups:");
    for (group, members) in registry.groups() {
        println!("  {group:<16} {}", members.join(", "));
    }
}
