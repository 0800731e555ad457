//! CLI entry point for the dedup-fetcher tool.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result};
use clap::Parser;
use dedup_fetcher::{ArtifactStore, BatchSummary, FetchConfig, Fetcher, parse_task_list};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
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

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut config = match &args.config {
        Some(path) => FetchConfig::load(path)?,
        None => FetchConfig::default(),
    };
    args.apply_overrides(&mut config);

    // Read input: from positional args, an input file or stdin
    let input_text = if !args.urls.is_empty() {
        args.urls.join("\n")
    } else if let Some(path) = &args.input {
        std::fs::read_to_string(path)
            .with_context(|| format!("cannot read task file {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        info!("No input provided. Pipe tasks via stdin, pass --input or give URLs as arguments.");
        info!("Example: echo 'https://example.com/plan.pdf plan.pdf' | dedup-fetcher -o out");
        return Ok(());
    };

    let task_list = parse_task_list(&input_text);
    for skipped in &task_list.skipped {
        warn!(
            line = skipped.line_number,
            content = %skipped.content,
            reason = %skipped.reason,
            "Skipped malformed task line"
        );
    }
    if task_list.is_empty() {
        info!("No valid tasks found in input");
        return Ok(());
    }

    let fetcher = Fetcher::with_http_client(config)?;
    let summary_path = args.summary_path();
    let mut store = ArtifactStore::open(&args.output_dir)
        .await
        .with_context(|| format!("cannot open output directory {}", args.output_dir.display()))?;
    // artifacts must not land on the summary's name
    if let Some(name) = summary_path
        .as_deref()
        .filter(|path| path.parent() == Some(args.output_dir.as_path()))
        .and_then(|path| path.file_name())
    {
        store = store.reserve_name(&name.to_string_lossy());
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling batch");
                cancel.cancel();
            }
        });
    }

    info!(
        tasks = task_list.len(),
        skipped = task_list.skipped.len(),
        output_dir = %store.root().display(),
        "Fetch starting"
    );

    let report = fetcher.run_batch(task_list.tasks, &store, &cancel).await?;

    for failure in report.failures() {
        if let Some(reason) = failure.failure() {
            warn!(
                url = %failure.task.location(),
                kind = %reason.kind,
                error = %reason.message,
                "Failed"
            );
        }
    }

    if let Some(path) = summary_path {
        BatchSummary::from_report(&report)
            .write_json(&path)
            .with_context(|| format!("cannot write summary {}", path.display()))?;
        info!(path = %path.display(), "Summary written");
    }

    info!(
        saved = report.stats.saved(),
        duplicates = report.stats.duplicates(),
        failed = report.stats.failed(),
        retried = report.stats.retried(),
        unprocessed = report.unprocessed.len(),
        "Fetch complete"
    );

    if report.cancelled {
        warn!(unprocessed = report.unprocessed.len(), "Batch cancelled before completion");
    }

    Ok(())
}
