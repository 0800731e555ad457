//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use dedup_fetcher::FetchConfig;

/// Fetch a batch of documents concurrently, storing each distinct body once.
///
/// Tasks come from positional arguments, an input file or stdin, one per
/// line: `URL` or `URL NAME`. Lines starting with `#` are ignored.
#[derive(Parser, Debug)]
#[command(name = "dedup-fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// Tasks given directly (`URL` or `"URL NAME"`)
    pub urls: Vec<String>,

    /// Read tasks from this file instead of stdin
    #[arg(short = 'i', long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Destination directory
    #[arg(short = 'o', long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// TOML configuration file; command-line flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum concurrent fetches (1-100) [default: 5]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Retries after the first attempt for transient failures (0-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Per-attempt timeout in seconds (1-3600) [default: 10]
    #[arg(short = 't', long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Connect timeout in seconds (1-3600) [default: 10]
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// Delay before the first retry in milliseconds [default: 1000]
    #[arg(long, value_name = "MS")]
    pub backoff_base_ms: Option<u64>,

    /// Backoff cap in milliseconds [default: 32000]
    #[arg(long, value_name = "MS")]
    pub backoff_max_ms: Option<u64>,

    /// Only store responses whose Content-Type starts with one of these prefixes
    #[arg(short = 'a', long = "accept", value_name = "TYPE", value_delimiter = ',')]
    pub accept: Vec<String>,

    /// Summary file path [default: <OUTPUT_DIR>/download_summary.json]
    #[arg(long, value_name = "FILE", conflicts_with = "no_summary")]
    pub summary: Option<PathBuf>,

    /// Do not write a summary file
    #[arg(long)]
    pub no_summary: bool,
}

impl Args {
    /// Applies command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut FetchConfig) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = usize::from(concurrency);
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = u32::from(max_retries);
        }
        if let Some(timeout) = self.timeout {
            config.attempt_timeout_secs = timeout;
        }
        if let Some(connect_timeout) = self.connect_timeout {
            config.connect_timeout_secs = connect_timeout;
        }
        if let Some(base) = self.backoff_base_ms {
            config.retry.base_delay_ms = base;
        }
        if let Some(max) = self.backoff_max_ms {
            config.retry.max_delay_ms = max;
        }
        if !self.accept.is_empty() {
            config.accepted_content_types.clone_from(&self.accept);
        }
    }

    /// Where the summary goes, if anywhere.
    pub fn summary_path(&self) -> Option<PathBuf> {
        if self.no_summary {
            return None;
        }
        Some(
            self.summary
                .clone()
                .unwrap_or_else(|| self.output_dir.join(dedup_fetcher::DEFAULT_SUMMARY_FILE)),
        )
    }
}
