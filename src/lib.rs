//! Dedup Fetcher Core Library
//!
//! Retrieves a batch of remote documents concurrently, stores each distinct
//! body exactly once (SHA-256 content fingerprint), and reports a per-task
//! outcome without letting one failure abort the batch.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Worker pool, retry policy, transport, dedup index and store
//! - [`config`] - Batch configuration (TOML-loadable, validated)
//! - [`input`] - Task list parsing for the command line front end
//! - [`report`] - JSON batch summary

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod input;
pub mod report;
mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, FetchConfig, RetryConfig};
pub use download::{
    ArtifactStore, BatchReport, BatchStats, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DedupIndex,
    EngineError, FailureKind, FetchError, FetchOutcome, FetchResult, FetchTask, Fetcher,
    Fingerprint, HttpClient, RetryPolicy, Transport,
};
pub use input::{SkippedLine, TaskList, parse_task_list};
pub use report::{BatchSummary, DEFAULT_SUMMARY_FILE, ReportError};
