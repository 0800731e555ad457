//! Concurrent fetch engine with content-hash deduplication.
//!
//! This module provides everything needed to retrieve a batch of remote
//! documents into one directory, storing each distinct body exactly once.
//!
//! # Features
//!
//! - Bounded worker pool shared across one batch
//! - Streaming bodies hashed with SHA-256 while they are staged
//! - Atomic publish with collision suffixes (`_2`, `_3`, ...)
//! - Exponential backoff with jitter and Retry-After support
//! - Cooperative cancellation through [`CancellationToken`](tokio_util::sync::CancellationToken)
//! - Pluggable [`Transport`] (reqwest-backed [`HttpClient`] by default)

pub mod constants;
mod client;
mod dedup;
mod engine;
mod error;
mod filename;
mod retry;
mod store;
mod task;

pub use client::{BodyStream, FetchResponse, HttpClient, Transport};
pub use constants::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
pub use dedup::{Admission, DedupIndex, Fingerprint, FingerprintHasher};
pub use engine::{BatchReport, BatchStats, EngineError, Fetcher};
pub use error::FetchError;
pub use filename::{filename_from_url, resolve_unique_path, sanitize_filename};
pub use retry::{
    FailureType, RetryDecision, RetryPolicy, classify_error, is_retryable, parse_retry_after,
};
pub use store::{ArtifactStore, StagedFile};
pub use task::{FailureKind, FailureReason, FetchOutcome, FetchResult, FetchTask};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, FetchError>` explicitly in function signatures.
