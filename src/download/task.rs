//! Batch input and output records.
//!
//! A [`FetchTask`] describes one resource to retrieve; the engine answers each
//! finished task with exactly one [`FetchResult`].

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use url::Url;

use super::FetchError;
use super::dedup::Fingerprint;
use super::filename::{filename_from_url, sanitize_filename};
use super::retry::{FailureType, classify_error};

/// One unit of work: where to fetch from and the name to store it under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    location: Url,
    destination: String,
}

impl FetchTask {
    /// Creates a task with an explicit suggested filename.
    ///
    /// The name is sanitized; an empty name falls back to `unnamed`.
    #[must_use]
    pub fn new(location: Url, destination: &str) -> Self {
        Self {
            location,
            destination: sanitize_filename(destination),
        }
    }

    /// Creates a task whose destination is the last path segment of the URL.
    #[must_use]
    pub fn from_url(location: Url) -> Self {
        let destination = filename_from_url(&location);
        Self {
            location,
            destination,
        }
    }

    /// Parses `location` and creates a task.
    ///
    /// Passing `None` as destination derives it from the URL.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] when the string is not an absolute
    /// `http` or `https` URL.
    pub fn parse(location: &str, destination: Option<&str>) -> Result<Self, FetchError> {
        let url = Url::parse(location.trim())
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
            .ok_or_else(|| FetchError::invalid_url(location))?;
        Ok(match destination {
            Some(name) => Self::new(url, name),
            None => Self::from_url(url),
        })
    }

    /// Remote location.
    #[must_use]
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Sanitized suggested filename.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }
}

impl fmt::Display for FetchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.location, self.destination)
    }
}

/// Reported failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Timeout, connection reset, 5xx or 429 that outlived the retry budget.
    TransientNetworkError,
    /// 4xx other than 408/429, malformed or unexpected content. Never retried.
    PermanentClientError,
    /// Destination store write failure. Never retried.
    StorageError,
}

impl From<FailureType> for FailureKind {
    fn from(failure_type: FailureType) -> Self {
        match failure_type {
            FailureType::Transient | FailureType::RateLimited => Self::TransientNetworkError,
            FailureType::Permanent => Self::PermanentClientError,
            FailureType::Storage => Self::StorageError,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TransientNetworkError => "TransientNetworkError",
            Self::PermanentClientError => "PermanentClientError",
            Self::StorageError => "StorageError",
        };
        f.write_str(label)
    }
}

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    /// Failure category.
    pub kind: FailureKind,
    /// Rendered error of the last attempt.
    pub message: String,
}

impl FailureReason {
    /// Builds a reason from the error of the last attempt.
    #[must_use]
    pub fn from_error(error: &FetchError) -> Self {
        Self {
            kind: classify_error(error).into(),
            message: error.to_string(),
        }
    }
}

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Body was new; it is stored at `destination`.
    Saved {
        /// Published path inside the store.
        destination: PathBuf,
    },
    /// Body matched an earlier fingerprint; nothing was written.
    DuplicateSkipped {
        /// Where the first copy of this content was published.
        first_destination: PathBuf,
    },
    /// Retries exhausted or a non-retryable error occurred.
    Failed(FailureReason),
}

impl FetchOutcome {
    /// Short label used in logs and summaries.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Saved { .. } => "saved",
            Self::DuplicateSkipped { .. } => "duplicate",
            Self::Failed(_) => "failed",
        }
    }
}

/// Result record for one task.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Position of the task in the submitted batch.
    pub index: usize,
    /// The task this result answers.
    pub task: FetchTask,
    /// What happened.
    pub outcome: FetchOutcome,
    /// SHA-256 of the body, when one was fully retrieved.
    pub fingerprint: Option<Fingerprint>,
    /// Bytes published to the store (only for [`FetchOutcome::Saved`]).
    pub bytes_written: Option<u64>,
    /// Attempts made, including the first.
    pub attempts: u32,
}

impl FetchResult {
    /// Returns true for [`FetchOutcome::Saved`].
    #[must_use]
    pub fn is_saved(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Saved { .. })
    }

    /// Returns true for [`FetchOutcome::DuplicateSkipped`].
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self.outcome, FetchOutcome::DuplicateSkipped { .. })
    }

    /// Returns the failure reason, if the task failed.
    #[must_use]
    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.outcome {
            FetchOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}
