//! JSON batch summary written next to the downloads.
//!
//! The summary is the hand-off point for external reporting: one entry per
//! task in input order, the failures with their category, and the batch
//! counters.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::download::{BatchReport, FailureKind, FetchOutcome};

/// Default summary file name inside the destination directory.
pub const DEFAULT_SUMMARY_FILE: &str = "download_summary.json";

/// Errors produced while writing a summary.
#[derive(Debug, Error)]
pub enum ReportError {
    /// I/O error writing the summary file.
    #[error("I/O error writing summary: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error (shouldn't occur for well-formed structs).
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serializable view of a [`BatchReport`].
#[derive(Debug, Serialize)]
pub struct BatchSummary {
    /// Tasks submitted.
    pub total_tasks: usize,
    /// Tasks whose body was published.
    pub saved: usize,
    /// Tasks skipped as content duplicates.
    pub duplicates: usize,
    /// Tasks that failed.
    pub failed: usize,
    /// Retry attempts made.
    pub retried: usize,
    /// Whether the batch was cancelled.
    pub cancelled: bool,
    /// Finished tasks, in input order.
    pub entries: Vec<SummaryEntry>,
    /// Failed tasks, in input order.
    pub failures: Vec<FailureEntry>,
    /// Tasks not finished because of cancellation.
    pub unprocessed: Vec<UnprocessedEntry>,
}

/// One finished task.
#[derive(Debug, Serialize)]
pub struct SummaryEntry {
    /// Input position.
    pub index: usize,
    /// Requested URL.
    pub url: String,
    /// `saved`, `duplicate` or `failed`.
    pub status: &'static str,
    /// Published path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Path of the first copy, for duplicates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
    /// Hex SHA-256 of the body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Bytes published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    /// Attempts made.
    pub attempts: u32,
}

/// One failed task.
#[derive(Debug, Serialize)]
pub struct FailureEntry {
    /// Input position.
    pub index: usize,
    /// Requested URL.
    pub url: String,
    /// Failure category.
    pub kind: FailureKind,
    /// Error of the last attempt.
    pub message: String,
}

/// One task left behind by cancellation.
#[derive(Debug, Serialize)]
pub struct UnprocessedEntry {
    /// Input position.
    pub index: usize,
    /// Requested URL.
    pub url: String,
}

impl BatchSummary {
    /// Builds the summary of a finished batch.
    #[must_use]
    pub fn from_report(report: &BatchReport) -> Self {
        let mut results: Vec<_> = report.results.iter().collect();
        results.sort_by_key(|r| r.index);

        let mut entries = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            let url = result.task.location().to_string();
            let (destination, duplicate_of) = match &result.outcome {
                FetchOutcome::Saved { destination } => (Some(destination.display().to_string()), None),
                FetchOutcome::DuplicateSkipped { first_destination } => {
                    (None, Some(first_destination.display().to_string()))
                }
                FetchOutcome::Failed(reason) => {
                    failures.push(FailureEntry {
                        index: result.index,
                        url: url.clone(),
                        kind: reason.kind,
                        message: reason.message.clone(),
                    });
                    (None, None)
                }
            };
            entries.push(SummaryEntry {
                index: result.index,
                url,
                status: result.outcome.label(),
                destination,
                duplicate_of,
                sha256: result.fingerprint.map(|fp| fp.to_hex()),
                bytes: result.bytes_written,
                attempts: result.attempts,
            });
        }

        let unprocessed: Vec<_> = report
            .unprocessed
            .iter()
            .map(|(index, task)| UnprocessedEntry {
                index: *index,
                url: task.location().to_string(),
            })
            .collect();

        Self {
            total_tasks: entries.len() + unprocessed.len(),
            saved: report.stats.saved(),
            duplicates: report.stats.duplicates(),
            failed: report.stats.failed(),
            retried: report.stats.retried(),
            cancelled: report.cancelled,
            entries,
            failures,
            unprocessed,
        }
    }

    /// Writes the summary as pretty-printed JSON, replacing any existing file.
    ///
    /// The JSON goes to a hidden sibling first and is renamed over `path`
    /// once complete, so readers never see a half-written summary.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] on I/O or serialization failure. The partial
    /// sibling is removed and `path` is left untouched.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let partial = partial_path(path);
        let write_result = self
            .write_partial(&partial)
            .and_then(|()| fs::rename(&partial, path).map_err(ReportError::from));
        if let Err(err) = write_result {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }
        debug!("summary written");
        Ok(())
    }

    fn write_partial(&self, partial: &Path) -> Result<(), ReportError> {
        let mut writer = BufWriter::new(fs::File::create(partial)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "summary".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{name}.partial"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::download::{
        BatchStats, FailureReason, FetchError, FetchResult, FetchTask, Fingerprint,
    };
    use tempfile::TempDir;

    fn result(index: usize, path: &str, outcome: FetchOutcome) -> FetchResult {
        let saved = matches!(outcome, FetchOutcome::Saved { .. });
        let failed = matches!(outcome, FetchOutcome::Failed(_));
        FetchResult {
            index,
            task: FetchTask::parse(&format!("https://files.example.fr{path}"), None).unwrap(),
            outcome,
            fingerprint: (!failed).then(|| Fingerprint::of(b"XYZ")),
            bytes_written: saved.then_some(3),
            attempts: 1,
        }
    }

    fn sample_report() -> BatchReport {
        let results = vec![
            result(
                1,
                "/b.pdf",
                FetchOutcome::DuplicateSkipped {
                    first_destination: PathBuf::from("out/a.pdf"),
                },
            ),
            result(
                0,
                "/a.pdf",
                FetchOutcome::Saved {
                    destination: PathBuf::from("out/a.pdf"),
                },
            ),
            result(
                2,
                "/gone.pdf",
                FetchOutcome::Failed(FailureReason::from_error(&FetchError::http_status(
                    "https://files.example.fr/gone.pdf",
                    404,
                ))),
            ),
        ];
        BatchReport {
            results,
            unprocessed: vec![(
                3,
                FetchTask::parse("https://files.example.fr/late.pdf", None).unwrap(),
            )],
            cancelled: true,
            stats: BatchStats::new(),
        }
    }

    #[test]
    fn test_summary_entries_are_in_input_order() {
        let summary = BatchSummary::from_report(&sample_report());
        let indices: Vec<_> = summary.entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(summary.total_tasks, 4);
        assert!(summary.cancelled);
        assert_eq!(summary.entries[0].status, "saved");
        assert_eq!(summary.entries[1].duplicate_of.as_deref(), Some("out/a.pdf"));
        assert_eq!(summary.unprocessed[0].url, "https://files.example.fr/late.pdf");
    }

    #[test]
    fn test_summary_lists_failures_with_kind() {
        let summary = BatchSummary::from_report(&sample_report());
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, FailureKind::PermanentClientError);
        assert!(summary.failures[0].message.contains("404"));
    }

    #[test]
    fn test_write_json_round_trips_through_serde_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_SUMMARY_FILE);
        BatchSummary::from_report(&sample_report())
            .write_json(&path)
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["entries"][0]["sha256"], Fingerprint::of(b"XYZ").to_hex());
        assert_eq!(value["entries"][0]["bytes"], 3);
        assert!(value["entries"][1].get("bytes").is_none());
        assert_eq!(value["failures"][0]["kind"], "PermanentClientError");
    }

    #[test]
    fn test_write_json_replaces_existing_summary_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_SUMMARY_FILE);
        std::fs::write(&path, b"stale").unwrap();

        BatchSummary::from_report(&sample_report())
            .write_json(&path)
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with('{'));
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(DEFAULT_SUMMARY_FILE)]);
    }

    #[test]
    fn test_write_json_into_missing_directory_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join(DEFAULT_SUMMARY_FILE);
        let err = BatchSummary::from_report(&sample_report())
            .write_json(&path)
            .unwrap_err();
        assert!(matches!(err, ReportError::Io(_)));
        assert!(!path.exists());
    }
}
