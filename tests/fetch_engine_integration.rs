//! Integration tests for the fetch engine against a mock HTTP server.
//!
//! These tests drive `Fetcher` with the real reqwest-backed `HttpClient`,
//! covering dedup, retry, Retry-After, timeouts and the content-type filter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dedup_fetcher::{
    ArtifactStore, BatchSummary, FailureKind, FetchConfig, FetchOutcome, FetchTask, Fetcher,
    Fingerprint, RetryConfig,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, Respond, ResponseTemplate};

mod support;
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return socket_skip_return();
        };
        mock_server
    }};
}

// ==================== Helper Functions ====================

/// Config with millisecond backoff so retry tests stay fast.
fn fast_config(concurrency: usize, max_retries: u32) -> FetchConfig {
    FetchConfig {
        concurrency,
        retry: RetryConfig {
            max_retries,
            base_delay_ms: 10,
            max_delay_ms: 50,
            max_jitter_ms: 0,
        },
        ..FetchConfig::default()
    }
}

fn task_for(server_uri: &str, route: &str) -> Result<FetchTask, Box<dyn std::error::Error>> {
    Ok(FetchTask::parse(&format!("{server_uri}{route}"), None)?)
}

/// Responder that fails the first `fail_count` requests with 503, then serves `body`.
struct FlakyResponder {
    request_count: Arc<AtomicUsize>,
    fail_count: usize,
    body: &'static [u8],
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.body)
        }
    }
}

// ==================== Dedup ====================

#[tokio::test]
async fn test_identical_bodies_from_two_urls_saved_once() -> Result<(), Box<dyn std::error::Error>>
{
    let mock_server = require_mock_server!();
    for route in ["/commune/75056/DICRIM.pdf", "/mirror/dicrim-paris.pdf"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"XYZ"))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let dir = TempDir::new()?;
    let store = ArtifactStore::open(dir.path()).await?;
    let fetcher = Fetcher::with_http_client(fast_config(2, 0))?;
    let tasks = vec![
        task_for(&mock_server.uri(), "/commune/75056/DICRIM.pdf")?,
        task_for(&mock_server.uri(), "/mirror/dicrim-paris.pdf")?,
    ];

    let report = fetcher
        .run_batch(tasks, &store, &CancellationToken::new())
        .await?;

    assert_eq!(report.stats.saved(), 1);
    assert_eq!(report.stats.duplicates(), 1);
    let saved = report.results.iter().find(|r| r.is_saved()).ok_or("no saved result")?;
    assert_eq!(saved.fingerprint, Some(Fingerprint::of(b"XYZ")));
    let FetchOutcome::Saved { destination } = &saved.outcome else {
        return Err("expected saved outcome".into());
    };
    let duplicate = report
        .results
        .iter()
        .find(|r| r.is_duplicate())
        .ok_or("no duplicate result")?;
    assert_eq!(
        duplicate.outcome,
        FetchOutcome::DuplicateSkipped {
            first_destination: destination.clone()
        }
    );
    assert_eq!(std::fs::read(destination)?, b"XYZ");
    Ok(())
}

// ==================== Retry ====================

#[tokio::test]
async fn test_always_500_exhausts_retry_budget() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/broken.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let store = ArtifactStore::open(dir.path()).await?;
    let fetcher = Fetcher::with_http_client(fast_config(1, 2))?;

    let report = fetcher
        .run_batch(
            vec![task_for(&mock_server.uri(), "/broken.pdf")?],
            &store,
            &CancellationToken::new(),
        )
        .await?;

    let result = &report.results[0];
    assert_eq!(result.attempts, 3);
    assert_eq!(
        result.failure().map(|f| f.kind),
        Some(FailureKind::TransientNetworkError)
    );
    assert!(!dir.path().join("broken.pdf").exists());
    Ok(())
}

#[tokio::test]
async fn test_404_is_not_retried() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let store = ArtifactStore::open(dir.path()).await?;
    let fetcher = Fetcher::with_http_client(fast_config(1, 3))?;

    let report = fetcher
        .run_batch(
            vec![task_for(&mock_server.uri(), "/missing.pdf")?],
            &store,
            &CancellationToken::new(),
        )
        .await?;

    let result = &report.results[0];
    assert_eq!(result.attempts, 1);
    assert_eq!(
        result.failure().map(|f| f.kind),
        Some(FailureKind::PermanentClientError)
    );
    Ok(())
}

#[tokio::test]
async fn test_flaky_server_succeeds_after_retries() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    let request_count = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/flaky.csv"))
        .respond_with(FlakyResponder {
            request_count: Arc::clone(&request_count),
            fail_count: 2,
            body: b"commune;risque\n75056;inondation\n",
        })
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let store = ArtifactStore::open(dir.path()).await?;
    let fetcher = Fetcher::with_http_client(fast_config(1, 3))?;

    let report = fetcher
        .run_batch(
            vec![task_for(&mock_server.uri(), "/flaky.csv")?],
            &store,
            &CancellationToken::new(),
        )
        .await?;

    let result = &report.results[0];
    assert!(result.is_saved(), "{:?}", result.outcome);
    assert_eq!(result.attempts, 3);
    assert_eq!(request_count.load(Ordering::SeqCst), 3);
    assert_eq!(report.stats.retried(), 2);
    assert_eq!(
        std::fs::read(dir.path().join("flaky.csv"))?,
        b"commune;risque\n75056;inondation\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_429_with_retry_after_is_retried() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/busy.json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(br#"{"ok":true}"#))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let store = ArtifactStore::open(dir.path()).await?;
    let fetcher = Fetcher::with_http_client(fast_config(1, 1))?;

    let report = fetcher
        .run_batch(
            vec![task_for(&mock_server.uri(), "/busy.json")?],
            &store,
            &CancellationToken::new(),
        )
        .await?;

    assert!(report.results[0].is_saved());
    assert_eq!(report.results[0].attempts, 2);
    Ok(())
}

// ==================== Timeouts and filters ====================

#[tokio::test]
async fn test_slow_response_times_out_as_transient() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/slow.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let store = ArtifactStore::open(dir.path()).await?;
    let config = FetchConfig {
        attempt_timeout_secs: 1,
        ..fast_config(1, 0)
    };
    let fetcher = Fetcher::with_http_client(config)?;

    let report = fetcher
        .run_batch(
            vec![task_for(&mock_server.uri(), "/slow.pdf")?],
            &store,
            &CancellationToken::new(),
        )
        .await?;

    let failure = report.results[0].failure().ok_or("expected failure")?;
    assert_eq!(failure.kind, FailureKind::TransientNetworkError);
    assert!(failure.message.contains("timeout"), "{}", failure.message);
    assert_eq!(std::fs::read_dir(store.staging_dir())?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_content_type_filter_rejects_html() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/plan.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/pdf")
                .set_body_bytes(b"%PDF-1.7"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=utf-8")
                .set_body_bytes(b"<html>login</html>"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let store = ArtifactStore::open(dir.path()).await?;
    let config = FetchConfig {
        accepted_content_types: vec!["application/pdf".into()],
        ..fast_config(2, 3)
    };
    let fetcher = Fetcher::with_http_client(config)?;

    let report = fetcher
        .run_batch(
            vec![
                task_for(&mock_server.uri(), "/plan.pdf")?,
                task_for(&mock_server.uri(), "/login")?,
            ],
            &store,
            &CancellationToken::new(),
        )
        .await?;

    let results = report.into_input_order();
    assert!(results[0].is_saved());
    assert_eq!(
        results[1].failure().map(|f| f.kind),
        Some(FailureKind::PermanentClientError)
    );
    Ok(())
}

// ==================== Summary ====================

#[tokio::test]
async fn test_mixed_batch_summary() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/a.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"A"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a-copy.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"A"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.pdf"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new()?;
    let store = ArtifactStore::open(dir.path().join("out")).await?;
    let fetcher = Fetcher::with_http_client(fast_config(3, 1))?;
    let tasks = ["/a.pdf", "/a-copy.pdf", "/gone.pdf"]
        .iter()
        .map(|route| task_for(&mock_server.uri(), route))
        .collect::<Result<Vec<_>, _>>()?;

    let report = fetcher
        .run_batch(tasks, &store, &CancellationToken::new())
        .await?;
    assert_eq!(report.results.len(), 3);

    let summary_path = dir.path().join("summary.json");
    BatchSummary::from_report(&report).write_json(&summary_path)?;
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&summary_path)?)?;

    assert_eq!(value["total_tasks"], 3);
    assert_eq!(value["saved"], 1);
    assert_eq!(value["duplicates"], 1);
    assert_eq!(value["failed"], 1);
    assert_eq!(value["failures"][0]["index"], 2);
    assert_eq!(value["failures"][0]["kind"], "PermanentClientError");
    Ok(())
}
