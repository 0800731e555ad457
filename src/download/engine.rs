//! Batch fetch engine: bounded worker pool with retries and content dedup.
//!
//! [`Fetcher`] runs a batch of [`FetchTask`]s with `min(N, tasks)` workers
//! pulling from one shared queue. Each attempt streams the body into the
//! store's staging area while hashing it; the [`DedupIndex`] then decides
//! whether the body is published or skipped as a duplicate.
//!
//! # Example
//!
//! ```no_run
//! use dedup_fetcher::download::{ArtifactStore, FetchTask, Fetcher};
//! use dedup_fetcher::FetchConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Fetcher::with_http_client(FetchConfig::default())?;
//! let store = ArtifactStore::open("./downloads").await?;
//! let tasks = vec![FetchTask::parse("https://example.com/plan.pdf", None)?];
//! let report = fetcher.run_batch(tasks, &store, &CancellationToken::new()).await?;
//! println!("saved: {}, duplicates: {}", report.stats.saved(), report.stats.duplicates());
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::{BodyStream, HttpClient, Transport};
use super::dedup::{Admission, DedupIndex, Fingerprint, FingerprintHasher};
use super::retry::{RetryDecision, RetryPolicy, classify_error, retry_after_delay};
use super::store::{ArtifactStore, StagedFile};
use super::task::{FailureReason, FetchOutcome, FetchResult, FetchTask};
use super::FetchError;
use crate::config::{ConfigError, FetchConfig};

/// Error type for batch-level engine failures.
///
/// Per-task failures never surface here; they end up in [`FetchResult`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration rejected at construction.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The destination store could not be prepared for the batch.
    #[error("destination store unusable: {0}")]
    Store(#[source] FetchError),
}

/// Counters for one batch run.
///
/// Updated atomically by the workers; read after the batch completes.
#[derive(Debug, Default)]
pub struct BatchStats {
    saved: AtomicUsize,
    duplicates: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
}

impl BatchStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks whose body was published.
    #[must_use]
    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }

    /// Tasks skipped because their content was already published.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }

    /// Tasks that failed after all attempts.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Total finished tasks (saved + duplicates + failed).
    #[must_use]
    pub fn total(&self) -> usize {
        self.saved() + self.duplicates() + self.failed()
    }

    /// Retry attempts made across the batch.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Self {
        Self {
            saved: AtomicUsize::new(self.saved()),
            duplicates: AtomicUsize::new(self.duplicates()),
            failed: AtomicUsize::new(self.failed()),
            retried: AtomicUsize::new(self.retried()),
        }
    }

    fn record(&self, outcome: &FetchOutcome) {
        let counter = match outcome {
            FetchOutcome::Saved { .. } => &self.saved,
            FetchOutcome::DuplicateSkipped { .. } => &self.duplicates,
            FetchOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything a batch produced.
#[derive(Debug)]
pub struct BatchReport {
    /// One result per finished task, in completion order.
    pub results: Vec<FetchResult>,
    /// Tasks never finished because the batch was cancelled (or their worker
    /// panicked), by input index.
    pub unprocessed: Vec<(usize, FetchTask)>,
    /// Whether the cancellation token fired during the batch.
    pub cancelled: bool,
    /// Batch counters.
    pub stats: BatchStats,
}

impl BatchReport {
    /// Results sorted by their input position.
    #[must_use]
    pub fn into_input_order(mut self) -> Vec<FetchResult> {
        self.results.sort_by_key(|r| r.index);
        self.results
    }

    /// Failed results.
    pub fn failures(&self) -> impl Iterator<Item = &FetchResult> {
        self.results.iter().filter(|r| r.failure().is_some())
    }
}

/// Reusable batch fetcher.
///
/// Holds configuration, retry policy and transport; every call to
/// [`run_batch`](Self::run_batch) gets its own worker pool, stats and (unless
/// supplied) its own [`DedupIndex`].
///
/// # Concurrency Model
///
/// - `min(concurrency, tasks)` workers are spawned per batch
/// - Workers pop tasks from a shared queue until it is empty
/// - The dedup lock is held for check + publish + insert only
/// - Cancellation interrupts downloads and backoff sleeps; a fully staged
///   body is always admitted and reported
/// - Batches may overlap on one [`ArtifactStore`]
pub struct Fetcher {
    config: FetchConfig,
    retry_policy: RetryPolicy,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("config", &self.config)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Creates a fetcher over an arbitrary transport.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the configuration fails validation.
    #[instrument(level = "debug", skip(config, transport))]
    pub fn new(config: FetchConfig, transport: Arc<dyn Transport>) -> Result<Self, EngineError> {
        config.validate()?;

        let retry_policy = config.retry_policy();
        debug!(
            concurrency = config.concurrency,
            max_attempts = retry_policy.max_attempts(),
            attempt_timeout_secs = config.attempt_timeout_secs,
            "creating fetcher"
        );

        Ok(Self {
            config,
            retry_policy,
            transport,
        })
    }

    /// Creates a fetcher backed by [`HttpClient`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the configuration fails validation.
    pub fn with_http_client(config: FetchConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let client = HttpClient::with_connect_timeout(config.connect_timeout());
        Self::new(config, Arc::new(client))
    }

    /// Replaces the retry policy derived from the configuration.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Runs a batch with a fresh dedup index.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store's staging area is gone.
    /// Individual task failures do NOT cause this method to error.
    pub async fn run_batch(
        &self,
        tasks: Vec<FetchTask>,
        store: &ArtifactStore,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, EngineError> {
        self.run_batch_with_index(tasks, store, Arc::new(DedupIndex::new()), cancel)
            .await
    }

    /// Runs a batch against a caller-owned dedup index.
    ///
    /// Reusing an index across batches skips content already published by an
    /// earlier batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store's staging area is gone.
    #[instrument(skip_all, fields(tasks = tasks.len(), root = %store.root().display()))]
    pub async fn run_batch_with_index(
        &self,
        tasks: Vec<FetchTask>,
        store: &ArtifactStore,
        index: Arc<DedupIndex>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, EngineError> {
        store.check_ready().await.map_err(EngineError::Store)?;

        let task_count = tasks.len();
        let worker_count = self.config.concurrency.min(task_count);
        let ctx = Arc::new(BatchContext {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            retry_policy: self.retry_policy.clone(),
            store: store.clone(),
            index,
            stats: BatchStats::new(),
            queue: Mutex::new(tasks.into_iter().enumerate().collect()),
            in_flight: Mutex::new(HashMap::new()),
            results: Mutex::new(Vec::with_capacity(task_count)),
            cancel: cancel.clone(),
        });

        info!(task_count, worker_count, "starting batch");

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move { ctx.run_worker(worker_id).await });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                // its in-flight task stays in `in_flight` and is reported unprocessed
                warn!(error = %e, "fetch worker panicked");
            }
        }

        let results = std::mem::take(&mut *ctx.results.lock().await);
        let mut unprocessed: Vec<_> = ctx.in_flight.lock().await.drain().collect();
        unprocessed.extend(ctx.queue.lock().await.drain(..));
        unprocessed.sort_by_key(|(index, _)| *index);

        let stats = match Arc::try_unwrap(ctx) {
            Ok(ctx) => ctx.stats,
            Err(ctx) => ctx.stats.snapshot(),
        };
        let cancelled = cancel.is_cancelled();

        info!(
            saved = stats.saved(),
            duplicates = stats.duplicates(),
            failed = stats.failed(),
            retried = stats.retried(),
            unprocessed = unprocessed.len(),
            cancelled,
            "batch complete"
        );

        Ok(BatchReport {
            results,
            unprocessed,
            cancelled,
            stats,
        })
    }
}

/// State shared by the workers of one batch.
struct BatchContext {
    transport: Arc<dyn Transport>,
    config: FetchConfig,
    retry_policy: RetryPolicy,
    store: ArtifactStore,
    index: Arc<DedupIndex>,
    stats: BatchStats,
    queue: Mutex<VecDeque<(usize, FetchTask)>>,
    /// Picked but not finished, by input index.
    in_flight: Mutex<HashMap<usize, FetchTask>>,
    results: Mutex<Vec<FetchResult>>,
    cancel: CancellationToken,
}

/// A body that made it through an attempt and the dedup index.
struct Fetched {
    admission: Admission,
    fingerprint: Fingerprint,
    bytes: u64,
}

impl BatchContext {
    /// Pulls tasks until the queue is empty or the batch is cancelled.
    ///
    /// A task interrupted by cancellation stays in `in_flight`.
    async fn run_worker(&self, worker_id: usize) {
        while !self.cancel.is_cancelled() {
            let Some((index, task)) = self.queue.lock().await.pop_front() else {
                break;
            };
            debug!(worker_id, index, url = %task.location(), "picked task");
            self.in_flight.lock().await.insert(index, task.clone());

            let Some(result) = self.fetch_task(index, &task).await else {
                debug!(worker_id, index, "task interrupted by cancellation");
                break;
            };
            self.results.lock().await.push(result);
            self.in_flight.lock().await.remove(&index);
        }
    }

    /// Returns `None` when cancellation interrupted the task before a body was staged.
    async fn fetch_task(&self, index: usize, task: &FetchTask) -> Option<FetchResult> {
        let (outcome, attempts) = self.fetch_with_retry(task).await?;

        let result = match outcome {
            Ok(Fetched {
                admission: Admission::Published(destination),
                fingerprint,
                bytes,
            }) => {
                info!(
                    url = %task.location(),
                    destination = %destination.display(),
                    %fingerprint,
                    bytes,
                    attempts,
                    "saved"
                );
                FetchResult {
                    index,
                    task: task.clone(),
                    outcome: FetchOutcome::Saved { destination },
                    fingerprint: Some(fingerprint),
                    bytes_written: Some(bytes),
                    attempts,
                }
            }
            Ok(Fetched {
                admission: Admission::Duplicate(first_destination),
                fingerprint,
                ..
            }) => {
                info!(
                    url = %task.location(),
                    first = %first_destination.display(),
                    %fingerprint,
                    "duplicate content skipped"
                );
                FetchResult {
                    index,
                    task: task.clone(),
                    outcome: FetchOutcome::DuplicateSkipped { first_destination },
                    fingerprint: Some(fingerprint),
                    bytes_written: None,
                    attempts,
                }
            }
            Err(e) => {
                let reason = FailureReason::from_error(&e);
                warn!(
                    url = %task.location(),
                    kind = %reason.kind,
                    error = %e,
                    attempts,
                    "fetch failed after all attempts"
                );
                FetchResult {
                    index,
                    task: task.clone(),
                    outcome: FetchOutcome::Failed(reason),
                    fingerprint: None,
                    bytes_written: None,
                    attempts,
                }
            }
        };

        self.stats.record(&result.outcome);
        Some(result)
    }

    /// Runs attempts until one succeeds or the retry policy gives up.
    ///
    /// Returns the final outcome and the number of attempts made, or `None`
    /// if the batch was cancelled during a download or a backoff sleep.
    #[instrument(skip(self, task), fields(url = %task.location()))]
    async fn fetch_with_retry(&self, task: &FetchTask) -> Option<(Result<Fetched, FetchError>, u32)> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "attempting fetch");

            let downloaded = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                downloaded = self.download_within_timeout(task) => downloaded,
            };
            // past this point the body is staged: admit it even if the batch is cancelled
            let outcome = match downloaded {
                Ok((staged, fingerprint)) => self.admit(task, staged, fingerprint).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(fetched) => return Some((Ok(fetched), attempt)),
                Err(e) => {
                    let failure_type = classify_error(&e);
                    let server_delay = retry_after_delay(&e, &self.retry_policy);

                    match self.retry_policy.should_retry(failure_type, attempt) {
                        RetryDecision::Retry {
                            delay: backoff_delay,
                            attempt: next_attempt,
                        } => {
                            let delay = server_delay.unwrap_or(backoff_delay);
                            info!(
                                url = %task.location(),
                                attempt = next_attempt,
                                max_attempts = self.retry_policy.max_attempts(),
                                delay_ms = delay.as_millis(),
                                using_retry_after = server_delay.is_some(),
                                error = %e,
                                "retrying fetch"
                            );
                            self.stats.increment_retried();
                            tokio::select! {
                                biased;
                                () = self.cancel.cancelled() => return None,
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(url = %task.location(), %reason, "not retrying fetch");
                            return Some((Err(e), attempt));
                        }
                    }
                }
            }
        }
    }

    /// Downloads one body, bounded by the attempt timeout.
    async fn download_within_timeout(
        &self,
        task: &FetchTask,
    ) -> Result<(StagedFile, Fingerprint), FetchError> {
        tokio::time::timeout(self.config.attempt_timeout(), self.download_to_staging(task))
            .await
            .map_err(|_| FetchError::timeout(task.location().as_str()))?
    }

    /// Offers a staged body to the dedup index.
    async fn admit(
        &self,
        task: &FetchTask,
        staged: StagedFile,
        fingerprint: Fingerprint,
    ) -> Result<Fetched, FetchError> {
        let bytes = staged.bytes_written();
        let admission = self
            .index
            .admit(fingerprint, staged, &self.store, task.destination())
            .await?;

        Ok(Fetched {
            admission,
            fingerprint,
            bytes,
        })
    }

    /// Streams the response body into a staging file, hashing as it goes.
    ///
    /// The staging file is discarded on every error path.
    async fn download_to_staging(
        &self,
        task: &FetchTask,
    ) -> Result<(StagedFile, Fingerprint), FetchError> {
        let url = task.location();
        let response = self.transport.get(url).await?;

        if !self
            .config
            .accepts_content_type(response.content_type.as_deref())
        {
            return Err(FetchError::unexpected_content(
                url.as_str(),
                response.content_type.unwrap_or_default(),
            ));
        }

        let mut staged = self.store.stage().await?;
        match stream_body(url, response.body, response.content_length, &mut staged).await {
            Ok(fingerprint) => Ok((staged, fingerprint)),
            Err(e) => {
                self.store.discard(staged).await;
                Err(e)
            }
        }
    }
}

async fn stream_body(
    url: &Url,
    mut body: BodyStream,
    content_length: Option<u64>,
    staged: &mut StagedFile,
) -> Result<Fingerprint, FetchError> {
    let mut hasher = FingerprintHasher::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        staged.write_chunk(&chunk).await?;
    }

    if let Some(expected) = content_length
        && expected != staged.bytes_written()
    {
        return Err(FetchError::integrity(
            url.as_str(),
            expected,
            staged.bytes_written(),
        ));
    }

    staged.finish().await?;
    Ok(hasher.finalize())
}
