//! Constants for the download module (timeouts, pool size, backoff).

use std::time::Duration;

/// Default worker count for a batch.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default retry budget (retries after the first attempt).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-attempt timeout (10 seconds, request plus full body).
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 10;

/// Default HTTP connect timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Upper bound accepted for any configured timeout (1 hour).
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Default base delay for exponential backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default maximum backoff delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(32);

/// Default maximum jitter added on top of the backoff delay.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(250);

/// Directory (inside the store root) holding bodies that are still being written.
pub const STAGING_DIR_NAME: &str = ".partial";

/// Name used when a suggested filename sanitizes to nothing.
pub const FALLBACK_FILENAME: &str = "unnamed";
