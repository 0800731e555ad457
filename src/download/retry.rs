//! Retry logic with exponential backoff for transient fetch failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying fetch errors and determining retry behavior. The policy knows
//! nothing about HTTP clients: it only sees [`FailureType`] values.
//!
//! # Overview
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Temporary failures that may succeed on retry
//! - [`FailureType::RateLimited`] - Server rate limiting (retries with backoff)
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//! - [`FailureType::Storage`] - Local write failures (retrying rarely helps)
//!
//! # Example
//!
//! ```
//! use dedup_fetcher::download::{
//!     FetchError, RetryPolicy, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = FetchError::http_status("https://example.com/file.pdf", 503);
//! let failure_type = classify_error(&error);
//!
//! match policy.should_retry(failure_type, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::FetchError;
use super::constants::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_MAX_JITTER, DEFAULT_MAX_RETRIES,
};

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Classification of fetch failure types.
///
/// Used to determine whether a failed attempt should be retried and how the
/// failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: attempt timeout, 5xx server errors, connection reset.
    Transient,

    /// Server rate limiting (HTTP 429).
    RateLimited,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 400 Bad Request, invalid URL, wrong content type.
    Permanent,

    /// Destination store failure.
    Storage,
}

/// Default retryable predicate: transient and rate-limited failures.
#[must_use]
pub fn is_retryable(failure_type: FailureType) -> bool {
    matches!(
        failure_type,
        FailureType::Transient | FailureType::RateLimited
    )
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3 (so at most 4 attempts)
/// - `base_delay`: 1 second
/// - `max_delay`: 32 seconds
/// - `backoff_multiplier`: 2.0
/// - `max_jitter`: 250 milliseconds
/// - `retryable`: [`is_retryable`]
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    max_retries: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt (typically 2.0 for doubling).
    backoff_multiplier: f32,

    /// Upper bound of the random jitter added to each delay.
    max_jitter: Duration,

    /// Decides which failure types are worth another attempt.
    retryable: fn(FailureType) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BACKOFF_BASE,
            max_delay: DEFAULT_BACKOFF_MAX,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
            retryable: is_retryable,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom backoff settings.
    ///
    /// # Arguments
    ///
    /// * `max_retries` - Retries after the first attempt (0 disables retrying)
    /// * `base_delay` - Base delay for first retry
    /// * `max_delay` - Maximum delay cap (raised to `base_delay` if smaller)
    /// * `backoff_multiplier` - Multiplier for exponential increase
    #[must_use]
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            backoff_multiplier,
            ..Self::default()
        }
    }

    /// Creates a policy with a custom retry budget, using defaults for other settings.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Replaces the jitter bound.
    #[must_use]
    pub fn jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Replaces the retryable-failure predicate.
    #[must_use]
    pub fn retry_when(mut self, retryable: fn(FailureType) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Returns the retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the maximum number of attempts (initial attempt plus retries).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns the backoff cap.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(skip(self), fields(max_attempts = self.max_attempts()))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if !(self.retryable)(failure_type) {
            let reason = match failure_type {
                FailureType::Permanent => "permanent failure - retry would not help",
                FailureType::Storage => "storage failure - retrying a local write rarely helps",
                FailureType::Transient | FailureType::RateLimited => {
                    "failure type excluded by retry predicate"
                }
            };
            return RetryDecision::DoNotRetry {
                reason: reason.to_string(),
            };
        }

        if attempt >= self.max_attempts() {
            debug!(attempt, max = self.max_attempts(), "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts()),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry with exponential backoff and jitter.
    ///
    /// Formula: `min(base_delay * multiplier^(attempt - 1), max_delay) + jitter`
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 = 2^0 = 1x base
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    /// Generates random jitter between 0 and `max_jitter`.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=max_ms))
    }
}

/// Classifies a fetch error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type | Rationale |
/// |--------|------|-----------|
/// | 408 | Transient | Request timeout - may succeed |
/// | 429 | RateLimited | Rate limited - retry with backoff |
/// | other 4xx | Permanent | Client error - won't succeed on retry |
/// | 5xx | Transient | Server error - may be temporary |
///
/// # Non-HTTP Errors
///
/// | Error | Type |
/// |-------|------|
/// | Timeout | Transient |
/// | Network (most) | Transient |
/// | Network (TLS) | Permanent |
/// | InvalidUrl, UnexpectedContent, Integrity | Permanent |
/// | Io | Storage |
#[instrument(level = "debug")]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),

        FetchError::Timeout { .. } => FailureType::Transient,

        FetchError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }

        FetchError::InvalidUrl { .. }
        | FetchError::UnexpectedContent { .. }
        | FetchError::Integrity { .. } => FailureType::Permanent,

        FetchError::Io { .. } => FailureType::Storage,
    }
}

/// Classifies an HTTP status code into a failure type.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,   // Request Timeout
        429 => FailureType::RateLimited, // Too Many Requests

        status if (400..500).contains(&status) => FailureType::Permanent,

        status if (500..600).contains(&status) => FailureType::Transient,

        // Anything else is unexpected, treat as permanent
        _ => FailureType::Permanent,
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

/// Parses a Retry-After header value (delay seconds or HTTP-date).
///
/// Negative or unparseable values yield `None`; dates in the past yield zero.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        return Some(Duration::from_secs(seconds as u64));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .unwrap_or(Duration::ZERO),
        )
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

/// Server-mandated delay for a failed attempt, capped at the policy's backoff cap.
#[must_use]
pub fn retry_after_delay(error: &FetchError, policy: &RetryPolicy) -> Option<Duration> {
    let delay = parse_retry_after(error.retry_after()?)?;
    if delay > policy.max_delay() {
        warn!(
            delay_secs = delay.as_secs(),
            max_secs = policy.max_delay().as_secs(),
            "Retry-After exceeds backoff cap, capping"
        );
        return Some(policy.max_delay());
    }
    Some(delay)
}
