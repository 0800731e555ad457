//! Batch configuration.
//!
//! Every knob the fetcher uses is an explicit field of [`FetchConfig`]; there
//! is no process-wide state. The CLI fills it from an optional TOML file and
//! command-line overrides, library callers construct it directly.
//!
//! ```toml
//! concurrency = 8
//! attempt_timeout_secs = 15
//! accepted_content_types = ["application/pdf", "text/csv"]
//!
//! [retry]
//! max_retries = 2
//! base_delay_ms = 500
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::download::constants::{
    DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_CONCURRENCY,
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_JITTER, DEFAULT_MAX_RETRIES, MAX_CONCURRENCY,
    MAX_TIMEOUT_SECS, MIN_CONCURRENCY,
};
use crate::download::RetryPolicy;

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Concurrency outside the accepted range.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// A timeout outside `1..=3600` seconds.
    #[error("invalid {field} value {value}: must be between 1 and {MAX_TIMEOUT_SECS} seconds")]
    InvalidTimeout {
        /// Config field name.
        field: &'static str,
        /// The invalid value.
        value: u64,
    },

    /// Backoff base larger than its cap.
    #[error("invalid backoff: base delay {base_ms}ms exceeds max delay {max_ms}ms")]
    InvalidBackoff {
        /// Base delay in milliseconds.
        base_ms: u64,
        /// Cap in milliseconds.
        max_ms: u64,
    },

    /// Config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema.
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Retry and backoff settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Upper bound of random jitter, in milliseconds.
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BACKOFF_BASE.as_millis() as u64,
            max_delay_ms: DEFAULT_BACKOFF_MAX.as_millis() as u64,
            max_jitter_ms: DEFAULT_MAX_JITTER.as_millis() as u64,
        }
    }
}

/// Everything a batch run needs besides the tasks themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Worker count (1-100).
    pub concurrency: usize,
    /// Per-attempt timeout covering request and full body, in seconds.
    pub attempt_timeout_secs: u64,
    /// TCP connect timeout for the HTTP client, in seconds.
    pub connect_timeout_secs: u64,
    /// Retry budget and backoff.
    pub retry: RetryConfig,
    /// Accepted Content-Type prefixes (empty accepts everything).
    pub accepted_content_types: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            retry: RetryConfig::default(),
            accepted_content_types: Vec::new(),
        }
    }
}

impl FetchConfig {
    /// Parses a TOML document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    /// Values are not range-checked here; see [`validate`](Self::validate).
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::InvalidConcurrency {
                value: self.concurrency,
            });
        }
        validate_timeout_secs("attempt_timeout_secs", self.attempt_timeout_secs)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidBackoff {
                base_ms: self.retry.base_delay_ms,
                max_ms: self.retry.max_delay_ms,
            });
        }
        Ok(())
    }

    /// Per-attempt timeout.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Connect timeout for [`HttpClient`](crate::download::HttpClient).
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Builds the retry policy described by [`RetryConfig`].
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
            2.0,
        )
        .jitter(Duration::from_millis(self.retry.max_jitter_ms))
    }

    /// Whether a response with this Content-Type may be stored.
    ///
    /// Matching is a case-insensitive prefix match on the media type, so
    /// `"text/"` accepts `text/csv; charset=utf-8`. Responses without a
    /// Content-Type header are accepted.
    #[must_use]
    pub fn accepts_content_type(&self, content_type: Option<&str>) -> bool {
        if self.accepted_content_types.is_empty() {
            return true;
        }
        let Some(content_type) = content_type else {
            return true;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        self.accepted_content_types
            .iter()
            .any(|accepted| mime.starts_with(&accepted.trim().to_ascii_lowercase()))
    }
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if (1..=MAX_TIMEOUT_SECS).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidTimeout { field, value })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FetchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.attempt_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry_policy().max_attempts(), 4);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = FetchConfig {
            concurrency: 0,
            ..FetchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConcurrency { value: 0 })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_timeout() {
        let config = FetchConfig {
            attempt_timeout_secs: 0,
            ..FetchConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("attempt_timeout_secs"));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = FetchConfig::default();
        config.retry.base_delay_ms = 5_000;
        config.retry.max_delay_ms = 1_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBackoff { .. })
        ));
    }

    #[test]
    fn test_from_toml_partial_document_keeps_defaults() {
        let config = FetchConfig::from_toml_str(
            r#"
            concurrency = 8
            accepted_content_types = ["application/pdf"]

            [retry]
            max_retries = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.max_delay_ms, 32_000);
        assert_eq!(config.attempt_timeout_secs, 10);
        assert_eq!(config.accepted_content_types, vec!["application/pdf"]);
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        assert!(matches!(
            FetchConfig::from_toml_str("workers = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_accepts_content_type_prefix_match() {
        let config = FetchConfig {
            accepted_content_types: vec!["application/pdf".into(), "text/".into()],
            ..FetchConfig::default()
        };
        assert!(config.accepts_content_type(Some("application/pdf")));
        assert!(config.accepts_content_type(Some("Text/CSV; charset=utf-8")));
        assert!(config.accepts_content_type(None));
        assert!(!config.accepts_content_type(Some("application/zip")));
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let config = FetchConfig::default();
        assert!(config.accepts_content_type(Some("application/octet-stream")));
    }
}
