//! Transport seam and the reqwest-backed HTTP client.
//!
//! The engine talks to a [`Transport`]; [`HttpClient`] is the production
//! implementation. A transport only reports successful responses: any
//! non-2xx status comes back as [`FetchError::HttpStatus`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use tracing::{debug, instrument};
use url::Url;

use super::constants::DEFAULT_CONNECT_TIMEOUT_SECS;
use super::error::FetchError;
use crate::user_agent;

/// Streamed response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// A successful (2xx) response whose body has not been read yet.
pub struct FetchResponse {
    /// Content-Type header, if sent.
    pub content_type: Option<String>,
    /// Content-Length header, if sent and numeric.
    pub content_length: Option<u64>,
    /// Body chunks.
    pub body: BodyStream,
}

impl FetchResponse {
    /// Wraps a body stream without headers.
    #[must_use]
    pub fn new(body: BodyStream) -> Self {
        Self {
            content_type: None,
            content_length: None,
            body,
        }
    }

    /// Builds a response from an in-memory body (Content-Length set).
    #[must_use]
    pub fn from_bytes(body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let len = body.len() as u64;
        Self {
            content_type: None,
            content_length: Some(len),
            body: stream::once(async move { Ok(body) }).boxed(),
        }
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Something that can GET a URL.
///
/// Implementations must be cancel-safe: dropping the returned future or body
/// stream abandons the request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a GET request.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::HttpStatus`] for non-2xx responses and
    /// [`FetchError::Network`]/[`FetchError::Timeout`] for transport failures.
    async fn get(&self, url: &Url) -> Result<FetchResponse, FetchError>;
}

/// HTTP client for fetching resources with streaming bodies.
///
/// This client is designed to be created once and reused for every batch,
/// taking advantage of connection pooling. It sets no overall request
/// timeout: the engine bounds each attempt (request and body) itself.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with the default connect timeout.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::with_connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
    }

    /// Creates a client with an explicit connect timeout.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpClient {
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn get(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url.as_str())
            } else {
                FetchError::network(url.as_str(), e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            debug!(status = status.as_u16(), ?retry_after, "error status");
            return Err(FetchError::http_status_with_retry_after(
                url.as_str(),
                status.as_u16(),
                retry_after,
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let stream_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| FetchError::network(stream_url.clone(), e)))
            .boxed();

        Ok(FetchResponse {
            content_type,
            content_length,
            body,
        })
    }
}
