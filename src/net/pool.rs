//! Shared HTTP connection pool.
//!
//! One [`ConnectionPool`] is built at process start and handed to every
//! component that touches the network. It wraps a single `reqwest::Client`,
//! so connections are reused across listing pages, article fetches, and media
//! downloads instead of being opened per call.

use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, POOL_IDLE_TIMEOUT, POOL_MAX_IDLE_PER_HOST, READ_TIMEOUT_SECS,
};
use super::error::FetchError;
use crate::user_agent;

/// Shared, thread-safe HTTP client with connection reuse.
///
/// Cloning is cheap: clones share the same underlying connection pool.
///
/// # Example
///
/// ```no_run
/// use harvester_core::net::ConnectionPool;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ConnectionPool::new(10, 30)?;
/// let html = pool.get_text("https://example.com/").await?;
/// println!("{} bytes", html.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    client: Client,
    connect_timeout: Duration,
    read_timeout: Duration,
}

/// Body and headers of a successful text fetch.
#[derive(Debug, Clone)]
pub struct TextResponse {
    /// Final URL after redirects.
    pub final_url: String,
    /// Content-Type header, if the server sent one.
    pub content_type: Option<String>,
    /// Decoded body.
    pub body: String,
}

impl ConnectionPool {
    /// Creates a pool with explicit connect and read timeouts (in seconds).
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot initialise.
    pub fn new(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let connect_timeout = Duration::from_secs(connect_timeout_secs);
        let read_timeout = Duration::from_secs(read_timeout_secs);
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()?;

        debug!(
            connect_timeout_secs,
            read_timeout_secs, "built shared connection pool"
        );

        Ok(Self {
            client,
            connect_timeout,
            read_timeout,
        })
    }

    /// Creates a pool with the default timeouts (10 s connect, 30 s read).
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot initialise.
    pub fn with_defaults() -> Result<Self, reqwest::Error> {
        Self::new(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Returns a handle to the shared client.
    #[must_use]
    pub fn acquire(&self) -> Client {
        self.client.clone()
    }

    /// Returns the configured connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the configured read timeout.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Sends a GET request and fails on non-success status codes.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] for invalid URLs, transport failures, and
    /// non-2xx responses (with the Retry-After value preserved).
    pub async fn get(&self, url: &str) -> Result<Response, FetchError> {
        self.send_get(url, None).await
    }

    /// Fetches a URL and returns its body decoded as text.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::get`]; body read failures map to network errors.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        Ok(self.get_text_response(url, None).await?.body)
    }

    /// Fetches a URL and returns the body along with the final URL and content type.
    ///
    /// `timeout` overrides the pool's read timeout for this one request.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::get`].
    pub async fn get_text_response(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<TextResponse, FetchError> {
        let response = self.send_get(url, timeout).await?;
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        Ok(TextResponse {
            final_url,
            content_type,
            body,
        })
    }

    /// Fetches a URL and deserializes its JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Parse`] when the body is not the expected JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<T, FetchError> {
        let body = self.get_text_response(url, timeout).await?.body;
        serde_json::from_str(&body).map_err(|e| FetchError::parse(url, e.to_string()))
    }

    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn send_get(&self, url: &str, timeout: Option<Duration>) -> Result<Response, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        check_status(url, response)
    }

    /// Issues a HEAD request and returns the advertised Content-Length, if any.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] for transport failures and error statuses.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn head_content_length(&self, url: &str) -> Result<Option<u64>, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        let response = check_status(url, response)?;
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok()))
    }
}

fn check_status(url: &str, response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    Err(FetchError::http_status(url, status.as_u16(), retry_after))
}
