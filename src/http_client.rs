//! HTTP Client Module
//!
//! Provides a robust HTTP client for source adapters with:
//! - Semaphore-based concurrency limiting
//! - Exponential backoff with jitter for retries
//! - Outbound proxy with a direct-connection fallback
//! - Per-source rate limiting

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::retry::{with_jitter, FailureKind, RetryAction, RetryPolicy};

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum concurrent requests across all sources
    pub max_concurrent_requests: usize,
    /// Request timeout
    pub request_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
    /// Outbound proxy for source traffic
    pub proxy_url: Option<String>,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            proxy_url: None,
            user_agent: format!("news-pipeline/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Builds a reqwest client with the configured timeouts
pub fn build_client(config: &HttpClientConfig, proxy: Option<&str>) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .user_agent(&config.user_agent)
        .gzip(true)
        .brotli(true);

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| PipelineError::ConfigError(format!("invalid proxy url: {e}")))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Resilient HTTP client with concurrency limiting, retries and proxy fallback
pub struct ResilientHttpClient {
    /// Client routed through the outbound proxy, when one is configured
    proxied: Option<Client>,
    /// Client without proxy
    direct: Client,
    /// Global concurrency semaphore
    semaphore: Arc<Semaphore>,
    /// Configuration
    config: HttpClientConfig,
}

impl ResilientHttpClient {
    /// Creates a new resilient HTTP client
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let proxied = config
            .proxy_url
            .as_deref()
            .map(|url| build_client(&config, Some(url)))
            .transpose()?;
        let direct = build_client(&config, None)?;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));

        Ok(Self {
            proxied,
            direct,
            semaphore,
            config,
        })
    }

    /// Creates a client with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    /// Client without proxy, for callers that manage their own requests
    pub fn direct(&self) -> &Client {
        &self.direct
    }

    /// Sends a request and returns the body text.
    ///
    /// Goes through the proxy first when one is configured; if that fails for
    /// any reason the request is repeated once over a direct connection.
    pub async fn fetch_text<F>(&self, build: F) -> Result<String>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::ParseError("HTTP semaphore closed".to_string()))?;

        if let Some(proxied) = &self.proxied {
            match self.execute(proxied, &build).await {
                Ok(response) => return Ok(response.text().await?),
                Err(e) => {
                    warn!(error = %e, "Proxied request failed, retrying without proxy");
                }
            }
        }

        let response = self.execute(&self.direct, &build).await?;
        Ok(response.text().await?)
    }

    /// Executes a request with retry logic (exponential backoff + jitter)
    async fn execute<F>(&self, client: &Client, build: &F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let request = build(client).build()?;
            let url = request.url().clone();

            debug!(method = %request.method(), url = %url, attempt, "Executing HTTP request");

            let failure = match client.execute(request).await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let kind = Self::classify_status(status);
                    let body = response.text().await.unwrap_or_default();
                    let error = PipelineError::ApiError {
                        code: status.to_string(),
                        message: truncate(&body, 300),
                    };
                    (kind, error)
                }
                Err(e) => (Self::classify_error(&e), PipelineError::HttpError(e)),
            };

            let (kind, error) = failure;
            match self.config.retry.decide(attempt, kind, false) {
                RetryAction::RetrySame { delay } => {
                    warn!(url = %url, attempt, error = %error, "Transient error, will retry");
                    tokio::time::sleep(with_jitter(delay)).await;
                }
                RetryAction::AdvanceNext | RetryAction::Fail => return Err(error),
            }
        }
    }

    /// Maps a non-success status to a failure kind
    pub(crate) fn classify_status(status: StatusCode) -> FailureKind {
        match status {
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => FailureKind::Transient,
            s if s.is_server_error() => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }

    /// Maps a transport error to a failure kind
    pub(crate) fn classify_error(error: &reqwest::Error) -> FailureKind {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }

    /// Gets the number of available permits
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Source-specific HTTP client with its own rate limit
pub struct SourceHttpClient {
    client: Arc<ResilientHttpClient>,
    rate_limiter: DefaultDirectRateLimiter,
    source_id: String,
}

impl SourceHttpClient {
    /// Creates a new source-specific client
    pub fn new(client: Arc<ResilientHttpClient>, source_id: &str, rate_limit_rpm: u32) -> Self {
        let rpm = NonZeroU32::new(rate_limit_rpm).unwrap_or(NonZeroU32::MIN);
        Self {
            client,
            rate_limiter: RateLimiter::direct(Quota::per_minute(rpm)),
            source_id: source_id.to_string(),
        }
    }

    /// Waits for the rate limiter, then fetches the body text
    pub async fn fetch_text<F>(&self, build: F) -> Result<String>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.rate_limiter.until_ready().await;
        self.client.fetch_text(build).await
    }

    /// Plain GET returning the body text
    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.fetch_text(|c| c.get(url)).await
    }

    /// Gets the source ID
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

/// Cuts a string to at most `max` chars for error messages
pub(crate) fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
