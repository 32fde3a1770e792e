use std::time::Duration;

use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use super::types::{ArticleRecord, NewsResponse};
use super::NewsSource;

pub const DEFAULT_BASE_URL: &str = "https://newsapi.org/v2/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Errors that can occur while fetching a page from the news API.
///
/// `Network`, `Timeout`, `HttpStatus` and `RateLimited` are transient
/// transport failures. `Decode`, `Api` and `ResponseTooLarge` mean the
/// server answered with something unusable.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Body was not a valid response envelope
    #[error("Malformed response: {0}")]
    Decode(String),
    /// Server answered with an error envelope
    #[error("News API error {code}: {message}")]
    Api { code: String, message: String },
    /// Response body exceeded the 5MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Base URL or endpoint could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FetchError {
    /// True when the server responded but the payload was unusable.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            FetchError::Decode(_) | FetchError::Api { .. } | FetchError::ResponseTooLarge
        )
    }
}

/// HTTP client for a NewsAPI-compatible service.
pub struct NewsApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    country: String,
    category: Option<String>,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl std::fmt::Debug for NewsApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("country", &self.country)
            .field("category", &self.category)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl NewsApiClient {
    /// Create a client rooted at `base_url`.
    ///
    /// Endpoints are resolved relative to the base, so a missing trailing
    /// slash is added.
    pub fn new(http: reqwest::Client, base_url: &str) -> Result<Self, FetchError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            http,
            base_url: Url::parse(&base)?,
            api_key: None,
            country: "us".to_string(),
            category: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        })
    }

    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retry policy for 429 and 5xx responses. Attempt `n` waits
    /// `base_delay * 2^n` before retrying.
    pub fn with_retry(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, FetchError> {
        let mut url = self.base_url.join(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(retry_count))
    }

    async fn get_articles(&self, url: Url) -> Result<Vec<ArticleRecord>, FetchError> {
        let mut retry_count = 0;

        let (status, bytes) = loop {
            let mut request = self.http.get(url.clone());
            if let Some(key) = &self.api_key {
                request = request.header("X-Api-Key", key.expose_secret());
            }

            let response = tokio::time::timeout(self.timeout, request.send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= self.max_retries {
                    return Err(FetchError::RateLimited(self.max_retries));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    endpoint = %url.path(),
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= self.max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    endpoint = %url.path(),
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            break (status, read_limited_bytes(response, MAX_RESPONSE_SIZE).await?);
        };

        // 4xx bodies usually carry an error envelope worth surfacing
        if !status.is_success() {
            return match serde_json::from_slice::<NewsResponse>(&bytes) {
                Ok(NewsResponse {
                    code: Some(code),
                    message,
                    ..
                }) => Err(FetchError::Api {
                    code,
                    message: message.unwrap_or_default(),
                }),
                _ => Err(FetchError::HttpStatus(status.as_u16())),
            };
        }

        let envelope: NewsResponse =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))?;

        match envelope.status.as_str() {
            "ok" => Ok(envelope.articles),
            "error" => Err(FetchError::Api {
                code: envelope.code.unwrap_or_else(|| "unknown".to_string()),
                message: envelope.message.unwrap_or_default(),
            }),
            other => Err(FetchError::Decode(format!("unexpected status {:?}", other))),
        }
    }
}

impl NewsSource for NewsApiClient {
    async fn fetch_headlines(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<ArticleRecord>, FetchError> {
        let mut params = vec![("country", self.country.clone())];
        if let Some(category) = &self.category {
            params.push(("category", category.clone()));
        }
        params.push(("page", page.to_string()));
        params.push(("pageSize", page_size.to_string()));

        let url = self.endpoint("top-headlines", &params)?;
        tracing::debug!(page = page, page_size = page_size, "Fetching top headlines");
        self.get_articles(url).await
    }

    async fn fetch_search(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<ArticleRecord>, FetchError> {
        let url = self.endpoint(
            "everything",
            &[
                ("q", query.to_string()),
                ("page", page.to_string()),
                ("pageSize", page_size.to_string()),
            ],
        )?;
        tracing::debug!(query = %query, page = page, page_size = page_size, "Searching articles");
        self.get_articles(url).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
