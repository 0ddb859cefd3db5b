//! Shared HTTP policy for providers.
//!
//! Every provider goes through [`ProviderHttp`], which fixes the outbound
//! timeout, the User-Agent, compression, and the single 429 rule: on HTTP 429
//! wait out the backoff window once and retry exactly once. Any other
//! non-success status is returned as an error without retrying; falling back
//! to the next provider is the retry mechanism for everything else.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::rate_limiter::parse_retry_after;
use crate::user_agent;

use super::ProviderError;

/// Default wait before the single retry after an HTTP 429.
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(30);

/// Upper bound on the connect phase, whatever the total timeout.
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client wrapper applying the provider request policy.
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    client: Client,
    provider: String,
    backoff: Duration,
}

impl ProviderHttp {
    /// Builds a client for `provider` whose requests (body included) are
    /// bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] when the reqwest builder fails.
    pub fn new(provider: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
            .timeout(timeout)
            .gzip(true)
            .user_agent(user_agent::default_provider_user_agent())
            .build()
            .map_err(|e| ProviderError::client_build(provider, e.to_string()))?;

        Ok(Self {
            client,
            provider: provider.to_string(),
            backoff: DEFAULT_RATE_LIMIT_BACKOFF,
        })
    }

    /// Overrides the 429 backoff window.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the configured 429 backoff window.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Returns the provider name used in errors and logs.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Sends a plain GET to `url`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn get(&self, url: &str) -> Result<Response, ProviderError> {
        self.send(url, |client| client.get(url)).await
    }

    /// Sends the request produced by `build`, applying the 429 rule.
    ///
    /// `build` is called once per attempt, so at most twice.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::Timeout`] / [`ProviderError::Network`] on transport failure
    /// - [`ProviderError::RateLimited`] when the retry is also answered with 429
    /// - [`ProviderError::HttpStatus`] for any other non-success status
    #[tracing::instrument(skip(self, build), fields(provider = %self.provider))]
    pub async fn send<F>(&self, url: &str, build: F) -> Result<Response, ProviderError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut retried = false;
        loop {
            let response = build(&self.client)
                .send()
                .await
                .map_err(|e| ProviderError::from_transport(&self.provider, url, e))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if retried {
                    return Err(ProviderError::rate_limited(&self.provider, url));
                }
                let wait = self.backoff_for(&response);
                info!(
                    wait_ms = wait.as_millis(),
                    "rate limited by upstream; backing off before single retry"
                );
                tokio::time::sleep(wait).await;
                retried = true;
                continue;
            }

            if !status.is_success() {
                debug!(status = status.as_u16(), "upstream returned error status");
                return Err(ProviderError::http_status(
                    &self.provider,
                    url,
                    status.as_u16(),
                ));
            }

            return Ok(response);
        }
    }

    /// Reads a successful response body as text.
    ///
    /// # Errors
    ///
    /// Returns a timeout or network error if the body cannot be read.
    pub async fn read_text(&self, url: &str, response: Response) -> Result<String, ProviderError> {
        response
            .text()
            .await
            .map_err(|e| ProviderError::from_transport(&self.provider, url, e))
    }

    /// Reads and decodes a successful JSON response body.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the body cannot be read, or
    /// [`ProviderError::Parse`] if it is not the expected JSON.
    pub async fn read_json<T: DeserializeOwned>(
        &self,
        url: &str,
        response: Response,
    ) -> Result<T, ProviderError> {
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::from_transport(&self.provider, url, e))?;
        serde_json::from_slice(&body).map_err(|e| ProviderError::parse(&self.provider, e.to_string()))
    }

    /// Retry-After shortens the window but never extends it.
    fn backoff_for(&self, response: &Response) -> Duration {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after)
            .map_or(self.backoff, |requested| requested.min(self.backoff))
    }
}
