//! Fallback fetch pipeline.
//!
//! Providers are tried strictly in order, one at a time. Each call is gated
//! by the shared [`RateLimiter`] under the provider's key. The first
//! provider to report a find ends the chain; declines and provider errors
//! both move on to the next provider and never reach the caller.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{FetchStep, Provider, ProviderError};
use crate::rate_limiter::RateLimiter;
use crate::record::ProviderQuery;

use super::FetchOutcome;

/// Ordered provider chain sharing one rate limiter.
///
/// Cheap to clone; clones share providers and limiter.
#[derive(Clone)]
pub struct FallbackPipeline {
    providers: Arc<[Arc<dyn Provider>]>,
    limiter: Arc<RateLimiter>,
}

impl FallbackPipeline {
    /// Creates a pipeline over `providers` in the given order.
    ///
    /// # Panics
    ///
    /// Panics if `providers` is empty. An empty chain is a caller bug, not a
    /// condition to report per record.
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn Provider>>, limiter: Arc<RateLimiter>) -> Self {
        assert!(
            !providers.is_empty(),
            "FallbackPipeline requires at least one provider"
        );
        Self {
            providers: providers.into(),
            limiter,
        }
    }

    /// Returns the provider role labels in chain order.
    #[must_use]
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Resolves `query` against the chain.
    ///
    /// Returns the first provider's find, [`FetchOutcome::exhausted`] when
    /// every provider declined or failed, or [`FetchOutcome::cancelled`] when
    /// `cancel` fires first. No provider is called after cancellation or
    /// after a find.
    #[tracing::instrument(skip(self, query, cancel), fields(record_id = query.record_id))]
    pub async fn resolve(&self, query: &ProviderQuery, cancel: &CancellationToken) -> FetchOutcome {
        let mut attempted = 0;

        for provider in self.providers.iter() {
            if cancel.is_cancelled() {
                debug!(attempted, "cancelled before next provider");
                return FetchOutcome::cancelled(attempted);
            }

            attempted += 1;
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(provider = provider.name(), "cancelled while waiting on provider");
                    return FetchOutcome::cancelled(attempted);
                }
                result = self.call(provider.as_ref(), query) => result,
            };

            match result {
                Ok(FetchStep::Found(found)) => {
                    info!(
                        provider = provider.name(),
                        confidence = %found.confidence,
                        attempted,
                        "provider succeeded"
                    );
                    return FetchOutcome::success(provider.name(), found, attempted);
                }
                Ok(FetchStep::Declined(reason)) => {
                    debug!(provider = provider.name(), reason = %reason, "provider declined");
                }
                Err(error) => {
                    warn!(
                        provider = provider.name(),
                        error = %error,
                        "provider failed, trying next"
                    );
                }
            }
        }

        debug!(attempted, "all providers exhausted");
        FetchOutcome::exhausted(attempted)
    }

    async fn call(
        &self,
        provider: &dyn Provider,
        query: &ProviderQuery,
    ) -> Result<FetchStep, ProviderError> {
        self.limiter.acquire(provider.key()).await;
        provider.fetch(query).await
    }
}

impl fmt::Debug for FallbackPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackPipeline")
            .field("providers", &self.provider_names())
            .field("limiter", &self.limiter)
            .finish()
    }
}
