//! Run configuration and the builders that turn it into a pipeline.
//!
//! [`EnrichConfig`] is plain data: every field has a default, a JSON file
//! may override any subset, and the binary applies its flags on top before
//! calling [`EnrichConfig::validate`]. Nothing here is global; the
//! orchestrator and every provider receive their settings at construction.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{
    ArtifactValidator, DEFAULT_MAX_PDF_BYTES, DEFAULT_MIN_PDF_BYTES, DEFAULT_PDF_TIMEOUT,
    PdfDownloader,
};
use crate::dedup::{DEFAULT_TITLE_THRESHOLD, Deduplicator};
use crate::fetch::FallbackPipeline;
use crate::orchestrator::{PdfPolicy, PipelineOrchestrator};
use crate::provider::{
    ArxivProvider, CrossrefProvider, DEFAULT_MIN_ABSTRACT_CHARS, DEFAULT_RATE_LIMIT_BACKOFF,
    DIRECT_URL, DOI_REDIRECT, DOI_REGISTRY, DirectUrlProvider, DoiRedirectProvider,
    PREPRINT_REPOSITORY, PROVIDER_NAMES, Provider, ProviderError, ProviderSettings, Purpose,
    SemanticScholarProvider, TITLE_SEARCH, Target, WEB_PAGE, WebPageProvider, defaults_for,
};
use crate::rate_limiter::RateLimiter;
use crate::worker_pool::{MAX_CONCURRENCY, MIN_CONCURRENCY, PoolError, WorkerPool};

/// Largest accepted per-provider interval.
pub const MAX_INTERVAL_MS: u64 = 60_000;

/// Accepted timeout range in seconds.
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Largest accepted 429 backoff window in seconds.
pub const MAX_BACKOFF_SECS: u64 = 600;

const DEFAULT_ABSTRACT_CONCURRENCY: usize = 4;
const DEFAULT_PDF_CONCURRENCY: usize = 2;
const DEFAULT_PDF_DIR: &str = "./pdfs";

/// Error type for configuration validation and pipeline construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A similarity threshold outside `[0, 1]`.
    #[error("invalid {field} {value}: must be between 0.0 and 1.0")]
    InvalidThreshold { field: String, value: f64 },

    /// A provider interval above [`MAX_INTERVAL_MS`].
    #[error("invalid min_interval_ms {value} for {provider}: must be at most {MAX_INTERVAL_MS}")]
    InvalidInterval { provider: String, value: u64 },

    /// A timeout outside the accepted range.
    #[error(
        "invalid {field} {value}s: must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS} seconds"
    )]
    InvalidTimeout { field: String, value: u64 },

    /// A concurrency outside `1..=100`.
    #[error(
        "invalid {field} {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}\n  Suggestion: Use a small value such as 2-4 to respect remote rate limits"
    )]
    InvalidConcurrency { field: String, value: usize },

    /// Any other out-of-range value.
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// A chain or override names a provider that does not exist.
    #[error(
        "unknown provider '{name}' in {field}\n  Suggestion: Use one of: {}",
        PROVIDER_NAMES.join(", ")
    )]
    UnknownProvider { field: String, name: String },

    /// A chain has no usable provider.
    #[error(
        "the {purpose} chain has no usable provider\n  Suggestion: List at least one provider whose client can be built"
    )]
    EmptyChain { purpose: Purpose },

    /// The configuration text is not valid JSON for [`EnrichConfig`].
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A worker pool could not be created.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The shared PDF downloader could not be created.
    #[error("PDF downloader unavailable: {0}")]
    Downloader(#[source] ProviderError),
}

/// Deduplication settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupSettings {
    pub title_threshold: f64,
    pub reassign_ids: bool,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            title_threshold: DEFAULT_TITLE_THRESHOLD,
            reassign_ids: true,
        }
    }
}

/// Per-provider overrides; unset fields keep the provider's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi_title_threshold: Option<f64>,
}

/// PDF storage and validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PdfSettings {
    pub output_dir: PathBuf,
    pub min_bytes: u64,
    pub max_bytes: u64,
    /// Bound on one complete PDF transfer.
    pub timeout_secs: u64,
}

impl Default for PdfSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_PDF_DIR),
            min_bytes: DEFAULT_MIN_PDF_BYTES,
            max_bytes: DEFAULT_MAX_PDF_BYTES,
            timeout_secs: DEFAULT_PDF_TIMEOUT.as_secs(),
        }
    }
}

/// Complete settings for one enrichment run.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnrichConfig {
    pub dedup: DedupSettings,
    /// Overrides keyed by provider role label.
    pub providers: BTreeMap<String, ProviderOverrides>,
    /// The single 429 backoff window.
    pub rate_limit_backoff_secs: u64,
    /// Runs the abstract stage when true.
    pub enrich_abstracts: bool,
    pub abstract_chain: Vec<String>,
    pub pdf_chain: Vec<String>,
    pub pdf_policy: PdfPolicy,
    pub abstract_concurrency: usize,
    pub pdf_concurrency: usize,
    /// Budget for one record's chain run; unbounded when unset.
    pub record_timeout_secs: Option<u64>,
    pub pdf: PdfSettings,
    /// Contact address for the DOI registry's polite pool.
    pub contact_email: Option<String>,
    pub semantic_scholar_api_key: Option<String>,
    /// Provider abstracts shorter than this after cleaning are declined.
    pub min_abstract_chars: usize,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            dedup: DedupSettings::default(),
            providers: BTreeMap::new(),
            rate_limit_backoff_secs: DEFAULT_RATE_LIMIT_BACKOFF.as_secs(),
            enrich_abstracts: true,
            abstract_chain: names(&[TITLE_SEARCH, PREPRINT_REPOSITORY, DOI_REGISTRY, WEB_PAGE]),
            pdf_chain: names(&[
                DIRECT_URL,
                PREPRINT_REPOSITORY,
                TITLE_SEARCH,
                DOI_REDIRECT,
                WEB_PAGE,
            ]),
            pdf_policy: PdfPolicy::default(),
            abstract_concurrency: DEFAULT_ABSTRACT_CONCURRENCY,
            pdf_concurrency: DEFAULT_PDF_CONCURRENCY,
            record_timeout_secs: None,
            pdf: PdfSettings::default(),
            contact_email: None,
            semantic_scholar_api_key: None,
            min_abstract_chars: DEFAULT_MIN_ABSTRACT_CHARS,
        }
    }
}

impl fmt::Debug for EnrichConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichConfig")
            .field("dedup", &self.dedup)
            .field("providers", &self.providers)
            .field("rate_limit_backoff_secs", &self.rate_limit_backoff_secs)
            .field("enrich_abstracts", &self.enrich_abstracts)
            .field("abstract_chain", &self.abstract_chain)
            .field("pdf_chain", &self.pdf_chain)
            .field("pdf_policy", &self.pdf_policy)
            .field("abstract_concurrency", &self.abstract_concurrency)
            .field("pdf_concurrency", &self.pdf_concurrency)
            .field("record_timeout_secs", &self.record_timeout_secs)
            .field("pdf", &self.pdf)
            .field("contact_email", &self.contact_email)
            .field(
                "semantic_scholar_api_key",
                &self.semantic_scholar_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("min_abstract_chars", &self.min_abstract_chars)
            .finish()
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|name| (*name).to_string()).collect()
}

fn check_threshold(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            field: field.to_string(),
            value,
        })
    }
}

fn check_timeout(field: &str, value: u64) -> Result<(), ConfigError> {
    if (MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidTimeout {
            field: field.to_string(),
            value,
        })
    }
}

fn check_concurrency(field: &str, value: usize) -> Result<(), ConfigError> {
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidConcurrency {
            field: field.to_string(),
            value,
        })
    }
}

fn check_chain(field: &str, chain: &[String]) -> Result<(), ConfigError> {
    match chain.iter().find(|name| defaults_for(name).is_none()) {
        Some(name) => Err(ConfigError::UnknownProvider {
            field: field.to_string(),
            name: name.clone(),
        }),
        None => Ok(()),
    }
}

impl EnrichConfig {
    /// Parses a JSON configuration; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown fields.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_threshold("dedup.title_threshold", self.dedup.title_threshold)?;

        for (name, overrides) in &self.providers {
            if defaults_for(name).is_none() {
                return Err(ConfigError::UnknownProvider {
                    field: "providers".to_string(),
                    name: name.clone(),
                });
            }
            if let Some(value) = overrides.min_interval_ms
                && value > MAX_INTERVAL_MS
            {
                return Err(ConfigError::InvalidInterval {
                    provider: name.clone(),
                    value,
                });
            }
            if let Some(value) = overrides.timeout_secs {
                check_timeout(&format!("providers.{name}.timeout_secs"), value)?;
            }
            if let Some(value) = overrides.title_threshold {
                check_threshold(&format!("providers.{name}.title_threshold"), value)?;
            }
            if let Some(value) = overrides.doi_title_threshold {
                check_threshold(&format!("providers.{name}.doi_title_threshold"), value)?;
            }
        }

        if self.rate_limit_backoff_secs > MAX_BACKOFF_SECS {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit_backoff_secs".to_string(),
                reason: format!("must be at most {MAX_BACKOFF_SECS}"),
            });
        }

        check_chain("abstract_chain", &self.abstract_chain)?;
        check_chain("pdf_chain", &self.pdf_chain)?;
        if self.enrich_abstracts && self.abstract_chain.is_empty() {
            return Err(ConfigError::EmptyChain {
                purpose: Purpose::Abstract,
            });
        }
        if self.pdf_policy != PdfPolicy::Never && self.pdf_chain.is_empty() {
            return Err(ConfigError::EmptyChain {
                purpose: Purpose::Pdf,
            });
        }

        check_concurrency("abstract_concurrency", self.abstract_concurrency)?;
        check_concurrency("pdf_concurrency", self.pdf_concurrency)?;

        if self.record_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "record_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        check_timeout("pdf.timeout_secs", self.pdf.timeout_secs)?;
        if self.pdf.max_bytes == 0 || self.pdf.min_bytes > self.pdf.max_bytes {
            return Err(ConfigError::InvalidValue {
                field: "pdf".to_string(),
                reason: format!(
                    "min_bytes ({}) must not exceed a non-zero max_bytes ({})",
                    self.pdf.min_bytes, self.pdf.max_bytes
                ),
            });
        }

        Ok(())
    }

    /// Effective settings for `name`: built-in defaults with overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProvider`] for an unknown name.
    pub fn provider_settings(&self, name: &str) -> Result<ProviderSettings, ConfigError> {
        let mut settings = defaults_for(name).ok_or_else(|| ConfigError::UnknownProvider {
            field: "providers".to_string(),
            name: name.to_string(),
        })?;
        if let Some(overrides) = self.providers.get(name) {
            if let Some(ms) = overrides.min_interval_ms {
                settings.min_interval = Duration::from_millis(ms);
            }
            if let Some(secs) = overrides.timeout_secs
                && settings.timeout.is_some()
            {
                settings.timeout = Some(Duration::from_secs(secs));
            }
            if let Some(threshold) = overrides.title_threshold
                && settings.title_threshold.is_some()
            {
                settings.title_threshold = Some(threshold);
            }
            if let Some(threshold) = overrides.doi_title_threshold
                && settings.doi_title_threshold.is_some()
            {
                settings.doi_title_threshold = Some(threshold);
            }
        }
        Ok(settings)
    }

    /// The 429 backoff window.
    #[must_use]
    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }

    /// The per-record budget, if any.
    #[must_use]
    pub fn record_timeout(&self) -> Option<Duration> {
        self.record_timeout_secs.map(Duration::from_secs)
    }

    /// The deduplicator for this run.
    #[must_use]
    pub fn deduplicator(&self) -> Deduplicator {
        Deduplicator::new(self.dedup.title_threshold).with_reassigned_ids(self.dedup.reassign_ids)
    }

    /// A rate limiter carrying every provider's interval under its key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProvider`] for an unknown override name.
    pub fn rate_limiter(&self) -> Result<RateLimiter, ConfigError> {
        let mut limiter = RateLimiter::disabled();
        for name in PROVIDER_NAMES {
            let settings = self.provider_settings(name)?;
            limiter = limiter.with_interval(settings.key, settings.min_interval);
        }
        Ok(limiter)
    }

    /// The shared PDF downloader.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if the HTTP client cannot be built.
    pub fn pdf_downloader(&self) -> Result<PdfDownloader, ProviderError> {
        let validator = ArtifactValidator::new(self.pdf.min_bytes, self.pdf.max_bytes);
        Ok(PdfDownloader::new(
            self.pdf.output_dir.clone(),
            validator,
            Duration::from_secs(self.pdf.timeout_secs),
        )?
        .with_backoff(self.rate_limit_backoff()))
    }

    /// Builds one provider for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the provider's client cannot be built.
    /// Unknown names are reported as [`ProviderError::ClientBuild`].
    pub fn build_provider(
        &self,
        name: &str,
        target: Target,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let settings = self
            .provider_settings(name)
            .map_err(|e| ProviderError::client_build(name, e.to_string()))?;
        let timeout = settings.timeout.unwrap_or(DEFAULT_PDF_TIMEOUT);
        let threshold = settings.title_threshold.unwrap_or_default();
        let backoff = self.rate_limit_backoff();

        let provider: Arc<dyn Provider> = match name {
            TITLE_SEARCH => Arc::new(
                SemanticScholarProvider::new(target, timeout)?
                    .with_api_key(self.semantic_scholar_api_key.clone())
                    .with_title_threshold(threshold)
                    .with_backoff(backoff),
            ),
            PREPRINT_REPOSITORY => Arc::new(
                ArxivProvider::new(target, timeout)?
                    .with_title_threshold(threshold)
                    .with_backoff(backoff),
            ),
            DOI_REGISTRY => Arc::new(
                CrossrefProvider::new(self.contact_email.clone(), target, timeout)?
                    .with_title_threshold(threshold)
                    .with_doi_title_threshold(settings.doi_title_threshold.unwrap_or_default())
                    .with_backoff(backoff),
            ),
            DOI_REDIRECT => {
                Arc::new(DoiRedirectProvider::new(target, timeout)?.with_backoff(backoff))
            }
            WEB_PAGE => Arc::new(
                WebPageProvider::new(target, timeout)?
                    .with_title_threshold(threshold)
                    .with_backoff(backoff),
            ),
            DIRECT_URL => Arc::new(DirectUrlProvider::new(target)),
            other => {
                return Err(ProviderError::client_build(other, "unknown provider"));
            }
        };
        Ok(provider)
    }

    /// Builds the providers named in `chain`, in order, for `target`.
    ///
    /// A provider whose client cannot be built is logged and left out.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyChain`] when no provider could be built.
    pub fn build_chain(
        &self,
        chain: &[String],
        target: &Target,
    ) -> Result<Vec<Arc<dyn Provider>>, ConfigError> {
        let purpose = target.purpose();
        let mut providers = Vec::with_capacity(chain.len());
        for name in chain {
            match self.build_provider(name, target.clone()) {
                Ok(provider) => providers.push(provider),
                Err(e) => warn!(provider = %name, %purpose, error = %e, "provider unavailable, skipping"),
            }
        }
        if providers.is_empty() {
            return Err(ConfigError::EmptyChain { purpose });
        }
        debug!(%purpose, providers = providers.len(), "chain built");
        Ok(providers)
    }

    /// Builds the complete orchestrator: limiter, chains, pools, policy.
    ///
    /// Validates first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for invalid settings or an empty chain.
    pub fn orchestrator(&self) -> Result<PipelineOrchestrator, ConfigError> {
        self.validate()?;
        let limiter = Arc::new(self.rate_limiter()?);
        let mut orchestrator =
            PipelineOrchestrator::new(self.deduplicator()).with_pdf_policy(self.pdf_policy);

        if self.enrich_abstracts {
            let target = Target::Abstract {
                min_chars: self.min_abstract_chars,
            };
            let chain = self.build_chain(&self.abstract_chain, &target)?;
            let pool = WorkerPool::new(self.abstract_concurrency)?
                .with_record_timeout(self.record_timeout());
            orchestrator =
                orchestrator.with_abstract_stage(FallbackPipeline::new(chain, Arc::clone(&limiter)), pool);
        }

        if self.pdf_policy != PdfPolicy::Never {
            let downloader = self.pdf_downloader().map_err(ConfigError::Downloader)?;
            let target = Target::Pdf(Arc::new(downloader));
            let chain = self.build_chain(&self.pdf_chain, &target)?;
            let pool =
                WorkerPool::new(self.pdf_concurrency)?.with_record_timeout(self.record_timeout());
            orchestrator =
                orchestrator.with_pdf_stage(FallbackPipeline::new(chain, Arc::clone(&limiter)), pool);
        }

        info!(
            abstract_chain = ?self.enrich_abstracts.then_some(&self.abstract_chain),
            pdf_chain = ?(self.pdf_policy != PdfPolicy::Never).then_some(&self.pdf_chain),
            pdf_policy = %self.pdf_policy,
            "pipeline configured"
        );
        Ok(orchestrator)
    }
}
