//! Provider clients for abstract and PDF enrichment.
//!
//! Each provider wraps one external data source behind the uniform
//! [`Provider`] trait. A provider instance is built for one [`Target`]:
//! abstract text or a stored PDF. The same provider type can appear in both
//! fallback chains with different targets.
//!
//! # Architecture
//!
//! - [`Provider`] - async trait every data source implements
//! - [`FetchStep`] - per-provider result: [`Found`] or declined with a reason
//! - [`ProviderHttp`] - shared HTTP policy (timeout, User-Agent, single 429 retry)
//! - [`SemanticScholarProvider`] - title search API (`title-search`)
//! - [`ArxivProvider`] - preprint repository Atom API (`preprint-repository`)
//! - [`CrossrefProvider`] - DOI registry REST API (`doi-registry`)
//! - [`DoiRedirectProvider`] - DOI to landing page resolution (`doi-redirect`)
//! - [`WebPageProvider`] - open web page scraping (`web-page`)
//! - [`DirectUrlProvider`] - PDF-shaped source URLs (`direct-url`)

mod arxiv;
mod crossref;
mod direct;
mod doi_redirect;
mod error;
mod http_client;
mod semantic_scholar;
mod text;
mod web_page;

pub use arxiv::ArxivProvider;
pub use crossref::CrossrefProvider;
pub use direct::DirectUrlProvider;
pub use doi_redirect::DoiRedirectProvider;
pub use error::ProviderError;
pub use http_client::{DEFAULT_RATE_LIMIT_BACKOFF, ProviderHttp};
pub use semantic_scholar::SemanticScholarProvider;
pub use text::{DEFAULT_MIN_ABSTRACT_CHARS, clean_abstract};
pub use web_page::{PageExtract, WebPageProvider, extract_page};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::{PdfArtifact, PdfDownloader};
use crate::record::{Confidence, ProviderQuery};
use crate::similarity::title_score;

/// Role label of the title search provider.
pub const TITLE_SEARCH: &str = "title-search";
/// Role label of the preprint repository provider.
pub const PREPRINT_REPOSITORY: &str = "preprint-repository";
/// Role label of the DOI registry provider.
pub const DOI_REGISTRY: &str = "doi-registry";
/// Role label of the DOI redirect provider.
pub const DOI_REDIRECT: &str = "doi-redirect";
/// Role label of the open web page provider.
pub const WEB_PAGE: &str = "web-page";
/// Role label of the direct URL provider.
pub const DIRECT_URL: &str = "direct-url";

/// Every role label a chain may name.
pub const PROVIDER_NAMES: [&str; 6] = [
    TITLE_SEARCH,
    PREPRINT_REPOSITORY,
    DOI_REGISTRY,
    DOI_REDIRECT,
    WEB_PAGE,
    DIRECT_URL,
];

/// Effective settings for one provider role.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderSettings {
    /// Rate-limiter key.
    pub key: &'static str,
    /// Minimum spacing between calls under `key`.
    pub min_interval: Duration,
    /// Request timeout; `None` when the provider only uses the PDF downloader.
    pub timeout: Option<Duration>,
    /// Title acceptance threshold; `None` when no title check applies.
    pub title_threshold: Option<f64>,
    /// Looser threshold for exact-identifier lookups (DOI registry only).
    pub doi_title_threshold: Option<f64>,
}

/// Returns the built-in settings for a role label, or `None` for an unknown name.
#[must_use]
pub fn defaults_for(name: &str) -> Option<ProviderSettings> {
    let defaults = match name {
        TITLE_SEARCH => ProviderSettings {
            key: semantic_scholar::KEY,
            min_interval: Duration::from_millis(1000),
            timeout: Some(semantic_scholar::DEFAULT_TIMEOUT),
            title_threshold: Some(semantic_scholar::DEFAULT_TITLE_THRESHOLD),
            doi_title_threshold: None,
        },
        PREPRINT_REPOSITORY => ProviderSettings {
            key: arxiv::KEY,
            min_interval: Duration::from_millis(3000),
            timeout: Some(arxiv::DEFAULT_TIMEOUT),
            title_threshold: Some(arxiv::DEFAULT_TITLE_THRESHOLD),
            doi_title_threshold: None,
        },
        DOI_REGISTRY => ProviderSettings {
            key: crossref::KEY,
            min_interval: Duration::from_millis(200),
            timeout: Some(crossref::DEFAULT_TIMEOUT),
            title_threshold: Some(crossref::DEFAULT_TITLE_THRESHOLD),
            doi_title_threshold: Some(crossref::DEFAULT_DOI_TITLE_THRESHOLD),
        },
        DOI_REDIRECT => ProviderSettings {
            key: doi_redirect::KEY,
            min_interval: Duration::from_millis(1000),
            timeout: Some(doi_redirect::DEFAULT_TIMEOUT),
            title_threshold: None,
            doi_title_threshold: None,
        },
        WEB_PAGE => ProviderSettings {
            key: web_page::KEY,
            min_interval: Duration::from_millis(2000),
            timeout: Some(web_page::DEFAULT_TIMEOUT),
            title_threshold: Some(web_page::DEFAULT_TITLE_THRESHOLD),
            doi_title_threshold: None,
        },
        DIRECT_URL => ProviderSettings {
            key: direct::KEY,
            min_interval: Duration::from_millis(500),
            timeout: None,
            title_threshold: None,
            doi_title_threshold: None,
        },
        _ => return None,
    };
    Some(defaults)
}

/// What a fallback chain is resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Purpose {
    /// Abstract text.
    Abstract,
    /// A validated PDF stored on disk.
    Pdf,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abstract => f.write_str("abstract"),
            Self::Pdf => f.write_str("pdf"),
        }
    }
}

/// What a provider instance delivers, with the settings needed to deliver it.
#[derive(Debug, Clone)]
pub enum Target {
    /// Abstract text of at least `min_chars` characters after cleaning.
    Abstract {
        /// Shorter abstracts are declined.
        min_chars: usize,
    },
    /// PDFs stored and validated by the shared downloader.
    Pdf(Arc<PdfDownloader>),
}

impl Target {
    /// Abstract target with the default minimum length.
    #[must_use]
    pub fn abstracts() -> Self {
        Self::Abstract {
            min_chars: DEFAULT_MIN_ABSTRACT_CHARS,
        }
    }

    /// Returns the purpose this target serves.
    #[must_use]
    pub fn purpose(&self) -> Purpose {
        match self {
            Self::Abstract { .. } => Purpose::Abstract,
            Self::Pdf(_) => Purpose::Pdf,
        }
    }
}

/// The value a successful fetch carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Cleaned abstract text.
    Text(String),
    /// A validated PDF on disk.
    Pdf(PdfArtifact),
}

impl Payload {
    /// Returns the text, if this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Pdf(_) => None,
        }
    }

    /// Returns the artifact, if this is a PDF payload.
    #[must_use]
    pub fn as_pdf(&self) -> Option<&PdfArtifact> {
        match self {
            Self::Pdf(artifact) => Some(artifact),
            Self::Text(_) => None,
        }
    }
}

/// An accepted provider result.
#[derive(Debug, Clone, PartialEq)]
pub struct Found {
    pub payload: Payload,
    pub confidence: Confidence,
}

/// Result of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStep {
    /// The provider produced an accepted payload.
    Found(Found),
    /// The provider had nothing acceptable; the reason is logged.
    Declined(String),
}

impl FetchStep {
    /// Creates a found step.
    #[must_use]
    pub fn found(payload: Payload, confidence: Confidence) -> Self {
        Self::Found(Found {
            payload,
            confidence,
        })
    }

    /// Creates a declined step.
    #[must_use]
    pub fn declined(reason: impl Into<String>) -> Self {
        Self::Declined(reason.into())
    }

    /// Returns true for [`FetchStep::Found`].
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// One external data source.
///
/// `fetch` must bound its own wall time (via [`ProviderHttp`]) and must
/// confirm candidate titles against the query before reporting a find.
/// Rate limiting is applied by the caller using [`key`](Provider::key).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Role label recorded as the abstract or PDF source.
    fn name(&self) -> &str;

    /// Rate-limiter key shared by every instance hitting the same service.
    fn key(&self) -> &str;

    /// Queries the source for the record described by `query`.
    async fn fetch(&self, query: &ProviderQuery) -> Result<FetchStep, ProviderError>;
}

/// Picks the candidate whose title best matches `query_title`.
///
/// Only candidates scoring strictly above `threshold` qualify; on equal
/// scores the earlier candidate wins. Returns the score with the candidate.
pub(crate) fn best_title_match<S, T>(
    query_title: &str,
    candidates: impl IntoIterator<Item = (S, T)>,
    threshold: f64,
) -> Option<(f64, T)>
where
    S: AsRef<str>,
{
    let mut best: Option<(f64, T)> = None;
    for (title, item) in candidates {
        let score = title_score(query_title, title.as_ref());
        if score <= threshold {
            continue;
        }
        if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
            best = Some((score, item));
        }
    }
    best
}
