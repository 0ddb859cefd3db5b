//! DOI registry provider backed by the Crossref REST API.
//!
//! With a DOI the record is looked up exactly (`/works/{doi}`); the returned
//! title only has to clear a loose sanity threshold. Without a DOI the
//! bibliographic query endpoint is searched by title with a stricter
//! threshold.
//!
//! # Polite Pool
//!
//! Requests carry a `mailto` query parameter when a contact email is
//! configured, which routes them to Crossref's polite pool.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::record::{Confidence, ProviderQuery};

use super::text::abstract_step;
use super::{
    DOI_REGISTRY, FetchStep, Provider, ProviderError, ProviderHttp, Target, best_title_match,
};

/// Default Crossref API base URL.
const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

/// Rate-limiter key.
pub(crate) const KEY: &str = "crossref";

/// Title threshold for bibliographic title queries.
pub(crate) const DEFAULT_TITLE_THRESHOLD: f64 = 0.6;

/// Title sanity threshold for exact DOI lookups.
pub(crate) const DEFAULT_DOI_TITLE_THRESHOLD: f64 = 0.3;

/// Default request timeout.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const QUERY_ROWS: u32 = 5;

// ==================== Crossref API Response Types ====================

/// Response of `/works/{doi}`.
#[derive(Debug, Deserialize)]
struct WorkResponse {
    message: CrossrefWork,
}

/// Response of `/works?query.bibliographic=`.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    message: SearchMessage,
}

#[derive(Debug, Deserialize)]
struct SearchMessage {
    #[serde(default)]
    items: Vec<CrossrefWork>,
}

/// One work record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CrossrefWork {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    title: Option<Vec<String>>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    link: Option<Vec<CrossrefLink>>,
}

impl CrossrefWork {
    fn first_title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .and_then(<[String]>::first)
            .map(String::as_str)
            .filter(|title| !title.trim().is_empty())
    }
}

/// A resource link from the Crossref response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CrossrefLink {
    /// The URL field is uppercase in the Crossref response.
    #[serde(rename = "URL")]
    url: String,
    content_type: Option<String>,
    intended_application: Option<String>,
}

// ==================== CrossrefProvider ====================

/// Looks up works in the Crossref registry.
pub struct CrossrefProvider {
    http: ProviderHttp,
    base_url: String,
    mailto: Option<String>,
    title_threshold: f64,
    doi_title_threshold: f64,
    target: Target,
}

impl CrossrefProvider {
    /// Creates a provider against the public API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the HTTP client cannot be built or the
    /// contact email contains control characters.
    pub fn new(
        mailto: Option<String>,
        target: Target,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_BASE_URL, mailto, target, timeout)
    }

    /// Creates a provider with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_base_url(
        base_url: impl Into<String>,
        mailto: Option<String>,
        target: Target,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mailto = mailto.map(|m| m.trim().to_string()).filter(|m| !m.is_empty());
        if let Some(mailto) = &mailto
            && mailto.chars().any(char::is_control)
        {
            return Err(ProviderError::client_build(
                DOI_REGISTRY,
                "contact email contains control characters",
            ));
        }

        Ok(Self {
            http: ProviderHttp::new(DOI_REGISTRY, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mailto,
            title_threshold: DEFAULT_TITLE_THRESHOLD,
            doi_title_threshold: DEFAULT_DOI_TITLE_THRESHOLD,
            target,
        })
    }

    /// Overrides the title threshold for title queries.
    #[must_use]
    pub fn with_title_threshold(mut self, threshold: f64) -> Self {
        self.title_threshold = threshold;
        self
    }

    /// Overrides the title sanity threshold for DOI lookups.
    #[must_use]
    pub fn with_doi_title_threshold(mut self, threshold: f64) -> Self {
        self.doi_title_threshold = threshold;
        self
    }

    /// Overrides the 429 backoff window.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.http = self.http.with_backoff(backoff);
        self
    }

    fn mailto_param(&self) -> String {
        self.mailto
            .as_deref()
            .map(|m| format!("mailto={}", urlencoding::encode(m)))
            .unwrap_or_default()
    }

    fn work_url(&self, doi: &str) -> String {
        let mut url = format!("{}/works/{}", self.base_url, urlencoding::encode(doi));
        if self.mailto.is_some() {
            url.push('?');
            url.push_str(&self.mailto_param());
        }
        url
    }

    fn search_url(&self, title: &str) -> String {
        let mut url = format!(
            "{}/works?query.bibliographic={}&rows={QUERY_ROWS}",
            self.base_url,
            urlencoding::encode(title)
        );
        if self.mailto.is_some() {
            url.push('&');
            url.push_str(&self.mailto_param());
        }
        url
    }

    /// Exact lookup. `Ok(None)` means the registry does not know the DOI.
    async fn lookup_doi(&self, doi: &str) -> Result<Option<CrossrefWork>, ProviderError> {
        let url = self.work_url(doi);
        let response = match self.http.get(&url).await {
            Ok(response) => response,
            Err(error) if error.status() == Some(404) => return Ok(None),
            Err(error) => return Err(error),
        };
        let body: WorkResponse = self.http.read_json(&url, response).await?;
        Ok(Some(body.message))
    }

    async fn search_title(&self, title: &str) -> Result<Vec<CrossrefWork>, ProviderError> {
        let url = self.search_url(title);
        let response = self.http.get(&url).await?;
        let body: SearchResponse = self.http.read_json(&url, response).await?;
        Ok(body.message.items)
    }

    /// Finds the work for `query` and the confidence it earned.
    async fn find_work(
        &self,
        query: &ProviderQuery,
    ) -> Result<Result<(CrossrefWork, Confidence), String>, ProviderError> {
        if let Some(doi) = query.doi.as_deref() {
            let Some(work) = self.lookup_doi(doi).await? else {
                return Ok(Err(format!("DOI {doi} not found in registry")));
            };
            let mismatch = work
                .first_title()
                .filter(|found_title| {
                    !query.title.trim().is_empty()
                        && best_title_match(
                            &query.title,
                            [(*found_title, ())],
                            self.doi_title_threshold,
                        )
                        .is_none()
                })
                .map(|found_title| {
                    format!("registry title {found_title:?} does not match record title")
                });
            return Ok(match mismatch {
                Some(reason) => Err(reason),
                None => Ok((work, Confidence::High)),
            });
        }

        if query.title.trim().is_empty() {
            return Ok(Err("record has neither DOI nor title".to_string()));
        }
        let items = self.search_title(query.title.trim()).await?;
        debug!(candidates = items.len(), "registry title query returned");
        let candidates = items
            .into_iter()
            .filter_map(|work| work.first_title().map(str::to_string).map(|t| (t, work)));
        Ok(
            match best_title_match(&query.title, candidates, self.title_threshold) {
                Some((score, work)) => Ok((work, Confidence::from_score(score))),
                None => Err(format!("no registry title above {}", self.title_threshold)),
            },
        )
    }
}

impl std::fmt::Debug for CrossrefProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossrefProvider")
            .field("base_url", &self.base_url)
            .field("mailto", &self.mailto)
            .field("purpose", &self.target.purpose())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for CrossrefProvider {
    fn name(&self) -> &str {
        DOI_REGISTRY
    }

    fn key(&self) -> &str {
        KEY
    }

    #[tracing::instrument(skip(self, query), fields(provider = DOI_REGISTRY, record_id = query.record_id, doi = ?query.doi))]
    async fn fetch(&self, query: &ProviderQuery) -> Result<FetchStep, ProviderError> {
        let (work, confidence) = match self.find_work(query).await? {
            Ok(found) => found,
            Err(reason) => return Ok(FetchStep::declined(reason)),
        };
        debug!(doi = ?work.doi, "registry work matched");

        match &self.target {
            Target::Abstract { min_chars } => Ok(abstract_step(
                work.abstract_text.as_deref(),
                *min_chars,
                confidence,
            )),
            Target::Pdf(downloader) => {
                let links = work.link.as_deref().unwrap_or(&[]);
                match extract_pdf_url(links) {
                    Some(pdf_url) => {
                        downloader
                            .fetch(DOI_REGISTRY, &pdf_url, query, confidence)
                            .await
                    }
                    None => Ok(FetchStep::declined("registry record has no PDF link")),
                }
            }
        }
    }
}

// ==================== Extraction Helpers ====================

/// Extracts the best PDF URL from Crossref link entries.
///
/// Priority:
/// 1. Links with `content-type: "application/pdf"`
/// 2. Links with `intended-application: "text-mining"` or `"similarity-checking"`
fn extract_pdf_url(links: &[CrossrefLink]) -> Option<String> {
    links
        .iter()
        .find(|link| link.content_type.as_deref().is_some_and(is_pdf_content_type))
        .or_else(|| {
            links.iter().find(|link| {
                link.intended_application
                    .as_deref()
                    .is_some_and(is_fallback_application)
            })
        })
        .map(|link| link.url.clone())
}

fn is_pdf_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|mime| mime.eq_ignore_ascii_case("application/pdf"))
}

fn is_fallback_application(intended_application: &str) -> bool {
    intended_application.eq_ignore_ascii_case("text-mining")
        || intended_application.eq_ignore_ascii_case("similarity-checking")
}
