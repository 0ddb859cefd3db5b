//! Title search provider backed by the Semantic Scholar Graph API.
//!
//! The API indexes by title already, so its candidates are accepted at a
//! looser title threshold than keyword-search sources.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::record::{Confidence, ProviderQuery};

use super::text::abstract_step;
use super::{
    FetchStep, Provider, ProviderError, ProviderHttp, TITLE_SEARCH, Target, best_title_match,
};

/// Default Semantic Scholar API base URL.
const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org";

/// Rate-limiter key.
pub(crate) const KEY: &str = "semantic-scholar";

/// Candidate titles must score above this against the query.
pub(crate) const DEFAULT_TITLE_THRESHOLD: f64 = 0.5;

/// Default request timeout.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const SEARCH_FIELDS: &str = "title,abstract,externalIds,openAccessPdf";
const SEARCH_LIMIT: u32 = 5;

// ==================== API Response Types ====================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paper {
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    open_access_pdf: Option<OpenAccessPdf>,
}

#[derive(Debug, Deserialize)]
struct OpenAccessPdf {
    url: Option<String>,
}

impl Paper {
    fn pdf_url(&self) -> Option<&str> {
        self.open_access_pdf
            .as_ref()
            .and_then(|pdf| pdf.url.as_deref())
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

// ==================== SemanticScholarProvider ====================

/// Searches Semantic Scholar by title.
///
/// Abstract target: returns the best match's abstract. PDF target: downloads
/// the best match's open-access PDF.
pub struct SemanticScholarProvider {
    http: ProviderHttp,
    base_url: String,
    api_key: Option<String>,
    title_threshold: f64,
    target: Target,
}

impl SemanticScholarProvider {
    /// Creates a provider against the public API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(target: Target, timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_BASE_URL, target, timeout)
    }

    /// Creates a provider with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if the HTTP client cannot be built.
    pub fn with_base_url(
        base_url: impl Into<String>,
        target: Target,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new(TITLE_SEARCH, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            title_threshold: DEFAULT_TITLE_THRESHOLD,
            target,
        })
    }

    /// Sends `x-api-key` with every request when set.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    /// Overrides the title acceptance threshold.
    #[must_use]
    pub fn with_title_threshold(mut self, threshold: f64) -> Self {
        self.title_threshold = threshold;
        self
    }

    /// Overrides the 429 backoff window.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.http = self.http.with_backoff(backoff);
        self
    }

    fn search_url(&self, title: &str) -> String {
        format!(
            "{}/graph/v1/paper/search?query={}&limit={SEARCH_LIMIT}&fields={SEARCH_FIELDS}",
            self.base_url,
            urlencoding::encode(title)
        )
    }
}

impl std::fmt::Debug for SemanticScholarProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticScholarProvider")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("title_threshold", &self.title_threshold)
            .field("purpose", &self.target.purpose())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for SemanticScholarProvider {
    fn name(&self) -> &str {
        TITLE_SEARCH
    }

    fn key(&self) -> &str {
        KEY
    }

    #[tracing::instrument(skip(self, query), fields(provider = TITLE_SEARCH, record_id = query.record_id))]
    async fn fetch(&self, query: &ProviderQuery) -> Result<FetchStep, ProviderError> {
        if query.title.trim().is_empty() {
            return Ok(FetchStep::declined("record has no title to search"));
        }

        let url = self.search_url(query.title.trim());
        let response = self
            .http
            .send(&url, |client| {
                let request = client.get(&url);
                match &self.api_key {
                    Some(key) => request.header("x-api-key", key),
                    None => request,
                }
            })
            .await?;
        let body: SearchResponse = self.http.read_json(&url, response).await?;
        debug!(candidates = body.data.len(), "title search returned");

        let candidates = body
            .data
            .iter()
            .filter_map(|paper| paper.title.as_deref().map(|title| (title, paper)));
        let Some((score, paper)) = best_title_match(&query.title, candidates, self.title_threshold)
        else {
            return Ok(FetchStep::declined(format!(
                "no candidate title above {}",
                self.title_threshold
            )));
        };
        let confidence = Confidence::from_score(score);

        match &self.target {
            Target::Abstract { min_chars } => Ok(abstract_step(
                paper.abstract_text.as_deref(),
                *min_chars,
                confidence,
            )),
            Target::Pdf(downloader) => match paper.pdf_url() {
                Some(pdf_url) => {
                    downloader
                        .fetch(TITLE_SEARCH, pdf_url, query, confidence)
                        .await
                }
                None => Ok(FetchStep::declined("matched paper has no open-access PDF")),
            },
        }
    }
}
