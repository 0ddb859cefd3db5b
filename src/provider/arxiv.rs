//! Preprint repository provider backed by the arXiv Atom API.
//!
//! arXiv title search is keyword based and noisy, so candidates need a
//! stricter title score than the title search API.

use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::Entry;
use tracing::debug;

use crate::record::{Confidence, ProviderQuery};
use crate::similarity::normalize_title;

use super::text::abstract_step;
use super::{
    FetchStep, PREPRINT_REPOSITORY, Provider, ProviderError, ProviderHttp, Target,
    best_title_match,
};

/// Default arXiv export API base URL.
const DEFAULT_BASE_URL: &str = "https://export.arxiv.org";

/// Host PDFs are served from when an entry carries no PDF link.
const PDF_HOST: &str = "https://arxiv.org/pdf";

/// Rate-limiter key.
pub(crate) const KEY: &str = "arxiv";

/// Candidate titles must score above this against the query.
pub(crate) const DEFAULT_TITLE_THRESHOLD: f64 = 0.7;

/// Default request timeout.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_RESULTS: u32 = 5;

/// Searches arXiv entries by title.
pub struct ArxivProvider {
    http: ProviderHttp,
    base_url: String,
    title_threshold: f64,
    target: Target,
}

impl ArxivProvider {
    /// Creates a provider against the public export API.
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
            http: ProviderHttp::new(PREPRINT_REPOSITORY, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            title_threshold: DEFAULT_TITLE_THRESHOLD,
            target,
        })
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
        // Quotes and punctuation break the arXiv query grammar
        let search_query = format!("ti:\"{}\"", normalize_title(title));
        format!(
            "{}/api/query?search_query={}&max_results={MAX_RESULTS}",
            self.base_url,
            urlencoding::encode(&search_query)
        )
    }
}

impl std::fmt::Debug for ArxivProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArxivProvider")
            .field("base_url", &self.base_url)
            .field("title_threshold", &self.title_threshold)
            .field("purpose", &self.target.purpose())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for ArxivProvider {
    fn name(&self) -> &str {
        PREPRINT_REPOSITORY
    }

    fn key(&self) -> &str {
        KEY
    }

    #[tracing::instrument(skip(self, query), fields(provider = PREPRINT_REPOSITORY, record_id = query.record_id))]
    async fn fetch(&self, query: &ProviderQuery) -> Result<FetchStep, ProviderError> {
        if normalize_title(&query.title).is_empty() {
            return Ok(FetchStep::declined("record has no title to search"));
        }

        let url = self.search_url(&query.title);
        let response = self.http.get(&url).await?;
        let body = self.http.read_text(&url, response).await?;
        let feed = feed_rs::parser::parse(body.as_bytes())
            .map_err(|e| ProviderError::parse(PREPRINT_REPOSITORY, e.to_string()))?;
        debug!(entries = feed.entries.len(), "arXiv search returned");

        let candidates = feed.entries.iter().filter_map(|entry| {
            entry
                .title
                .as_ref()
                .map(|title| (title.content.as_str(), entry))
        });
        let Some((score, entry)) = best_title_match(&query.title, candidates, self.title_threshold)
        else {
            return Ok(FetchStep::declined(format!(
                "no arXiv entry title above {}",
                self.title_threshold
            )));
        };
        let confidence = Confidence::from_score(score);

        match &self.target {
            Target::Abstract { min_chars } => Ok(abstract_step(
                entry.summary.as_ref().map(|s| s.content.as_str()),
                *min_chars,
                confidence,
            )),
            Target::Pdf(downloader) => match entry_pdf_url(entry) {
                Some(pdf_url) => {
                    downloader
                        .fetch(PREPRINT_REPOSITORY, &pdf_url, query, confidence)
                        .await
                }
                None => Ok(FetchStep::declined("arXiv entry has no usable identifier")),
            },
        }
    }
}

/// The entry's `application/pdf` link, or the PDF URL built from its id.
fn entry_pdf_url(entry: &Entry) -> Option<String> {
    let linked = entry.links.iter().find(|link| {
        link.media_type.as_deref() == Some("application/pdf")
            || link.title.as_deref() == Some("pdf")
    });
    if let Some(link) = linked {
        return Some(link.href.replacen("http://arxiv.org/", "https://arxiv.org/", 1));
    }

    let id = entry.id.rsplit_once("/abs/").map(|(_, id)| id.trim())?;
    (!id.is_empty()).then(|| format!("{PDF_HOST}/{id}.pdf"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::Payload;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn atom_feed(title: &str, summary: &str, with_pdf_link: bool) -> String {
        let pdf_link = if with_pdf_link {
            r#"<link title="pdf" href="http://arxiv.org/pdf/2101.00001v2" rel="related" type="application/pdf"/>"#
        } else {
            ""
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>arXiv Query</title>
  <id>http://arxiv.org/api/query</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <id>http://arxiv.org/abs/2101.00001v2</id>
    <updated>2021-01-01T00:00:00Z</updated>
    <published>2021-01-01T00:00:00Z</published>
    <title>{title}</title>
    <summary>{summary}</summary>
    <author><name>A. Author</name></author>
    <link href="http://arxiv.org/abs/2101.00001v2" rel="alternate" type="text/html"/>
    {pdf_link}
  </entry>
</feed>"#
        )
    }

    fn provider(server: &MockServer) -> ArxivProvider {
        ArxivProvider::with_base_url(server.uri(), Target::abstracts(), Duration::from_secs(5))
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_summary_for_matching_entry() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let summary = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod.";
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("search_query", "ti:\"fast caching for edge functions\""))
            .and(query_param("max_results", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_string(atom_feed(
                "Fast Caching for\n      Edge Functions",
                summary,
                true,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let query = ProviderQuery::from_title(1, "Fast Caching for Edge Functions!");
        let step = provider(&server).fetch(&query).await.unwrap();

        assert_eq!(
            step,
            FetchStep::found(Payload::Text(summary.to_string()), Confidence::High)
        );
    }

    #[tokio::test]
    async fn test_fetch_declines_loose_match() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        // 3 shared of 5 distinct = 0.6, below the preprint threshold
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(atom_feed(
                "caching for edge",
                "Some long enough summary text about edge caching systems and more.",
                false,
            )))
            .mount(&server)
            .await;

        let query = ProviderQuery::from_title(1, "caching for edge functions survey");
        let step = provider(&server).fetch(&query).await.unwrap();
        assert!(!step.is_found());
    }

    #[tokio::test]
    async fn test_fetch_malformed_feed_is_parse_error() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<<not xml"))
            .mount(&server)
            .await;

        let result = provider(&server)
            .fetch(&ProviderQuery::from_title(1, "Edge"))
            .await;
        assert!(matches!(result, Err(ProviderError::Parse { .. })));
    }

    #[test]
    fn test_entry_pdf_url_prefers_link() {
        let feed =
            feed_rs::parser::parse(atom_feed("T", "S", true).as_bytes()).unwrap();
        assert_eq!(
            entry_pdf_url(&feed.entries[0]).as_deref(),
            Some("https://arxiv.org/pdf/2101.00001v2")
        );
    }

    #[test]
    fn test_entry_pdf_url_built_from_id() {
        let feed =
            feed_rs::parser::parse(atom_feed("T", "S", false).as_bytes()).unwrap();
        assert_eq!(
            entry_pdf_url(&feed.entries[0]).as_deref(),
            Some("https://arxiv.org/pdf/2101.00001v2.pdf")
        );
    }

    #[test]
    fn test_search_url_strips_quotes() {
        let provider = ArxivProvider::new(Target::abstracts(), DEFAULT_TIMEOUT).unwrap();
        let url = provider.search_url("The \"Best\" Cache");
        assert!(url.contains(&*urlencoding::encode("ti:\"the best cache\"")));
    }

    #[test]
    fn test_name_and_key() {
        let provider = ArxivProvider::new(Target::abstracts(), DEFAULT_TIMEOUT).unwrap();
        assert_eq!(provider.name(), "preprint-repository");
        assert_eq!(provider.key(), "arxiv");
    }
}
