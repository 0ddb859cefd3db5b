//! DOI redirect provider: resolves a DOI through `doi.org` to the
//! publisher's landing page and scrapes it.

use std::time::Duration;

use async_trait::async_trait;

use crate::record::{Confidence, ProviderQuery};

use super::web_page::{PageTrust, fetch_from_page};
use super::{DOI_REDIRECT, FetchStep, Provider, ProviderError, ProviderHttp, Target};

/// Default DOI resolver base URL.
const DEFAULT_BASE_URL: &str = "https://doi.org";

/// Rate-limiter key.
pub(crate) const KEY: &str = "doi-org";

/// Default request timeout.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Follows DOI redirects to the landing page.
///
/// The DOI identifies the page, so no title check is applied; results are
/// reported at medium confidence.
pub struct DoiRedirectProvider {
    http: ProviderHttp,
    base_url: String,
    target: Target,
}

impl DoiRedirectProvider {
    /// Creates a provider resolving through `https://doi.org`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(target: Target, timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_BASE_URL, target, timeout)
    }

    /// Creates a provider with a custom resolver base URL (for testing with wiremock).
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
            http: ProviderHttp::new(DOI_REDIRECT, timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            target,
        })
    }

    /// Overrides the 429 backoff window.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.http = self.http.with_backoff(backoff);
        self
    }

    fn doi_url(&self, doi: &str) -> String {
        // DOI suffixes may contain '/', which doi.org expects unescaped
        let encoded = doi
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{encoded}", self.base_url)
    }
}

impl std::fmt::Debug for DoiRedirectProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoiRedirectProvider")
            .field("base_url", &self.base_url)
            .field("purpose", &self.target.purpose())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for DoiRedirectProvider {
    fn name(&self) -> &str {
        DOI_REDIRECT
    }

    fn key(&self) -> &str {
        KEY
    }

    #[tracing::instrument(skip(self, query), fields(provider = DOI_REDIRECT, record_id = query.record_id, doi = ?query.doi))]
    async fn fetch(&self, query: &ProviderQuery) -> Result<FetchStep, ProviderError> {
        let Some(doi) = query.doi.as_deref() else {
            return Ok(FetchStep::declined("record has no DOI"));
        };
        let url = self.doi_url(doi);
        fetch_from_page(
            &self.http,
            DOI_REDIRECT,
            &url,
            query,
            &self.target,
            PageTrust::Fixed(Confidence::Medium),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactValidator, PdfDownloader};
    use crate::provider::Payload;
    use crate::record::Record;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn pdf_body() -> Vec<u8> {
        let mut body = b"%PDF-1.6\n".to_vec();
        body.resize(4096, b'7');
        body
    }

    fn doi_query(doi: &str) -> ProviderQuery {
        ProviderQuery {
            doi: Some(doi.into()),
            ..ProviderQuery::from_title(5, "Consensus at Scale")
        }
    }

    #[test]
    fn test_doi_url_keeps_slashes() {
        let provider = DoiRedirectProvider::new(Target::abstracts(), DEFAULT_TIMEOUT).unwrap();
        assert_eq!(
            provider.doi_url("10.1000/a b<c>"),
            "https://doi.org/10.1000/a%20b%3Cc%3E"
        );
        assert_eq!(provider.name(), "doi-redirect");
        assert_eq!(provider.key(), "doi-org");
    }

    #[tokio::test]
    async fn test_fetch_follows_redirect_for_prefixed_doi() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let abstract_text = "We bound the latency of consensus rounds under partial synchrony \
                             and measure the tail across five regions.";
        Mock::given(method("GET"))
            .and(path("/10.1000/XYZ"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/landing/xyz", server.uri())),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/landing/xyz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(format!(
                        r#"<html><head><meta name="citation_abstract" content="{abstract_text}"></head></html>"#
                    )),
            )
            .mount(&server)
            .await;

        let provider =
            DoiRedirectProvider::with_base_url(server.uri(), Target::abstracts(), Duration::from_secs(5))
                .unwrap();
        let query = Record::new(5, "Consensus at Scale")
            .with_doi("doi:10.1000/XYZ")
            .query();

        let step = provider.fetch(&query).await.unwrap();
        assert_eq!(
            step,
            FetchStep::found(Payload::Text(abstract_text.to_string()), Confidence::Medium)
        );
    }

    #[tokio::test]
    async fn test_fetch_does_not_compare_landing_title() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let abstract_text = "Publisher pages often carry a journal banner as their title \
                             rather than the article title itself.";
        Mock::given(method("GET"))
            .and(path("/10.1000/banner"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(format!(
                        r#"<html><head><title>Journal of Unrelated Topics</title>
                           <meta name="citation_abstract" content="{abstract_text}"></head></html>"#
                    )),
            )
            .mount(&server)
            .await;

        let provider =
            DoiRedirectProvider::with_base_url(server.uri(), Target::abstracts(), Duration::from_secs(5))
                .unwrap();
        let step = provider.fetch(&doi_query("10.1000/banner")).await.unwrap();
        assert_eq!(
            step,
            FetchStep::found(Payload::Text(abstract_text.to_string()), Confidence::Medium)
        );
    }

    #[tokio::test]
    async fn test_fetch_pdf_from_landing_page_link() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/10.1000/xyz"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/landing/xyz", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/landing/xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><head><meta name="citation_pdf_url" content="/files/xyz.pdf"></head></html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/xyz.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(pdf_body()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let downloader = Arc::new(
            PdfDownloader::new(dir.path(), ArtifactValidator::default(), Duration::from_secs(5))
                .unwrap(),
        );
        let provider = DoiRedirectProvider::with_base_url(
            server.uri(),
            Target::Pdf(downloader),
            Duration::from_secs(5),
        )
        .unwrap();

        let step = provider.fetch(&doi_query("10.1000/xyz")).await.unwrap();
        let FetchStep::Found(found) = step else {
            panic!("expected PDF, got {step:?}");
        };
        assert_eq!(found.confidence, Confidence::Medium);
        let artifact = found.payload.as_pdf().unwrap();
        assert!(artifact.url.ends_with("/files/xyz.pdf"));
        assert!(artifact.path.exists());
    }

    #[tokio::test]
    async fn test_fetch_pdf_served_directly_by_landing() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/10.1000/direct"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(pdf_body()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let downloader = Arc::new(
            PdfDownloader::new(dir.path(), ArtifactValidator::default(), Duration::from_secs(5))
                .unwrap(),
        );
        let provider = DoiRedirectProvider::with_base_url(
            server.uri(),
            Target::Pdf(downloader),
            Duration::from_secs(5),
        )
        .unwrap();

        let step = provider.fetch(&doi_query("10.1000/direct")).await.unwrap();
        assert!(step.is_found(), "expected PDF, got {step:?}");
    }

    #[tokio::test]
    async fn test_fetch_without_doi_declines() {
        let provider = DoiRedirectProvider::new(Target::abstracts(), DEFAULT_TIMEOUT).unwrap();
        let step = provider
            .fetch(&ProviderQuery::from_title(1, "x"))
            .await
            .unwrap();
        assert_eq!(step, FetchStep::declined("record has no DOI"));
    }
}
