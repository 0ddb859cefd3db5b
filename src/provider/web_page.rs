//! Open web page provider: scrapes a record's landing page.
//!
//! Abstracts come from the usual scholarly meta tags (Highwire `citation_*`,
//! Dublin Core, Open Graph) or an element marked as the abstract. PDF links
//! come from `citation_pdf_url` or the first anchor pointing at a `.pdf`.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::artifact::url_looks_like_pdf;
use crate::record::{Confidence, ProviderQuery};

use super::text::abstract_step;
use super::{
    FetchStep, Provider, ProviderError, ProviderHttp, Target, WEB_PAGE, best_title_match,
};

/// Rate-limiter key.
pub(crate) const KEY: &str = "web";

/// Page titles must score above this against the query.
pub(crate) const DEFAULT_TITLE_THRESHOLD: f64 = 0.3;

/// Default request timeout.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Parses a selector literal; panics on an invalid pattern.
fn static_selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid static selector '{css}': {e}"))
}

static TITLE_META: LazyLock<Selector> =
    LazyLock::new(|| static_selector(r#"meta[name="citation_title" i]"#));
static TITLE_TAG: LazyLock<Selector> = LazyLock::new(|| static_selector("title"));
static ABSTRACT_META: LazyLock<[Selector; 4]> = LazyLock::new(|| {
    [
        static_selector(r#"meta[name="citation_abstract" i]"#),
        static_selector(r#"meta[name="dc.description" i]"#),
        static_selector(r#"meta[property="og:description" i]"#),
        static_selector(r#"meta[name="description" i]"#),
    ]
});
static ABSTRACT_ELEMENT: LazyLock<Selector> =
    LazyLock::new(|| static_selector("section.abstract, div.abstract, #abstract"));
static PDF_META: LazyLock<Selector> =
    LazyLock::new(|| static_selector(r#"meta[name="citation_pdf_url" i]"#));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| static_selector("a[href]"));

/// What a landing page offers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageExtract {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    /// Absolute PDF URL.
    pub pdf_url: Option<String>,
}

/// Extracts title, abstract and PDF link from `html` served at `page_url`.
#[must_use]
pub fn extract_page(html: &str, page_url: &Url) -> PageExtract {
    let document = Html::parse_document(html);

    let title = first_meta_content(&document, &TITLE_META)
        .or_else(|| document.select(&TITLE_TAG).next().map(|el| element_text(&el)))
        .filter(|title| !title.is_empty());

    let abstract_text = ABSTRACT_META
        .iter()
        .find_map(|selector| first_meta_content(&document, selector))
        .or_else(|| {
            document
                .select(&ABSTRACT_ELEMENT)
                .map(|el| element_text(&el))
                .find(|text| !text.is_empty())
        });

    let pdf_url = first_meta_content(&document, &PDF_META)
        .and_then(|href| absolutize_url(&href, page_url))
        .or_else(|| {
            document
                .select(&ANCHOR)
                .filter_map(|el| el.value().attr("href"))
                .filter_map(|href| absolutize_url(href.trim(), page_url))
                .find(|url| url_looks_like_pdf(url))
        });

    PageExtract {
        title,
        abstract_text,
        pdf_url,
    }
}

fn first_meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves a possibly relative link against the page URL; only http(s)
/// results are kept.
fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    let resolved = base_url.join(value).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// How a page's payload earns its confidence.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PageTrust {
    /// The page title must match the query title above this threshold.
    TitleAbove(f64),
    /// The page was reached through an identifier; no title check.
    Fixed(Confidence),
}

/// Fetches a landing page and produces the target's payload from it.
///
/// A page that turns out to be a PDF is stored directly in PDF mode.
pub(crate) async fn fetch_from_page(
    http: &ProviderHttp,
    provider: &str,
    page_url: &str,
    query: &ProviderQuery,
    target: &Target,
    trust: PageTrust,
) -> Result<FetchStep, ProviderError> {
    let response = http.get(page_url).await?;
    let final_url = response.url().clone();
    let serves_pdf = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("pdf"));

    if serves_pdf {
        return match target {
            Target::Pdf(downloader) => {
                let confidence = match trust {
                    PageTrust::Fixed(confidence) => confidence,
                    PageTrust::TitleAbove(_) => Confidence::Low,
                };
                downloader
                    .store_response(provider, page_url, response, query, confidence)
                    .await
            }
            Target::Abstract { .. } => Ok(FetchStep::declined("landing page is a PDF")),
        };
    }

    let html = http.read_text(page_url, response).await?;
    let page = extract_page(&html, &final_url);
    debug!(
        url = %final_url,
        has_title = page.title.is_some(),
        has_abstract = page.abstract_text.is_some(),
        has_pdf = page.pdf_url.is_some(),
        "landing page scanned"
    );

    let confidence = match (trust, page.title.as_deref()) {
        // The caller's identifier (exact DOI) names this page; its title is not compared
        (PageTrust::Fixed(confidence), _) => confidence,
        // Nothing to compare against; accepted, but never above low
        (PageTrust::TitleAbove(_), None) => Confidence::Low,
        (PageTrust::TitleAbove(_), Some(_)) if query.title.trim().is_empty() => Confidence::Low,
        (PageTrust::TitleAbove(threshold), Some(page_title)) => {
            match best_title_match(&query.title, [(page_title, ())], threshold) {
                Some((score, ())) => Confidence::from_score(score),
                None => {
                    return Ok(FetchStep::declined(format!(
                        "page title {page_title:?} does not match record title"
                    )));
                }
            }
        }
    };

    match target {
        Target::Abstract { min_chars } => Ok(abstract_step(
            page.abstract_text.as_deref(),
            *min_chars,
            confidence,
        )),
        Target::Pdf(downloader) => match page.pdf_url {
            Some(pdf_url) => downloader.fetch(provider, &pdf_url, query, confidence).await,
            None => Ok(FetchStep::declined("no PDF link on landing page")),
        },
    }
}

// ==================== WebPageProvider ====================

/// Scrapes the record's `source_url`.
pub struct WebPageProvider {
    http: ProviderHttp,
    title_threshold: f64,
    target: Target,
}

impl WebPageProvider {
    /// Creates a web page provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(target: Target, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new(WEB_PAGE, timeout)?,
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
}

impl std::fmt::Debug for WebPageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebPageProvider")
            .field("title_threshold", &self.title_threshold)
            .field("purpose", &self.target.purpose())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for WebPageProvider {
    fn name(&self) -> &str {
        WEB_PAGE
    }

    fn key(&self) -> &str {
        KEY
    }

    #[tracing::instrument(skip(self, query), fields(provider = WEB_PAGE, record_id = query.record_id))]
    async fn fetch(&self, query: &ProviderQuery) -> Result<FetchStep, ProviderError> {
        let Some(source_url) = query.source_url.as_deref() else {
            return Ok(FetchStep::declined("record has no source URL"));
        };
        if Url::parse(source_url).is_err() {
            return Err(ProviderError::invalid_url(source_url));
        }
        fetch_from_page(
            &self.http,
            WEB_PAGE,
            source_url,
            query,
            &self.target,
            PageTrust::TitleAbove(self.title_threshold),
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::Payload;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    const LONG_ABSTRACT: &str =
        "This paper studies consensus protocols under partial synchrony and measures tail latency.";

    fn base() -> Url {
        Url::parse("https://journal.example/articles/42").unwrap()
    }

    // ==================== Extraction ====================

    #[test]
    fn test_extract_prefers_citation_meta() {
        let html = format!(
            r#"<html><head>
                <title>Journal | Consensus Under Partial Synchrony</title>
                <meta name="citation_title" content="Consensus Under Partial Synchrony">
                <meta name="citation_abstract" content="{LONG_ABSTRACT}">
                <meta name="description" content="Generic site description">
                <meta name="citation_pdf_url" content="/articles/42.pdf">
            </head><body></body></html>"#
        );
        let page = extract_page(&html, &base());
        assert_eq!(page.title.as_deref(), Some("Consensus Under Partial Synchrony"));
        assert_eq!(page.abstract_text.as_deref(), Some(LONG_ABSTRACT));
        assert_eq!(
            page.pdf_url.as_deref(),
            Some("https://journal.example/articles/42.pdf")
        );
    }

    #[test]
    fn test_extract_falls_back_through_meta_order() {
        let html = r#"<html><head>
            <meta property="og:description" content="From open graph">
            <meta name="description" content="From description">
        </head></html>"#;
        assert_eq!(
            extract_page(html, &base()).abstract_text.as_deref(),
            Some("From open graph")
        );

        let dc = r#"<meta name="DC.Description" content="From dublin core">"#;
        assert_eq!(
            extract_page(dc, &base()).abstract_text.as_deref(),
            Some("From dublin core")
        );
    }

    #[test]
    fn test_extract_abstract_element_and_anchor() {
        let html = r#"<html><head><title> Edge
            Caching </title></head><body>
            <div class="abstract"><h2>Abstract</h2><p>We cache   things.</p></div>
            <a href="/about">About</a>
            <a href="files/paper.PDF">Download</a>
        </body></html>"#;
        let page = extract_page(html, &base());
        assert_eq!(page.title.as_deref(), Some("Edge Caching"));
        assert_eq!(page.abstract_text.as_deref(), Some("Abstract We cache things."));
        assert_eq!(
            page.pdf_url.as_deref(),
            Some("https://journal.example/articles/files/paper.PDF")
        );
    }

    #[test]
    fn test_extract_empty_page() {
        assert_eq!(extract_page("", &base()), PageExtract::default());
    }

    #[test]
    fn test_absolutize_rejects_non_http() {
        assert!(absolutize_url("javascript:alert(1)", &base()).is_none());
        assert!(absolutize_url("mailto:a@b.org", &base()).is_none());
        assert_eq!(
            absolutize_url("//cdn.example/a.pdf", &base()).as_deref(),
            Some("https://cdn.example/a.pdf")
        );
    }

    // ==================== Provider (wiremock) ====================

    fn page_query(url: String, title: &str) -> ProviderQuery {
        ProviderQuery {
            source_url: Some(url),
            ..ProviderQuery::from_title(9, title)
        }
    }

    #[tokio::test]
    async fn test_fetch_abstract_from_landing_page() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let html = format!(
            r#"<html><head><meta name="citation_title" content="Consensus Under Partial Synchrony">
               <meta name="citation_abstract" content="{LONG_ABSTRACT}"></head></html>"#
        );
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(html),
            )
            .mount(&server)
            .await;

        let provider = WebPageProvider::new(Target::abstracts(), Duration::from_secs(5)).unwrap();
        let query = page_query(
            format!("{}/article", server.uri()),
            "Consensus under partial synchrony",
        );
        let step = provider.fetch(&query).await.unwrap();
        assert_eq!(
            step,
            FetchStep::found(Payload::Text(LONG_ABSTRACT.to_string()), Confidence::High)
        );
    }

    #[tokio::test]
    async fn test_fetch_page_without_title_is_low_confidence() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let html = format!(r#"<meta name="description" content="{LONG_ABSTRACT}">"#);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let provider = WebPageProvider::new(Target::abstracts(), Duration::from_secs(5)).unwrap();
        let step = provider
            .fetch(&page_query(server.uri(), "Anything"))
            .await
            .unwrap();
        let FetchStep::Found(found) = step else {
            panic!("expected found, got {step:?}");
        };
        assert_eq!(found.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn test_fetch_declines_mismatched_page_title() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let html = format!(
            r#"<title>Page Not Found</title><meta name="description" content="{LONG_ABSTRACT}">"#
        );
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let provider = WebPageProvider::new(Target::abstracts(), Duration::from_secs(5)).unwrap();
        let step = provider
            .fetch(&page_query(server.uri(), "Consensus under partial synchrony"))
            .await
            .unwrap();
        assert!(matches!(step, FetchStep::Declined(ref r) if r.contains("does not match")));
    }

    #[tokio::test]
    async fn test_fetch_without_source_url_declines() {
        let provider = WebPageProvider::new(Target::abstracts(), Duration::from_secs(5)).unwrap();
        let step = provider
            .fetch(&ProviderQuery::from_title(1, "x"))
            .await
            .unwrap();
        assert!(!step.is_found());
        assert_eq!(provider.name(), "web-page");
        assert_eq!(provider.key(), "web");
    }
}
