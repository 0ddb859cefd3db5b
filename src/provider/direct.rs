//! Direct URL provider: downloads a record's source URL when it already
//! points at a PDF.

use async_trait::async_trait;
use url::Url;

use crate::artifact::url_looks_like_pdf;
use crate::record::{Confidence, ProviderQuery};

use super::{DIRECT_URL, FetchStep, Provider, ProviderError, Target};

/// Rate-limiter key.
pub(crate) const KEY: &str = "direct";

/// Downloads PDF-shaped source URLs as-is.
///
/// Only meaningful in a PDF chain; with an abstract target every call is
/// declined.
#[derive(Debug)]
pub struct DirectUrlProvider {
    target: Target,
}

impl DirectUrlProvider {
    /// Creates a direct URL provider.
    #[must_use]
    pub fn new(target: Target) -> Self {
        Self { target }
    }
}

/// True for URLs whose path ends in `.pdf` or contains a `/pdf/` segment.
pub(crate) fn is_pdf_shaped(url: &str) -> bool {
    if url_looks_like_pdf(url) {
        return true;
    }
    Url::parse(url).is_ok_and(|parsed| {
        parsed
            .path_segments()
            .is_some_and(|mut segments| segments.any(|s| s.eq_ignore_ascii_case("pdf")))
    })
}

#[async_trait]
impl Provider for DirectUrlProvider {
    fn name(&self) -> &str {
        DIRECT_URL
    }

    fn key(&self) -> &str {
        KEY
    }

    #[tracing::instrument(skip(self, query), fields(provider = DIRECT_URL, record_id = query.record_id))]
    async fn fetch(&self, query: &ProviderQuery) -> Result<FetchStep, ProviderError> {
        let Target::Pdf(downloader) = &self.target else {
            return Ok(FetchStep::declined("direct URLs only provide PDFs"));
        };
        let Some(source_url) = query.source_url.as_deref() else {
            return Ok(FetchStep::declined("record has no source URL"));
        };
        if !is_pdf_shaped(source_url) {
            return Ok(FetchStep::declined("source URL is not PDF-shaped"));
        }
        downloader
            .fetch(DIRECT_URL, source_url, query, Confidence::Medium)
            .await
    }
}
