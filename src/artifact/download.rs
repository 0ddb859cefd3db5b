//! Streaming PDF downloader feeding the artifact validator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Response;
use reqwest::header::CONTENT_TYPE;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::provider::{FetchStep, Payload, ProviderError, ProviderHttp};
use crate::record::{Confidence, ProviderQuery};

use super::validator::{ArtifactValidator, Verdict};

/// Client label used for PDF transfers in errors and logs.
const DOWNLOAD_CLIENT_NAME: &str = "pdf-download";

/// Longest title fragment kept in a stored file name.
const MAX_TITLE_CHARS: usize = 60;

/// Default timeout for a complete PDF transfer.
pub const DEFAULT_PDF_TIMEOUT: Duration = Duration::from_secs(60);

/// A validated PDF stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfArtifact {
    pub path: PathBuf,
    /// Final URL the bytes came from, after redirects.
    pub url: String,
    pub bytes: u64,
}

/// How a body transfer ended.
enum StreamEnd {
    Complete(u64),
    TooLarge(u64),
}

/// Removes a file being written unless it is kept.
///
/// Dropping the download future mid-body (cancellation, a record timeout)
/// runs this too, so an aborted transfer never leaves bytes behind.
struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed partial file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove partial file");
            }
        }
    }
}

/// Downloads PDFs into one output directory and validates them.
///
/// Shared by every PDF-mode provider through an `Arc`.
#[derive(Debug, Clone)]
pub struct PdfDownloader {
    http: ProviderHttp,
    validator: ArtifactValidator,
    output_dir: PathBuf,
}

impl PdfDownloader {
    /// Creates a downloader with its own HTTP client bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        validator: ArtifactValidator,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = ProviderHttp::new(DOWNLOAD_CLIENT_NAME, timeout)?;
        Ok(Self::with_http(http, validator, output_dir))
    }

    /// Creates a downloader around an existing HTTP policy.
    #[must_use]
    pub fn with_http(
        http: ProviderHttp,
        validator: ArtifactValidator,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            validator,
            output_dir: output_dir.into(),
        }
    }

    /// Overrides the 429 backoff window.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.http = self.http.with_backoff(backoff);
        self
    }

    /// Directory PDFs are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The validator applied to every stored file.
    #[must_use]
    pub fn validator(&self) -> &ArtifactValidator {
        &self.validator
    }

    /// Downloads `url` for `query` on behalf of `provider`.
    ///
    /// Validation failures are [`FetchStep::Declined`]; only transport and
    /// file system failures are errors. No partial file survives either,
    /// including when the returned future is dropped mid-transfer.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on invalid URL, HTTP failure, stream
    /// interruption, or IO failure.
    #[instrument(skip(self, query, confidence), fields(record_id = query.record_id))]
    pub async fn fetch(
        &self,
        provider: &str,
        url: &str,
        query: &ProviderQuery,
        confidence: Confidence,
    ) -> Result<FetchStep, ProviderError> {
        let parsed = Url::parse(url).map_err(|_| ProviderError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::invalid_url(url));
        }
        let response = self.http.get(url).await?;
        self.store_response(provider, url, response, query, confidence)
            .await
    }

    /// Streams an already-received response to disk and validates it.
    ///
    /// Used directly by providers that discover the PDF while resolving a
    /// landing page.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    #[instrument(skip(self, response, query, confidence), fields(record_id = query.record_id))]
    pub async fn store_response(
        &self,
        provider: &str,
        url: &str,
        response: Response,
        query: &ProviderQuery,
        confidence: Confidence,
    ) -> Result<FetchStep, ProviderError> {
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Metadata check against both the requested and the redirected URL
        if let Err(reason) = ArtifactValidator::check_declared_type(content_type.as_deref(), url)
            .or_else(|_| {
                ArtifactValidator::check_declared_type(content_type.as_deref(), &final_url)
            })
        {
            return Ok(FetchStep::declined(reason));
        }

        if let Some(declared) = response.content_length()
            && declared > self.validator.max_bytes()
        {
            return Ok(FetchStep::declined(format!(
                "declared size {declared} bytes exceeds maximum {}",
                self.validator.max_bytes()
            )));
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ProviderError::io(&self.output_dir, e))?;
        let path = self.output_dir.join(pdf_file_name(query));
        let partial = PartialFile::new(path.clone());
        let mut file = File::create(&path)
            .await
            .map_err(|e| ProviderError::io(&path, e))?;

        let stream_result = self.stream_to_file(&mut file, response, url, &path).await;
        drop(file);

        let bytes = match stream_result {
            Ok(StreamEnd::Complete(bytes)) => bytes,
            Ok(StreamEnd::TooLarge(bytes)) => {
                return Ok(FetchStep::declined(format!(
                    "body exceeded maximum {} bytes after {bytes} bytes",
                    self.validator.max_bytes()
                )));
            }
            Err(error) => {
                debug!(path = %path.display(), "transfer failed mid-body");
                return Err(error);
            }
        };

        match self
            .validator
            .validate(&path, content_type.as_deref(), &final_url)
            .await
        {
            Verdict::Valid => {
                let path = partial.keep();
                info!(provider, path = %path.display(), bytes, "PDF stored");
                Ok(FetchStep::found(
                    Payload::Pdf(PdfArtifact {
                        path,
                        url: final_url,
                        bytes,
                    }),
                    confidence,
                ))
            }
            Verdict::Rejected(reason) => Ok(FetchStep::declined(reason)),
        }
    }

    /// Streams the body through a `BufWriter`, stopping once `max_bytes` is
    /// exceeded.
    async fn stream_to_file(
        &self,
        file: &mut File,
        response: Response,
        url: &str,
        path: &Path,
    ) -> Result<StreamEnd, ProviderError> {
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;
        let limit = self.validator.max_bytes();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result
                .map_err(|e| ProviderError::from_transport(self.http.provider(), url, e))?;
            bytes_written += chunk.len() as u64;
            if bytes_written > limit {
                return Ok(StreamEnd::TooLarge(bytes_written));
            }
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| ProviderError::io(path, e))?;
        }

        writer.flush().await.map_err(|e| ProviderError::io(path, e))?;
        Ok(StreamEnd::Complete(bytes_written))
    }
}

/// `<record id>_<sanitized title>.pdf`, title cut to a fixed length.
pub(crate) fn pdf_file_name(query: &ProviderQuery) -> String {
    let title: String = sanitize_filename_component(&query.title)
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let title = title.trim_matches('_');
    if title.is_empty() {
        format!("{}.pdf", query.record_id)
    } else {
        format!("{}_{title}.pdf", query.record_id)
    }
}

fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            c if c.is_alphanumeric() || c == '-' => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches('_').to_string()
}
