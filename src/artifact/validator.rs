//! PDF artifact validation.
//!
//! Checks run in a fixed order and stop at the first failure:
//! 1. declared content type mentions `pdf`, or the source URL path ends in `.pdf`
//! 2. file size is within `[min_bytes, max_bytes]`
//! 3. the file starts with the `%PDF-` signature
//!
//! A rejected file is deleted before the verdict is returned.

use std::path::Path;

use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// PDF file signature.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Smallest accepted PDF. Smaller bodies are almost always HTML error pages.
pub const DEFAULT_MIN_PDF_BYTES: u64 = 1024;

/// Largest accepted PDF.
pub const DEFAULT_MAX_PDF_BYTES: u64 = 100 * 1024 * 1024;

/// Result of validating a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The file is a plausible PDF and was kept.
    Valid,
    /// The file was rejected and deleted.
    Rejected(String),
}

impl Verdict {
    /// Returns true for [`Verdict::Valid`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Returns the rejection reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Rejected(reason) => Some(reason),
        }
    }
}

/// Validates downloaded PDFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactValidator {
    min_bytes: u64,
    max_bytes: u64,
}

impl Default for ArtifactValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PDF_BYTES, DEFAULT_MAX_PDF_BYTES)
    }
}

impl ArtifactValidator {
    /// Creates a validator accepting sizes in `[min_bytes, max_bytes]`.
    #[must_use]
    pub fn new(min_bytes: u64, max_bytes: u64) -> Self {
        Self {
            min_bytes,
            max_bytes: max_bytes.max(min_bytes),
        }
    }

    /// Lower size bound.
    #[must_use]
    pub fn min_bytes(&self) -> u64 {
        self.min_bytes
    }

    /// Upper size bound.
    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Metadata check: does the response claim to be a PDF?
    ///
    /// # Errors
    ///
    /// Returns the rejection reason when neither the content type nor the
    /// URL suggests a PDF.
    pub fn check_declared_type(content_type: Option<&str>, source_url: &str) -> Result<(), String> {
        let declared_pdf = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("pdf"));
        if declared_pdf || url_looks_like_pdf(source_url) {
            return Ok(());
        }
        Err(format!(
            "declared content type {:?} is not PDF and URL does not end in .pdf",
            content_type.unwrap_or("<none>")
        ))
    }

    /// Size check against the configured bounds.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason when `size` is out of bounds.
    pub fn check_size(&self, size: u64) -> Result<(), String> {
        if size < self.min_bytes {
            return Err(format!(
                "file too small ({size} bytes, minimum {})",
                self.min_bytes
            ));
        }
        if size > self.max_bytes {
            return Err(format!(
                "file too large ({size} bytes, maximum {})",
                self.max_bytes
            ));
        }
        Ok(())
    }

    /// Runs all checks on the file at `path`, deleting it on rejection.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn validate(
        &self,
        path: &Path,
        declared_content_type: Option<&str>,
        source_url: &str,
    ) -> Verdict {
        match self.run_checks(path, declared_content_type, source_url).await {
            Ok(()) => {
                debug!("artifact accepted");
                Verdict::Valid
            }
            Err(reason) => {
                info!(reason = %reason, "artifact rejected");
                remove_artifact(path).await;
                Verdict::Rejected(reason)
            }
        }
    }

    async fn run_checks(
        &self,
        path: &Path,
        declared_content_type: Option<&str>,
        source_url: &str,
    ) -> Result<(), String> {
        Self::check_declared_type(declared_content_type, source_url)?;

        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("cannot stat artifact: {e}"))?
            .len();
        self.check_size(size)?;

        check_magic(path).await
    }
}

/// Reads the first bytes of `path` and compares them with [`PDF_MAGIC`].
async fn check_magic(path: &Path) -> Result<(), String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("cannot open artifact: {e}"))?;
    let mut header = [0u8; 8];
    let mut filled = 0;
    while filled < header.len() {
        let read = file
            .read(&mut header[filled..])
            .await
            .map_err(|e| format!("cannot read artifact: {e}"))?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    if header[..filled].starts_with(PDF_MAGIC) {
        Ok(())
    } else {
        Err("missing %PDF- signature (body is not a PDF)".to_string())
    }
}

/// Deletes an artifact, tolerating a file that is already gone.
pub(crate) async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed rejected artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove rejected artifact"),
    }
}

/// True when the URL path ends in `.pdf`, ignoring query and fragment.
pub(crate) fn url_looks_like_pdf(url: &str) -> bool {
    Url::parse(url).map_or_else(
        |_| url.trim().to_ascii_lowercase().ends_with(".pdf"),
        |parsed| parsed.path().to_ascii_lowercase().ends_with(".pdf"),
    )
}
