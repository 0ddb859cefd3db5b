//! PDF artifacts: streaming download and validation.
//!
//! - [`PdfDownloader`] - streams a PDF to `<output_dir>/<id>_<title>.pdf`
//! - [`ArtifactValidator`] - content type, size, and signature checks
//!
//! A file that fails any check, or whose transfer is interrupted, is removed
//! before the result is reported.

mod download;
mod validator;

pub use download::{DEFAULT_PDF_TIMEOUT, PdfArtifact, PdfDownloader};
pub use validator::{
    ArtifactValidator, DEFAULT_MAX_PDF_BYTES, DEFAULT_MIN_PDF_BYTES, PDF_MAGIC, Verdict,
};

pub(crate) use validator::url_looks_like_pdf;
