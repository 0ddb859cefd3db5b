//! Error types for provider calls.
//!
//! Provider errors never escape the fallback pipeline: they are logged and
//! the next provider is tried. They still carry full context (provider, URL,
//! path) so the logs say exactly what went wrong.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while a provider talks to its upstream service.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The HTTP client could not be constructed.
    #[error("{provider}: HTTP client construction failed: {reason}")]
    ClientBuild {
        /// Provider whose client failed to build.
        provider: String,
        /// Builder error text.
        reason: String,
    },

    /// Network-level failure (DNS, connection refused, TLS, reset mid-body).
    #[error("{provider}: network error requesting {url}: {source}")]
    Network {
        /// Provider that issued the request.
        provider: String,
        /// Requested URL.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The request exceeded the provider's timeout.
    #[error("{provider}: timeout requesting {url}")]
    Timeout {
        /// Provider that issued the request.
        provider: String,
        /// Requested URL.
        url: String,
    },

    /// Non-success HTTP status other than a handled 429.
    #[error("{provider}: HTTP {status} from {url}")]
    HttpStatus {
        /// Provider that issued the request.
        provider: String,
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The upstream service answered 429 again after the backoff window.
    #[error(
        "{provider}: still rate limited by {url} after backoff\n  Suggestion: Increase the provider's min_interval_ms or lower concurrency"
    )]
    RateLimited {
        /// Provider that issued the request.
        provider: String,
        /// Requested URL.
        url: String,
    },

    /// The response body could not be decoded.
    #[error("{provider}: unexpected response format: {reason}")]
    Parse {
        /// Provider that received the body.
        provider: String,
        /// Decoder error text.
        reason: String,
    },

    /// A URL was malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// File system error while storing an artifact.
    #[error("IO error writing to {path}: {source}\n  Suggestion: Check that the PDF output directory is writable")]
    Io {
        /// File path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ProviderError {
    /// Creates a client construction error.
    pub fn client_build(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ClientBuild {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(
        provider: impl Into<String>,
        url: impl Into<String>,
        source: reqwest::Error,
    ) -> Self {
        Self::Network {
            provider: provider.into(),
            url: url.into(),
            source,
        }
    }

    /// Maps a reqwest error to [`Self::Timeout`] or [`Self::Network`].
    pub fn from_transport(
        provider: impl Into<String>,
        url: impl Into<String>,
        source: reqwest::Error,
    ) -> Self {
        if source.is_timeout() {
            Self::timeout(provider, url)
        } else {
            Self::network(provider, url, source)
        }
    }

    /// Creates a timeout error.
    pub fn timeout(provider: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Timeout {
            provider: provider.into(),
            url: url.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(provider: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            provider: provider.into(),
            url: url.into(),
            status,
        }
    }

    /// Creates a rate-limited error.
    pub fn rate_limited(provider: impl Into<String>, url: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            url: url.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the HTTP status for [`Self::HttpStatus`] errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for timeouts.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs the
// provider, URL or path that the source error does not carry.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let error = ProviderError::timeout("title-search", "https://api.example.com/search");
        let msg = error.to_string();
        assert!(msg.contains("title-search"), "missing provider in: {msg}");
        assert!(msg.contains("timeout"), "missing kind in: {msg}");
        assert!(error.is_timeout());
    }

    #[test]
    fn test_http_status_display_and_accessor() {
        let error = ProviderError::http_status("doi-registry", "https://api.crossref.org/x", 404);
        assert!(error.to_string().contains("HTTP 404"));
        assert_eq!(error.status(), Some(404));
        assert!(!error.is_timeout());
    }

    #[test]
    fn test_rate_limited_has_suggestion() {
        let error = ProviderError::rate_limited("preprint-repository", "https://export.arxiv.org");
        let msg = error.to_string();
        assert!(msg.contains("Suggestion:"), "missing suggestion in: {msg}");
        assert_eq!(error.status(), None);
    }

    #[test]
    fn test_io_display_includes_path() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = ProviderError::io("/tmp/pdfs/1_paper.pdf", io_error);
        assert!(error.to_string().contains("/tmp/pdfs/1_paper.pdf"));
    }
}
