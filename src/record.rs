//! Bibliographic record model shared by every pipeline stage.
//!
//! A [`Record`] enters the pipeline from an upstream fetch, may be dropped by
//! the deduplicator, and is then mutated in place by the enrichment stages to
//! attach an abstract and a PDF. [`ProviderQuery`] is the read-only view of a
//! record that providers receive.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where a record's abstract came from.
///
/// Serialized as a plain string: `"NONE"`, `"ORIGINAL"`, or the provider name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AbstractSource {
    /// No abstract is attached.
    #[default]
    None,
    /// The abstract arrived with the record from the upstream fetch.
    Original,
    /// The abstract was fetched by the named provider.
    Provider(String),
}

impl AbstractSource {
    /// Returns the stable string label for display and serialization.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "NONE",
            Self::Original => "ORIGINAL",
            Self::Provider(name) => name,
        }
    }
}

impl From<String> for AbstractSource {
    fn from(value: String) -> Self {
        match value.trim() {
            "" | "NONE" | "None" | "none" => Self::None,
            "ORIGINAL" | "Original" | "original" => Self::Original,
            other => Self::Provider(other.to_string()),
        }
    }
}

impl From<AbstractSource> for String {
    fn from(value: AbstractSource) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AbstractSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse trust label for a fetched value.
///
/// Ordered so that `None < Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    /// Nothing was fetched.
    #[default]
    None,
    /// Accepted, but the title match was weak or unchecked.
    Low,
    /// Accepted with a reasonable title match.
    Medium,
    /// Accepted with a near-exact title match or an exact identifier hit.
    High,
}

/// Score at or above which a title match is labelled [`Confidence::High`].
pub const HIGH_CONFIDENCE_SCORE: f64 = 0.9;

/// Score at or above which a title match is labelled [`Confidence::Medium`].
pub const MEDIUM_CONFIDENCE_SCORE: f64 = 0.75;

impl Confidence {
    /// Maps a title similarity score that already cleared a provider's
    /// acceptance threshold onto a confidence label.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_CONFIDENCE_SCORE {
            Self::High
        } else if score >= MEDIUM_CONFIDENCE_SCORE {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bibliographic entry.
///
/// Invariant: `abstract_source` is [`AbstractSource::None`] exactly when
/// `abstract_text` is empty. [`Record::normalize_abstract_source`] restores it
/// for records that arrive from outside the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    /// Stable sequence key, reassigned after deduplication.
    pub id: u64,
    pub title: String,
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    pub abstract_source: AbstractSource,
    pub abstract_confidence: Confidence,
    /// DOI without resolver prefix; unique key when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_source: Option<String>,
}

impl Record {
    /// Creates a record with only a title set.
    #[must_use]
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            ..Self::default()
        }
    }

    /// Sets the DOI.
    #[must_use]
    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    /// Sets the landing page URL.
    #[must_use]
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Sets an abstract that arrived with the record.
    #[must_use]
    pub fn with_original_abstract(mut self, text: impl Into<String>) -> Self {
        self.abstract_text = Some(text.into());
        self.abstract_source = AbstractSource::Original;
        self
    }

    /// Returns true when a non-blank abstract is attached.
    #[must_use]
    pub fn has_abstract(&self) -> bool {
        self.abstract_text
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }

    /// Returns true when a PDF has already been stored for this record.
    #[must_use]
    pub fn has_pdf(&self) -> bool {
        self.pdf_path.is_some()
    }

    /// Returns the DOI if it is non-blank.
    #[must_use]
    pub fn doi(&self) -> Option<&str> {
        self.doi.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }

    /// Re-establishes the abstract/source invariant on externally built records.
    pub fn normalize_abstract_source(&mut self) {
        if self.has_abstract() {
            if self.abstract_source == AbstractSource::None {
                self.abstract_source = AbstractSource::Original;
            }
        } else {
            self.abstract_text = None;
            self.abstract_source = AbstractSource::None;
            self.abstract_confidence = Confidence::None;
        }
    }

    /// Attaches an abstract fetched by `provider`.
    pub fn set_fetched_abstract(
        &mut self,
        text: String,
        provider: impl Into<String>,
        confidence: Confidence,
    ) {
        self.abstract_text = Some(text);
        self.abstract_source = AbstractSource::Provider(provider.into());
        self.abstract_confidence = confidence;
        self.normalize_abstract_source();
    }

    /// Builds the read-only query view handed to providers.
    #[must_use]
    pub fn query(&self) -> ProviderQuery {
        ProviderQuery {
            record_id: self.id,
            title: self.title.clone(),
            doi: self.doi().map(bare_doi).map(str::to_string),
            source_url: self
                .source_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string),
        }
    }
}

/// Resolver and scheme prefixes a DOI may carry in input data.
const DOI_PREFIXES: [&str; 5] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// Strips a resolver URL or `doi:` prefix, matched case-insensitively,
/// leaving the DOI's own casing intact.
///
/// ```
/// use enricher_core::record::bare_doi;
///
/// assert_eq!(bare_doi(" https://doi.org/10.1/ABC "), "10.1/ABC");
/// assert_eq!(bare_doi("DOI: 10.1/x"), "10.1/x");
/// assert_eq!(bare_doi("10.1/x"), "10.1/x");
/// ```
#[must_use]
pub fn bare_doi(doi: &str) -> &str {
    let trimmed = doi.trim();
    DOI_PREFIXES
        .iter()
        .find_map(|prefix| {
            trimmed
                .get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(prefix))
                .map(|_| &trimmed[prefix.len()..])
        })
        .unwrap_or(trimmed)
        .trim()
}

/// Read-only view of a record used to query providers.
///
/// Owned by the worker that runs a record's chain; never shared mutably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderQuery {
    pub record_id: u64,
    pub title: String,
    pub doi: Option<String>,
    pub source_url: Option<String>,
}

impl ProviderQuery {
    /// Creates a query with only a title.
    #[must_use]
    pub fn from_title(record_id: u64, title: impl Into<String>) -> Self {
        Self {
            record_id,
            title: title.into(),
            doi: None,
            source_url: None,
        }
    }
}
