//! Abstract text cleaning shared by all abstract providers.

use std::sync::LazyLock;

use regex::Regex;

use crate::record::Confidence;

use super::{FetchStep, Payload};

/// Abstracts shorter than this after cleaning are declined.
pub const DEFAULT_MIN_ABSTRACT_CHARS: usize = 50;

/// Compiles a regex at static init; panics on invalid pattern.
fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"<[^>]*>"));

static ABSTRACT_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)^\s*abstract\b\s*[:.\-]?\s*"));

/// Strips markup (including JATS), decodes common entities, collapses
/// whitespace and drops a leading "Abstract" label.
///
/// # Examples
///
/// ```
/// use enricher_core::provider::clean_abstract;
///
/// let raw = "<jats:p>Abstract: Caching &amp; edge\n  functions.</jats:p>";
/// assert_eq!(clean_abstract(raw), "Caching & edge functions.");
/// ```
#[must_use]
pub fn clean_abstract(raw: &str) -> String {
    // Tags become spaces so adjacent paragraphs do not fuse words
    let untagged = TAG_RE.replace_all(raw, " ");
    let decoded = untagged
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    ABSTRACT_LABEL_RE.replace(&collapsed, "").trim().to_string()
}

/// Turns a raw provider abstract into a step: found when the cleaned text
/// has at least `min_chars` characters, declined otherwise.
pub(crate) fn abstract_step(
    raw: Option<&str>,
    min_chars: usize,
    confidence: Confidence,
) -> FetchStep {
    let Some(raw) = raw else {
        return FetchStep::declined("matched entry has no abstract");
    };
    let cleaned = clean_abstract(raw);
    let length = cleaned.chars().count();
    if length < min_chars {
        return FetchStep::declined(format!(
            "abstract too short ({length} chars, need {min_chars})"
        ));
    }
    FetchStep::found(Payload::Text(cleaned), confidence)
}
